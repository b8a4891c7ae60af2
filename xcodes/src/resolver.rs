//! Turning what the user asked for into exactly one archive.
//!
//! A request names a version, a local archive, or "the latest". The resolver
//! reads the catalog (refreshing it when stale) and the install directory to
//! decide which [`ArchiveReference`] that is and where its bytes come from.

use std::path::{Path, PathBuf};

use semver::Version;
use tracing::{debug, warn};

use crate::archive::{ArchiveReference, DownloadedArchive, InstalledBundle};
use crate::catalog::{find_version, Catalog};
use crate::error::{InstallError, InstallResult};
use crate::files::FileSystem;
use crate::version::{parse_version_marker, parse_xcode_version, VersionExt};

/// Marker file naming the version a project wants.
pub const VERSION_MARKER_FILE: &str = ".xcode-version";

/// What to install or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallationRequest {
    /// A version string such as `11.2` or `12.0 Beta 3`.
    Version(String),
    /// An archive on disk, or the directory to download into when only
    /// downloading.
    Path {
        path: PathBuf,
        version: Option<String>,
    },
    /// The newest release.
    Latest,
    /// The newest dated prerelease.
    LatestPrerelease,
}

impl InstallationRequest {
    pub fn is_path(&self) -> bool {
        matches!(self, Self::Path { .. })
    }
}

/// Where the bytes of a resolved archive come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Already on disk; used in place.
    Local(PathBuf),
    /// Needs downloading into this directory.
    Download { directory: PathBuf },
}

/// A request pinned to one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub archive: ArchiveReference,
    pub source: ArchiveSource,
}

impl Resolution {
    /// Where the archive is, or will be once downloaded.
    pub fn archive_path(&self) -> PathBuf {
        match &self.source {
            ArchiveSource::Local(path) => path.clone(),
            ArchiveSource::Download { directory } => self.archive.expected_path(directory),
        }
    }
}

/// Resolves requests against the catalog and the install directory.
pub struct VersionResolver<'a> {
    catalog: &'a dyn Catalog,
    files: &'a dyn FileSystem,
    install_dir: &'a Path,
    archive_dir: &'a Path,
    working_dir: &'a Path,
}

impl<'a> VersionResolver<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        files: &'a dyn FileSystem,
        install_dir: &'a Path,
        archive_dir: &'a Path,
        working_dir: &'a Path,
    ) -> Self {
        Self {
            catalog,
            files,
            install_dir,
            archive_dir,
            working_dir,
        }
    }

    /// Pin `request` to one archive.
    ///
    /// When installing, versions that are already installed are rejected
    /// with [`InstallError::AlreadyInstalled`] before anything else happens.
    pub fn resolve(&self, request: &InstallationRequest, should_install: bool) -> InstallResult<Resolution> {
        match request {
            InstallationRequest::Version(input) => {
                let version = self.parse_version(input)?;
                if should_install {
                    self.ensure_not_installed(&version)?;
                }
                let archive = self.lookup(&version)?;
                Ok(self.download_into(archive, self.archive_dir))
            }
            InstallationRequest::Latest | InstallationRequest::LatestPrerelease => {
                let archive = self.latest(matches!(request, InstallationRequest::LatestPrerelease))?;
                if should_install {
                    self.ensure_not_installed(&archive.version)?;
                }
                Ok(self.download_into(archive, self.archive_dir))
            }
            InstallationRequest::Path { path, version } if should_install => {
                let version = match version {
                    Some(input) => self.parse_version(input)?,
                    None => DownloadedArchive::from_path(path)
                        .map(|archive| archive.version)
                        .or_else(|| self.marker_version())
                        .ok_or_else(|| InstallError::InvalidVersionString(path.display().to_string()))?,
                };
                Ok(Resolution {
                    archive: ArchiveReference::from_local_path(version, path),
                    source: ArchiveSource::Local(path.clone()),
                })
            }
            InstallationRequest::Path { path, version } => {
                let input = version.as_deref().unwrap_or_default();
                let version = self.parse_version(input)?;
                let archive = self.lookup(&version)?;
                Ok(self.download_into(archive, path))
            }
        }
    }

    fn download_into(&self, archive: ArchiveReference, directory: &Path) -> Resolution {
        Resolution {
            archive,
            source: ArchiveSource::Download {
                directory: directory.to_path_buf(),
            },
        }
    }

    /// Parse a version string, falling back to `.xcode-version` in the
    /// working directory.
    pub fn parse_version(&self, input: &str) -> InstallResult<Version> {
        if let Some(version) = parse_xcode_version(input) {
            return Ok(version);
        }

        self.marker_version()
            .ok_or_else(|| InstallError::InvalidVersionString(input.to_string()))
    }

    /// The version pinned by `.xcode-version` in the working directory.
    fn marker_version(&self) -> Option<Version> {
        let marker = self.working_dir.join(VERSION_MARKER_FILE);
        let version = parse_version_marker(&self.files.read_to_string(&marker).ok()?)?;
        debug!(path = %marker.display(), version = %version, "Using version from marker file");
        Some(version)
    }

    /// The catalog, refreshed first when it is stale.
    pub fn catalog_entries(&self) -> InstallResult<Vec<ArchiveReference>> {
        if self.catalog.should_refresh() {
            return Ok(self.catalog.refresh()?);
        }
        Ok(self.catalog.available())
    }

    /// Like [`catalog_entries`](Self::catalog_entries) but falls back to the
    /// stale list when refreshing fails.
    pub fn catalog_entries_lenient(&self) -> Vec<ArchiveReference> {
        self.catalog_entries().unwrap_or_else(|e| {
            warn!(error = %e, "Catalog refresh failed, using cached list");
            self.catalog.available()
        })
    }

    /// The catalog entry for `version`.
    pub fn lookup(&self, version: &Version) -> InstallResult<ArchiveReference> {
        let entries = self.catalog_entries()?;
        find_version(&entries, version)
            .cloned()
            .ok_or_else(|| InstallError::VersionUnavailable(version.clone()))
    }

    /// The newest release, or the newest dated prerelease.
    pub fn latest(&self, prerelease: bool) -> InstallResult<ArchiveReference> {
        let entries = self.catalog_entries()?;
        if prerelease {
            let mut dated: Vec<ArchiveReference> = entries
                .into_iter()
                .filter(|a| a.version.is_prerelease() && a.release_date.is_some())
                .collect();
            dated.sort_by_key(|a| a.release_date);
            dated.pop().ok_or(InstallError::NoPrereleaseVersionAvailable)
        } else {
            let mut releases: Vec<ArchiveReference> = entries
                .into_iter()
                .filter(|a| !a.version.is_prerelease())
                .collect();
            releases.sort_by(|a, b| a.version.cmp(&b.version));
            releases.pop().ok_or(InstallError::NoNonPrereleaseVersionAvailable)
        }
    }

    /// Every `Xcode*.app` in the install directory with readable metadata.
    pub fn installed_bundles(&self) -> Vec<InstalledBundle> {
        let Ok(children) = self.files.list_dir(self.install_dir) else {
            return Vec::new();
        };
        children
            .iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy())
                    .is_some_and(|name| name.starts_with("Xcode") && name.ends_with(".app"))
            })
            .filter_map(|path| {
                let bundle = InstalledBundle::load(self.files, path);
                if bundle.is_none() {
                    debug!(path = %path.display(), "Skipping bundle without readable metadata");
                }
                bundle
            })
            .collect()
    }

    /// The installed bundle matching `version`, build metadata ignored.
    pub fn installed(&self, version: &Version) -> Option<InstalledBundle> {
        self.installed_bundles()
            .into_iter()
            .find(|bundle| bundle.version.eq_ignoring_build(version))
    }

    /// Fail with [`InstallError::AlreadyInstalled`] when `version` is installed.
    pub fn ensure_not_installed(&self, version: &Version) -> InstallResult<()> {
        match self.installed(version) {
            Some(bundle) => Err(InstallError::AlreadyInstalled {
                version: bundle.version,
                path: bundle.path,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCatalog, FakeFileSystem};
    use chrono::NaiveDate;

    fn entry(version: &str, date: Option<(i32, u32, u32)>) -> ArchiveReference {
        ArchiveReference::new(
            Version::parse(version).unwrap(),
            format!("https://example.com/Xcode_{}.xip", version),
            format!("Xcode_{}.xip", version),
            date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        )
    }

    fn catalog() -> FakeCatalog {
        FakeCatalog::new(vec![
            entry("11.1.0+11A1027", Some((2019, 10, 7))),
            entry("11.2.0+11B52", Some((2019, 11, 5))),
            entry("11.3.0-beta+11C24b", Some((2019, 11, 5))),
            entry("11.3.0-beta.2", None),
            entry("11.2.1+11B500", Some((2019, 11, 12))),
            entry("11.4.0-beta+11N111s", Some((2020, 2, 4))),
        ])
    }

    fn installed_bundle(files: &FakeFileSystem, name: &str, short_version: &str, build: &str) {
        let contents = Path::new("/Applications").join(name).join("Contents");
        files.add_file(
            contents.join("Info.plist"),
            format!("<dict><key>CFBundleShortVersionString</key><string>{}</string></dict>", short_version),
        );
        files.add_file(
            contents.join("version.plist"),
            format!("<dict><key>ProductBuildVersion</key><string>{}</string></dict>", build),
        );
    }

    fn resolver<'a>(catalog: &'a FakeCatalog, files: &'a FakeFileSystem) -> VersionResolver<'a> {
        VersionResolver::new(
            catalog,
            files,
            Path::new("/Applications"),
            Path::new("/archives"),
            Path::new("/project"),
        )
    }

    #[test]
    fn test_version_request_finds_entry_ignoring_build() {
        let catalog = catalog();
        let files = FakeFileSystem::new();

        let resolution = resolver(&catalog, &files)
            .resolve(&InstallationRequest::Version("11.2".to_string()), true)
            .unwrap();

        assert_eq!(resolution.archive.version, Version::parse("11.2.0+11B52").unwrap());
        assert_eq!(
            resolution.archive_path(),
            PathBuf::from("/archives/Xcode-11.2.0+11B52.xip")
        );
    }

    #[test]
    fn test_unknown_version_is_unavailable() {
        let catalog = catalog();
        let files = FakeFileSystem::new();

        let err = resolver(&catalog, &files)
            .resolve(&InstallationRequest::Version("10.0".to_string()), true)
            .unwrap_err();
        assert!(matches!(err, InstallError::VersionUnavailable(v) if v == Version::new(10, 0, 0)));
    }

    #[test]
    fn test_invalid_version_falls_back_to_marker_file() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        let resolver = resolver(&catalog, &files);

        assert!(matches!(
            resolver.parse_version("latest-ish"),
            Err(InstallError::InvalidVersionString(s)) if s == "latest-ish"
        ));

        files.add_file("/project/.xcode-version", "# pinned\n11.2.1\n");
        assert_eq!(resolver.parse_version("").unwrap(), Version::new(11, 2, 1));
    }

    #[test]
    fn test_already_installed_short_circuits() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        installed_bundle(&files, "Xcode-11.2.0.app", "11.2", "11B52");

        let err = resolver(&catalog, &files)
            .resolve(&InstallationRequest::Version("11.2".to_string()), true)
            .unwrap_err();
        match err {
            InstallError::AlreadyInstalled { version, path } => {
                assert_eq!(version, Version::parse("11.2.0+11B52").unwrap());
                assert_eq!(path, PathBuf::from("/Applications/Xcode-11.2.0.app"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_download_only_ignores_installed() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        installed_bundle(&files, "Xcode-11.2.0.app", "11.2", "11B52");

        assert!(resolver(&catalog, &files)
            .resolve(&InstallationRequest::Version("11.2".to_string()), false)
            .is_ok());
    }

    #[test]
    fn test_latest_release_sorts_by_version() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        let latest = resolver(&catalog, &files).latest(false).unwrap();
        assert_eq!(latest.version, Version::parse("11.2.1+11B500").unwrap());
    }

    #[test]
    fn test_latest_prerelease_requires_release_date() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        let latest = resolver(&catalog, &files).latest(true).unwrap();
        assert_eq!(latest.version, Version::parse("11.4.0-beta+11N111s").unwrap());

        let undated = FakeCatalog::new(vec![entry("11.3.0-beta.2", None), entry("11.2.0", None)]);
        assert!(matches!(
            resolver(&undated, &files).latest(true),
            Err(InstallError::NoPrereleaseVersionAvailable)
        ));
        let betas_only = FakeCatalog::new(vec![entry("11.3.0-beta.2", None)]);
        assert!(matches!(
            resolver(&betas_only, &files).latest(false),
            Err(InstallError::NoNonPrereleaseVersionAvailable)
        ));
    }

    #[test]
    fn test_stale_catalog_is_refreshed() {
        let catalog = catalog().stale();
        let files = FakeFileSystem::new();
        resolver(&catalog, &files).lookup(&Version::new(11, 2, 0)).unwrap();
        assert_eq!(catalog.refresh_count(), 1);
    }

    #[test]
    fn test_local_path_install_uses_archive_in_place() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        // Installed checks don't apply to explicit paths.
        installed_bundle(&files, "Xcode-11.2.0.app", "11.2", "11B52");

        let request = InstallationRequest::Path {
            path: PathBuf::from("/Downloads/Xcode_11.2.xip"),
            version: Some("11.2".to_string()),
        };
        let resolution = resolver(&catalog, &files).resolve(&request, true).unwrap();

        assert_eq!(
            resolution.source,
            ArchiveSource::Local(PathBuf::from("/Downloads/Xcode_11.2.xip"))
        );
        assert_eq!(resolution.archive_path(), PathBuf::from("/Downloads/Xcode_11.2.xip"));
        assert_eq!(catalog.refresh_count(), 0);
    }

    #[test]
    fn test_local_path_version_from_file_name() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        let request = InstallationRequest::Path {
            path: PathBuf::from("/Downloads/Xcode-11.2.1.xip"),
            version: None,
        };
        let resolution = resolver(&catalog, &files).resolve(&request, true).unwrap();
        assert_eq!(resolution.archive.version, Version::new(11, 2, 1));
    }

    #[test]
    fn test_local_path_with_apple_name_uses_marker_file() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        let request = InstallationRequest::Path {
            path: PathBuf::from("/Downloads/Xcode_11.2.xip"),
            version: None,
        };

        assert!(matches!(
            resolver(&catalog, &files).resolve(&request, true),
            Err(InstallError::InvalidVersionString(s)) if s == "/Downloads/Xcode_11.2.xip"
        ));

        files.add_file("/project/.xcode-version", "11.2\n");
        let resolution = resolver(&catalog, &files).resolve(&request, true).unwrap();
        assert_eq!(resolution.archive.version, Version::new(11, 2, 0));
        assert_eq!(resolution.archive_path(), PathBuf::from("/Downloads/Xcode_11.2.xip"));
    }

    #[test]
    fn test_download_only_path_is_destination_directory() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        let request = InstallationRequest::Path {
            path: PathBuf::from("/Volumes/External"),
            version: Some("11.2".to_string()),
        };

        let resolution = resolver(&catalog, &files).resolve(&request, false).unwrap();
        assert_eq!(
            resolution.archive_path(),
            PathBuf::from("/Volumes/External/Xcode-11.2.0+11B52.xip")
        );
    }

    #[test]
    fn test_installed_bundles_skip_unreadable() {
        let catalog = catalog();
        let files = FakeFileSystem::new();
        installed_bundle(&files, "Xcode-11.2.0.app", "11.2", "11B52");
        files.add_dir("/Applications/Xcode-broken.app");
        files.add_dir("/Applications/Safari.app");

        let bundles = resolver(&catalog, &files).installed_bundles();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].path, PathBuf::from("/Applications/Xcode-11.2.0.app"));
    }
}
