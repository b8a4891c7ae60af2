//! Archive and bundle identity types.
//!
//! [`ArchiveReference`] is what the catalog offers, [`DownloadedArchive`] is an
//! archive sitting on disk and [`InstalledBundle`] is an expanded Xcode in the
//! install directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};

use crate::files::FileSystem;
use crate::version::{parse_xcode_version, VersionExt, XCODE_FILE_PREFIX};

/// Suffix of the accelerator's incomplete-download marker file.
pub const ARIA2_MARKER_SUFFIX: &str = ".aria2";

/// One downloadable archive listed by the catalog.
///
/// Two references are equal when their versions are equal; URL and file name
/// are descriptive only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveReference {
    /// Version including prerelease and build metadata.
    pub version: Version,
    /// Where the archive is downloaded from.
    pub url: String,
    /// Remote file name, e.g. `Xcode_11.2.xip`.
    pub filename: String,
    /// Release date, when the catalog knows it.
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
}

impl ArchiveReference {
    /// Create a new archive reference.
    pub fn new(
        version: Version,
        url: impl Into<String>,
        filename: impl Into<String>,
        release_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            version,
            url: url.into(),
            filename: filename.into(),
            release_date,
        }
    }

    /// Build a reference for an archive the user already has on disk.
    pub fn from_local_path(version: Version, path: &Path) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(version, path.display().to_string(), filename, None)
    }

    /// The archive file extension taken from the remote file name.
    pub fn extension(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("xip")
    }

    /// Canonical local file name: `Xcode-<version>.<ext>`.
    pub fn local_file_name(&self) -> String {
        format!("{}{}.{}", XCODE_FILE_PREFIX, self.version, self.extension())
    }

    /// Canonical location of this archive inside `archive_dir`.
    pub fn expected_path(&self, archive_dir: &Path) -> PathBuf {
        archive_dir.join(self.local_file_name())
    }
}

impl PartialEq for ArchiveReference {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for ArchiveReference {}

impl fmt::Display for ArchiveReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xcode {}", self.version.xcode_description())
    }
}

/// Path of the accelerator marker that sits beside `destination`.
pub fn aria2_marker_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(ARIA2_MARKER_SUFFIX);
    destination.with_file_name(name)
}

/// An archive present in the archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArchive {
    /// Location of the archive.
    pub path: PathBuf,
    /// Version recovered from the file name.
    pub version: Version,
}

impl DownloadedArchive {
    /// Recover the version from a file name like `Xcode-11.2.0+11B52.xip`.
    ///
    /// A trailing `.aria2` marker suffix is tolerated so half-finished
    /// accelerated downloads are listed as well.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let name = name
            .strip_suffix(ARIA2_MARKER_SUFFIX)
            .unwrap_or(&name)
            .to_string();
        let stem = name
            .strip_suffix(".xip")
            .or_else(|| name.strip_suffix(".dmg"))?;
        let raw = stem.strip_prefix(XCODE_FILE_PREFIX).unwrap_or(stem);
        let version = parse_xcode_version(raw)?;
        Some(Self {
            path: path.to_path_buf(),
            version,
        })
    }
}

/// An expanded Xcode bundle in the install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBundle {
    /// Location of the `.app` bundle.
    pub path: PathBuf,
    /// Short version from `Info.plist` with the build number from
    /// `version.plist` folded in as build metadata.
    pub version: Version,
}

impl InstalledBundle {
    /// Create a bundle from known values.
    pub fn new(path: impl Into<PathBuf>, version: Version) -> Self {
        Self {
            path: path.into(),
            version,
        }
    }

    /// Read an installed bundle's identity from its property lists.
    ///
    /// Returns `None` when the bundle metadata is missing or unreadable.
    pub fn load(files: &dyn FileSystem, path: &Path) -> Option<Self> {
        let contents = path.join("Contents");
        let info = files.read_to_string(&contents.join("Info.plist")).ok()?;
        let version_plist = files.read_to_string(&contents.join("version.plist")).ok()?;

        let short_version = plist_string(&info, "CFBundleShortVersionString")?;
        let bundle_version = parse_xcode_version(&short_version)?;
        let build = plist_string(&version_plist, "ProductBuildVersion");

        // Installed betas don't carry the beta number in Info.plist; take it
        // from the bundle name when that parses, else fall back to "beta".
        let mut pre = bundle_version.pre.clone();
        let from_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .and_then(|stem| {
                stem.strip_prefix(XCODE_FILE_PREFIX)
                    .and_then(|raw| Version::parse(raw).ok())
            });
        if let Some(name_version) = from_name {
            pre = name_version.pre;
        } else if plist_string(&info, "CFBundleIconName").as_deref() == Some("XcodeBeta")
            && !pre.as_str().split('.').any(|id| id == "beta")
        {
            pre = Prerelease::new("beta").ok()?;
        }

        let mut version = Version::new(
            bundle_version.major,
            bundle_version.minor,
            bundle_version.patch,
        );
        version.pre = pre;
        if let Some(build) = build {
            version.build = BuildMetadata::new(&build).ok()?;
        }

        Some(Self {
            path: path.to_path_buf(),
            version,
        })
    }
}

impl fmt::Display for InstalledBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Xcode {} at {}",
            self.version.xcode_description(),
            self.path.display()
        )
    }
}

/// Extract a `<key>K</key><string>V</string>` value from an XML property list.
pub fn plist_string(plist: &str, key: &str) -> Option<String> {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    let entry = ENTRY.get_or_init(|| {
        Regex::new(r"<key>\s*(?P<key>[^<]+?)\s*</key>\s*<string>(?P<value>[^<]*)</string>")
            .expect("plist entry grammar is valid")
    });

    entry
        .captures_iter(plist)
        .find(|caps| &caps["key"] == key)
        .map(|caps| caps["value"].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFileSystem;

    fn info_plist(short_version: &str, icon: Option<&str>) -> String {
        let icon = icon
            .map(|name| format!("<key>CFBundleIconName</key>\n<string>{}</string>\n", name))
            .unwrap_or_default();
        format!(
            "<?xml version=\"1.0\"?>\n<plist version=\"1.0\">\n<dict>\n\
             <key>CFBundleIdentifier</key>\n<string>com.apple.dt.Xcode</string>\n\
             {}<key>CFBundleShortVersionString</key>\n<string>{}</string>\n</dict>\n</plist>",
            icon, short_version
        )
    }

    fn version_plist(build: &str) -> String {
        format!(
            "<plist version=\"1.0\"><dict><key>ProductBuildVersion</key><string>{}</string></dict></plist>",
            build
        )
    }

    #[test]
    fn test_archive_reference_identity_is_version() {
        let a = ArchiveReference::new(
            Version::parse("11.2.0").unwrap(),
            "https://a/Xcode_11.2.xip",
            "Xcode_11.2.xip",
            None,
        );
        let b = ArchiveReference::new(
            Version::parse("11.2.0").unwrap(),
            "https://mirror/other.xip",
            "other.xip",
            NaiveDate::from_ymd_opt(2019, 11, 5),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_expected_path_uses_version_and_extension() {
        let archive = ArchiveReference::new(
            Version::parse("11.2.0+11B52").unwrap(),
            "https://a/Xcode_11.2.xip",
            "Xcode_11.2.xip",
            None,
        );
        assert_eq!(
            archive.expected_path(Path::new("/archives")),
            PathBuf::from("/archives/Xcode-11.2.0+11B52.xip")
        );
    }

    #[test]
    fn test_aria2_marker_path() {
        assert_eq!(
            aria2_marker_path(Path::new("/archives/Xcode-11.2.0.xip")),
            PathBuf::from("/archives/Xcode-11.2.0.xip.aria2")
        );
    }

    #[test]
    fn test_downloaded_archive_from_path() {
        let archive = DownloadedArchive::from_path(Path::new("/a/Xcode-11.2.0+11B52.xip")).unwrap();
        assert_eq!(archive.version, Version::parse("11.2.0+11B52").unwrap());

        let partial = DownloadedArchive::from_path(Path::new("/a/Xcode-12.0.0.xip.aria2")).unwrap();
        assert_eq!(partial.version, Version::parse("12.0.0").unwrap());

        assert!(DownloadedArchive::from_path(Path::new("/a/notes.txt")).is_none());
    }

    #[test]
    fn test_plist_string() {
        let plist = info_plist("11.2", None);
        assert_eq!(
            plist_string(&plist, "CFBundleShortVersionString").as_deref(),
            Some("11.2")
        );
        assert_eq!(plist_string(&plist, "Missing"), None);
    }

    #[test]
    fn test_installed_bundle_folds_build_metadata() {
        let files = FakeFileSystem::new();
        let path = Path::new("/Applications/Xcode-11.2.0.app");
        files.add_file(path.join("Contents/Info.plist"), info_plist("11.2", None));
        files.add_file(path.join("Contents/version.plist"), version_plist("11B52"));

        let bundle = InstalledBundle::load(&files, path).unwrap();
        assert_eq!(bundle.version, Version::parse("11.2.0+11B52").unwrap());
    }

    #[test]
    fn test_installed_beta_takes_prerelease_from_name() {
        let files = FakeFileSystem::new();
        let path = Path::new("/Applications/Xcode-12.0.0-beta.3.app");
        files.add_file(path.join("Contents/Info.plist"), info_plist("12.0", Some("XcodeBeta")));
        files.add_file(path.join("Contents/version.plist"), version_plist("12A8169g"));

        let bundle = InstalledBundle::load(&files, path).unwrap();
        assert_eq!(bundle.version, Version::parse("12.0.0-beta.3+12A8169g").unwrap());
    }

    #[test]
    fn test_installed_beta_without_name_falls_back_to_beta() {
        let files = FakeFileSystem::new();
        let path = Path::new("/Applications/Xcode-beta.app");
        files.add_file(path.join("Contents/Info.plist"), info_plist("12.0", Some("XcodeBeta")));
        files.add_file(path.join("Contents/version.plist"), version_plist("12A8169g"));

        let bundle = InstalledBundle::load(&files, path).unwrap();
        assert_eq!(bundle.version, Version::parse("12.0.0-beta+12A8169g").unwrap());
    }

    #[test]
    fn test_installed_bundle_missing_metadata() {
        let files = FakeFileSystem::new();
        assert!(InstalledBundle::load(&files, Path::new("/Applications/Xcode.app")).is_none());
    }
}
