//! The installation pipeline.
//!
//! This module orchestrates the full installation workflow:
//! 1. Resolve the request to one archive and download it
//! 2. Expand the archive
//! 3. Move the expanded bundle to the install directory
//! 4. Move the archive to the Trash
//! 5. Check the Gatekeeper assessment and code signature
//! 6. Run the privileged finishing steps
//!
//! Steps run strictly in order and each one is gated on the previous one.
//! Nothing is rolled back: a bundle that was moved into place stays there
//! even when a later step fails.

mod privilege;
mod steps;
mod unarchive;

pub use privilege::{
    install_check_path, obtain_credential, Credential, NoPrompt, PasswordPrompt, PostInstall,
    PASSWORD_PROMPT,
};
pub use steps::{InstallationStep, StepProgress, StepSequence};
pub use unarchive::{XipUnarchiver, EXPANDED_BUNDLE_NAMES, XIP_PATH};

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use semver::Version;
use tracing::{info, warn};

use crate::archive::{aria2_marker_path, ArchiveReference, DownloadedArchive, InstalledBundle};
use crate::config::InstallerConfig;
use crate::download::{resume_data_path, ArchiveDownloader, InFlightRegistry};
use crate::environment::Environment;
use crate::error::{InstallError, InstallResult};
use crate::resolver::{ArchiveSource, InstallationRequest, Resolution, VersionResolver};
use crate::security::SecurityVerifier;
use crate::version::VersionExt;

/// What [`Installer::install`] ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The archive was installed.
    Installed(InstalledBundle),
    /// Only downloading was asked for; the archive is here.
    Downloaded(PathBuf),
}

/// One row of [`Installer::available_versions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableVersion {
    pub version: Version,
    pub release_date: Option<NaiveDate>,
    /// Where it is installed, if it is.
    pub installed_path: Option<PathBuf>,
}

impl AvailableVersion {
    pub fn is_installed(&self) -> bool {
        self.installed_path.is_some()
    }
}

/// Downloads, installs and removes Xcode versions.
pub struct Installer {
    config: InstallerConfig,
    env: Environment,
    registry: InFlightRegistry,
    working_dir: PathBuf,
}

impl Installer {
    /// Create an installer running against `env`.
    pub fn new(config: InstallerConfig, env: Environment) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            config,
            env,
            registry: InFlightRegistry::global(),
            working_dir,
        }
    }

    /// Track in-flight downloads in `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: InFlightRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Directory searched for a `.xcode-version` file.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    fn resolver(&self) -> VersionResolver<'_> {
        VersionResolver::new(
            self.env.catalog.as_ref(),
            self.env.files.as_ref(),
            &self.config.install_dir,
            &self.config.archive_dir,
            &self.working_dir,
        )
    }

    fn downloader(&self) -> ArchiveDownloader {
        ArchiveDownloader::new(self.env.transfer.clone(), self.env.files.clone())
            .with_max_attempts(self.config.max_attempts)
            .with_registry(self.registry.clone())
    }

    fn status(&self, label: &str, message: &str) {
        if label.is_empty() {
            self.env.output.status(message);
        } else {
            self.env.output.status(&format!("{} {}", label, message));
        }
    }

    /// Install (or only download) what `request` names.
    ///
    /// A freshly downloaded archive that turns out to be damaged is deleted
    /// and downloaded once more. An archive the user pointed at is never
    /// deleted.
    pub fn install(&self, request: &InstallationRequest, should_install: bool) -> InstallResult<InstallOutcome> {
        let mut attempt = 1;
        loop {
            let mut progress = StepProgress::new(StepSequence::for_mode(should_install));
            let resolution = self.resolver().resolve(request, should_install)?;
            let archive_path = self.acquire(&resolution, should_install, &mut progress)?;

            if !should_install {
                self.env.output.status(&format!(
                    "{} has been downloaded to {}",
                    resolution.archive,
                    archive_path.display()
                ));
                return Ok(InstallOutcome::Downloaded(archive_path));
            }

            match self.install_archive(&resolution.archive, &archive_path, &mut progress) {
                Ok(bundle) => {
                    self.env.output.status(&format!(
                        "Xcode {} has been installed to {}",
                        bundle.version.xcode_description(),
                        bundle.path.display()
                    ));
                    return Ok(InstallOutcome::Installed(bundle));
                }
                Err(e) if e.is_damaged_archive() && attempt == 1 && !request.is_path() => {
                    warn!(error = %e, path = %archive_path.display(), "Damaged archive, downloading again");
                    self.env.output.status(&e.to_string());
                    self.env
                        .output
                        .status("Removing damaged XIP and re-attempting installation.");
                    self.env
                        .files
                        .remove(&archive_path)
                        .map_err(|source| InstallError::io("Failed to remove", &archive_path, source))?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve `request` and make sure its archive is on disk.
    ///
    /// Returns the archive path; nothing is downloaded for a local archive.
    pub fn resolve_and_download(&self, request: &InstallationRequest, should_install: bool) -> InstallResult<PathBuf> {
        let mut progress = StepProgress::new(StepSequence::for_mode(should_install));
        let resolution = self.resolver().resolve(request, should_install)?;
        self.acquire(&resolution, should_install, &mut progress)
    }

    fn acquire(
        &self,
        resolution: &Resolution,
        should_install: bool,
        progress: &mut StepProgress,
    ) -> InstallResult<PathBuf> {
        let label = progress.enter(InstallationStep::Downloading);
        let destination = resolution.archive_path();

        if let ArchiveSource::Local(path) = &resolution.source {
            info!(path = %path.display(), "Using local archive");
            return Ok(path.clone());
        }

        let downloader = self.downloader();
        if downloader.is_downloaded(&destination) {
            let message = if should_install {
                format!(
                    "Found existing archive that will be used for installation at {}.",
                    destination.display()
                )
            } else {
                format!("Found existing archive at {}.", destination.display())
            };
            self.status(&label, &message);
            return Ok(destination);
        }

        self.env.session.validate()?;
        let archive = &resolution.archive;
        let cookie = self.env.session.cookies_for(&archive.url);
        let transfer_label = format!("{} Downloading {}", label, archive);

        info!(
            version = %archive.version,
            destination = %destination.display(),
            strategy = downloader.strategy_name(),
            "Downloading archive"
        );
        let output = self.env.output.clone();
        let result = downloader.download(archive, &destination, cookie, &mut |update| {
            output.transfer(&transfer_label, update);
        });
        output.transfer_finished();

        Ok(result?.into_path())
    }

    /// Run every step after downloading for an archive already on disk.
    pub fn install_from_archive(&self, archive: &ArchiveReference, path: &Path) -> InstallResult<InstalledBundle> {
        let mut progress = StepProgress::after(StepSequence::full(), InstallationStep::Downloading);
        self.install_archive(archive, path, &mut progress)
    }

    fn install_archive(
        &self,
        archive: &ArchiveReference,
        path: &Path,
        progress: &mut StepProgress,
    ) -> InstallResult<InstalledBundle> {
        let runner = self.env.runner.as_ref();
        let files = self.env.files.as_ref();
        let unarchiver = XipUnarchiver::new(runner, files);

        let label = progress.enter(InstallationStep::Unarchiving);
        XipUnarchiver::check_format(path)?;
        self.status(&label, "Unarchiving Xcode (This can take a while)");
        let expanded = unarchiver.expand(path)?;

        let label = progress.enter(InstallationStep::Moving);
        let destination = self.config.install_path_for(&archive.version);
        self.status(&label, &format!("Moving Xcode to {}", destination.display()));
        let bundle = unarchiver.relocate(&expanded, &destination)?;

        let label = progress.enter(InstallationStep::TrashingArchive);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.status(&label, &format!("Moving Xcode archive {} to the Trash", name));
        files
            .trash(path)
            .map_err(|e| InstallError::io("Failed to move archive to the Trash", path, e))?;

        let label = progress.enter(InstallationStep::CheckingSecurity);
        self.status(&label, "Checking security assessment and code signing");
        self.verify_security(&bundle)?;

        let label = progress.enter(InstallationStep::Finishing);
        self.status(&label, "Finishing installation");
        let credential = obtain_credential(runner, self.env.prompt.as_ref())?;
        PostInstall::new(runner, files).finish(&bundle, &credential)?;

        Ok(bundle)
    }

    /// Gatekeeper assessment and signing identity check for `bundle`.
    pub fn verify_security(&self, bundle: &InstalledBundle) -> InstallResult<()> {
        SecurityVerifier::new(self.env.runner.as_ref()).verify(bundle)
    }

    /// Installed bundles, sorted by version.
    pub fn installed_bundles(&self) -> Vec<InstalledBundle> {
        let mut bundles = self.resolver().installed_bundles();
        bundles.sort_by(|a, b| a.version.cmp(&b.version));
        bundles
    }

    /// Move the installed bundle for `version` to the Trash.
    pub fn uninstall(&self, version: &str) -> InstallResult<InstalledBundle> {
        let resolver = self.resolver();
        let version = resolver.parse_version(version)?;
        let bundle = resolver
            .installed(&version)
            .ok_or(InstallError::VersionNotInstalled(version))?;

        let trashed = self
            .env
            .files
            .trash(&bundle.path)
            .map_err(|e| InstallError::io("Failed to move Xcode to the Trash", &bundle.path, e))?;
        info!(path = %bundle.path.display(), trashed = %trashed.display(), "Uninstalled");
        self.env.output.status(&format!(
            "Xcode {} moved to Trash: {}",
            bundle.version.xcode_description(),
            trashed.display()
        ));
        Ok(bundle)
    }

    /// Archives in the archive directory, sorted by version.
    pub fn downloaded_archives(&self) -> Vec<DownloadedArchive> {
        self.downloaded_archives_in(&self.config.archive_dir)
    }

    /// Archives in `directory`, sorted by version.
    pub fn downloaded_archives_in(&self, directory: &Path) -> Vec<DownloadedArchive> {
        let mut archives: Vec<DownloadedArchive> = self
            .env
            .files
            .list_dir(directory)
            .unwrap_or_default()
            .iter()
            .filter_map(|path| DownloadedArchive::from_path(path))
            .collect();
        archives.sort_by(|a, b| a.version.cmp(&b.version));
        archives
    }

    /// Move the downloaded archive for `version` to the Trash, along with
    /// any leftover resume state.
    pub fn remove_downloaded(&self, version: &str, directory: Option<&Path>) -> InstallResult<PathBuf> {
        let directory = directory.unwrap_or(&self.config.archive_dir);
        let archives = self.downloaded_archives_in(directory);
        if archives.is_empty() {
            return Err(InstallError::NoDownloadedArchives);
        }

        let missing = || InstallError::MissingArchive {
            version: version.to_string(),
            candidates: archives.iter().map(|a| a.path.display().to_string()).collect(),
        };
        let requested = self.resolver().parse_version(version).map_err(|_| missing())?;
        let found = archives
            .iter()
            .find(|a| a.version.eq_ignoring_build(&requested))
            .ok_or_else(missing)?;

        let files = self.env.files.as_ref();
        let trashed = files
            .trash(&found.path)
            .map_err(|e| InstallError::io("Failed to move archive to the Trash", &found.path, e))?;
        for leftover in [aria2_marker_path(&found.path), resume_data_path(&found.path)] {
            if files.exists(&leftover) {
                if let Err(e) = files.remove(&leftover) {
                    warn!(path = %leftover.display(), error = %e, "Failed to remove leftover download state");
                }
            }
        }
        self.env.output.status(&format!(
            "Xcode {} archive moved to Trash: {}",
            found.version.xcode_description(),
            trashed.display()
        ));
        Ok(found.path.clone())
    }

    /// Every known version, from the catalog and the install directory.
    ///
    /// A failing catalog refresh falls back to the cached list.
    pub fn available_versions(&self) -> Vec<AvailableVersion> {
        let resolver = self.resolver();
        let installed = resolver.installed_bundles();

        let mut versions: Vec<AvailableVersion> = resolver
            .catalog_entries_lenient()
            .into_iter()
            .map(|archive| AvailableVersion {
                installed_path: installed
                    .iter()
                    .find(|b| b.version.eq_ignoring_build(&archive.version))
                    .map(|b| b.path.clone()),
                version: archive.version,
                release_date: archive.release_date,
            })
            .collect();

        for bundle in installed {
            if !versions.iter().any(|v| v.version.eq_ignoring_build(&bundle.version)) {
                versions.push(AvailableVersion {
                    version: bundle.version,
                    release_date: None,
                    installed_path: Some(bundle.path),
                });
            }
        }

        versions.sort_by(|a, b| a.version.cmp(&b.version));
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use crate::files::FileSystem;
    use crate::testing::{
        FakeCatalog, FakeFileSystem, FakePrompt, FakeRunner, FakeSession, RecordingSink,
        ScriptedTransfer,
    };
    use std::sync::Arc;

    struct Harness {
        files: Arc<FakeFileSystem>,
        runner: Arc<FakeRunner>,
        transfer: Arc<ScriptedTransfer>,
        sink: Arc<RecordingSink>,
        installer: Installer,
    }

    fn entry(version: &str) -> ArchiveReference {
        ArchiveReference::new(
            Version::parse(version).unwrap(),
            format!("https://download.example.com/Xcode_{}.xip", version),
            format!("Xcode_{}.xip", version),
            None,
        )
    }

    fn add_bundle(files: &FakeFileSystem, path: &Path, short_version: &str, build: &str) {
        let contents = path.join("Contents");
        files.add_file(
            contents.join("Info.plist"),
            format!("<dict><key>CFBundleShortVersionString</key><string>{}</string></dict>", short_version),
        );
        files.add_file(
            contents.join("version.plist"),
            format!("<dict><key>ProductBuildVersion</key><string>{}</string></dict>", build),
        );
    }

    fn harness(session: FakeSession) -> Harness {
        let files = Arc::new(FakeFileSystem::new());
        let runner = Arc::new(FakeRunner::new());
        let transfer = Arc::new(ScriptedTransfer::succeeding(files.clone()));
        let sink = Arc::new(RecordingSink::new());
        let catalog = Arc::new(FakeCatalog::new(vec![entry("11.1.0+11A1027"), entry("11.2.0+11B52")]));

        let env = Environment::new(
            Arc::new(session),
            catalog,
            runner.clone(),
            files.clone(),
            transfer.clone(),
        )
        .with_output(sink.clone())
        .with_prompt(Arc::new(FakePrompt::with_password("hunter2")));
        let config = InstallerConfig::new(PathBuf::from("/Applications"), PathBuf::from("/archives"));
        let installer = Installer::new(config, env)
            .with_registry(InFlightRegistry::default())
            .with_working_dir("/project");

        Harness {
            files,
            runner,
            transfer,
            sink,
            installer,
        }
    }

    #[test]
    fn test_download_only_reports_one_step() {
        let h = harness(FakeSession::signed_in("cookie"));

        let outcome = h
            .installer
            .install(&InstallationRequest::Version("11.2".to_string()), false)
            .unwrap();

        let path = PathBuf::from("/archives/Xcode-11.2.0+11B52.xip");
        assert_eq!(outcome, InstallOutcome::Downloaded(path.clone()));
        assert!(h.files.exists(&path));
        assert!(h
            .sink
            .transfer_labels()
            .iter()
            .all(|label| label == "(1/1) Downloading Xcode 11.2 (11B52)"));
        assert_eq!(h.sink.finished_transfers(), 1);
        assert!(h.runner.commands().is_empty());
    }

    #[test]
    fn test_existing_archive_is_reused_without_session() {
        let h = harness(FakeSession::signed_out());
        h.files.add_file("/archives/Xcode-11.2.0+11B52.xip", "xip");

        let path = h
            .installer
            .resolve_and_download(&InstallationRequest::Version("11.2".to_string()), false)
            .unwrap();

        assert_eq!(path, PathBuf::from("/archives/Xcode-11.2.0+11B52.xip"));
        assert_eq!(h.transfer.calls(), 0);
        assert_eq!(
            h.sink.statuses(),
            vec!["(1/1) Found existing archive at /archives/Xcode-11.2.0+11B52.xip."]
        );
    }

    #[test]
    fn test_signed_out_session_blocks_download() {
        let h = harness(FakeSession::signed_out());

        let err = h
            .installer
            .install(&InstallationRequest::Version("11.2".to_string()), true)
            .unwrap_err();

        assert!(matches!(err, InstallError::MissingCredential));
        assert_eq!(h.transfer.calls(), 0);
    }

    #[test]
    fn test_local_archive_is_never_deleted_when_damaged() {
        let h = harness(FakeSession::signed_in("cookie"));
        h.files.add_file("/Downloads/Xcode_11.2.xip", "xip");
        h.runner.respond(
            "xip --expand",
            ProcessOutput {
                code: 1,
                stdout: String::new(),
                stderr: "The archive is damaged and can’t be expanded.".to_string(),
            },
        );

        let request = InstallationRequest::Path {
            path: PathBuf::from("/Downloads/Xcode_11.2.xip"),
            version: Some("11.2".to_string()),
        };
        let err = h.installer.install(&request, true).unwrap_err();

        assert!(err.is_damaged_archive());
        assert!(h.files.exists(Path::new("/Downloads/Xcode_11.2.xip")));
        assert_eq!(h.runner.count("xip --expand"), 1);
        assert_eq!(h.transfer.calls(), 0);
    }

    #[test]
    fn test_security_failure_leaves_bundle_installed() {
        let h = harness(FakeSession::signed_in("cookie"));
        let files = h.files.clone();
        h.runner.respond_with("xip --expand", move |_| {
            add_bundle(&files, Path::new("/archives/Xcode.app"), "11.2", "11B52");
            ProcessOutput::default()
        });
        h.runner.respond(
            "codesign",
            ProcessOutput {
                code: 0,
                stdout: String::new(),
                stderr: "TeamIdentifier=SOMEONEELSE".to_string(),
            },
        );

        let err = h
            .installer
            .install(&InstallationRequest::Version("11.2".to_string()), true)
            .unwrap_err();

        assert!(matches!(err, InstallError::SigningMismatch { .. }));
        assert!(h.files.exists(Path::new("/Applications/Xcode-11.2.0.app")));
        assert_eq!(h.runner.count("sudo"), 0);
    }

    #[test]
    fn test_trash_failure_aborts_before_security() {
        let h = harness(FakeSession::signed_in("cookie"));
        let files = h.files.clone();
        h.runner.respond_with("xip --expand", move |_| {
            add_bundle(&files, Path::new("/archives/Xcode.app"), "11.2", "11B52");
            ProcessOutput::default()
        });
        h.files.fail_trash(true);

        let err = h
            .installer
            .install(&InstallationRequest::Version("11.2".to_string()), true)
            .unwrap_err();

        assert!(matches!(err, InstallError::Io { .. }));
        assert_eq!(h.runner.count("spctl"), 0);
    }

    #[test]
    fn test_unsupported_format_stops_before_expansion() {
        let h = harness(FakeSession::signed_in("cookie"));
        let archive = ArchiveReference::new(
            Version::new(11, 2, 0),
            "https://download.example.com/Xcode_11.2.dmg",
            "Xcode_11.2.dmg",
            None,
        );

        let err = h
            .installer
            .install_from_archive(&archive, Path::new("/archives/Xcode-11.2.0.dmg"))
            .unwrap_err();

        assert!(matches!(err, InstallError::UnsupportedArchiveFormat { .. }));
        assert!(h.runner.commands().is_empty());
        assert!(h.sink.statuses().is_empty());
    }

    #[test]
    fn test_uninstall_trashes_bundle() {
        let h = harness(FakeSession::signed_in("cookie"));
        add_bundle(&h.files, Path::new("/Applications/Xcode-11.2.0.app"), "11.2", "11B52");

        let bundle = h.installer.uninstall("11.2").unwrap();

        assert_eq!(bundle.path, PathBuf::from("/Applications/Xcode-11.2.0.app"));
        assert_eq!(h.files.trashed(), vec![bundle.path.clone()]);
        assert!(matches!(
            h.installer.uninstall("11.2"),
            Err(InstallError::VersionNotInstalled(_))
        ));
        assert!(matches!(
            h.installer.uninstall("eleven"),
            Err(InstallError::InvalidVersionString(_))
        ));
    }

    #[test]
    fn test_remove_downloaded() {
        let h = harness(FakeSession::signed_in("cookie"));
        assert!(matches!(
            h.installer.remove_downloaded("11.2", None),
            Err(InstallError::NoDownloadedArchives)
        ));

        h.files.add_file("/archives/Xcode-11.1.0+11A1027.xip", "xip");
        h.files.add_file("/archives/Xcode-11.2.0+11B52.xip", "xip");
        h.files.add_file("/archives/Xcode-11.2.0+11B52.resumedata", "{}");

        match h.installer.remove_downloaded("12.0", None) {
            Err(InstallError::MissingArchive { candidates, .. }) => {
                assert_eq!(
                    candidates,
                    vec![
                        "/archives/Xcode-11.1.0+11A1027.xip".to_string(),
                        "/archives/Xcode-11.2.0+11B52.xip".to_string(),
                    ]
                );
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let removed = h.installer.remove_downloaded("11.2", None).unwrap();
        assert_eq!(removed, PathBuf::from("/archives/Xcode-11.2.0+11B52.xip"));
        assert!(!h.files.exists(Path::new("/archives/Xcode-11.2.0+11B52.resumedata")));
        assert_eq!(h.installer.downloaded_archives().len(), 1);
    }

    #[test]
    fn test_available_versions_marks_installed() {
        let h = harness(FakeSession::signed_in("cookie"));
        add_bundle(&h.files, Path::new("/Applications/Xcode-11.2.0.app"), "11.2", "11B52");
        add_bundle(&h.files, Path::new("/Applications/Xcode-10.3.0.app"), "10.3", "10G8");

        let versions = h.installer.available_versions();
        let rows: Vec<(String, bool)> = versions
            .iter()
            .map(|v| (v.version.to_string(), v.is_installed()))
            .collect();

        assert_eq!(
            rows,
            vec![
                ("10.3.0+10G8".to_string(), true),
                ("11.1.0+11A1027".to_string(), false),
                ("11.2.0+11B52".to_string(), true),
            ]
        );
    }
}
