//! Download orchestration.
//!
//! [`ArchiveDownloader`] owns everything around a single transfer attempt:
//! the already-downloaded short circuit, the per-process in-flight guard,
//! bounded retry, resume side file bookkeeping and moving progress from the
//! transfer thread to the caller.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread;

use dashmap::DashSet;
use semver::Version;
use tracing::{debug, info, warn};

use super::progress::TransferProgress;
use super::retry::{attempt_resumable, DEFAULT_MAX_ATTEMPTS};
use super::state::{DownloadTask, ResumeStore};
use super::strategy::TransferStrategy;
use crate::archive::{aria2_marker_path, ArchiveReference};
use crate::error::{InstallError, InstallResult};
use crate::files::FileSystem;

/// How a download request was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A complete archive was already at the destination.
    Existing(PathBuf),
    /// The archive was transferred.
    Downloaded(PathBuf),
}

impl DownloadOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Existing(path) | Self::Downloaded(path) => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Self::Existing(path) | Self::Downloaded(path) => path,
        }
    }
}

/// Versions currently being downloaded in this process.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    versions: Arc<DashSet<Version>>,
}

impl InFlightRegistry {
    /// The process-wide registry.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<InFlightRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::default).clone()
    }

    /// Claim `version`, failing when another download holds it.
    pub fn acquire(&self, version: &Version) -> InstallResult<InFlightGuard> {
        if !self.versions.insert(version.clone()) {
            return Err(InstallError::DownloadInProgress(version.clone()));
        }
        Ok(InFlightGuard {
            versions: Arc::clone(&self.versions),
            version: version.clone(),
        })
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.versions.contains(version)
    }
}

/// Releases an in-flight claim when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    versions: Arc<DashSet<Version>>,
    version: Version,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.versions.remove(&self.version);
    }
}

/// Downloads one archive at a time with retry and resume.
pub struct ArchiveDownloader {
    strategy: Arc<dyn TransferStrategy>,
    files: Arc<dyn FileSystem>,
    registry: InFlightRegistry,
    max_attempts: usize,
}

impl ArchiveDownloader {
    /// Create a downloader using the process-wide in-flight registry.
    pub fn new(strategy: Arc<dyn TransferStrategy>, files: Arc<dyn FileSystem>) -> Self {
        Self {
            strategy,
            files,
            registry: InFlightRegistry::global(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_registry(mut self, registry: InFlightRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether `destination` holds a complete archive.
    ///
    /// An accelerator marker beside it means a previous accelerated transfer
    /// was interrupted, whichever strategy is active now.
    pub fn is_downloaded(&self, destination: &Path) -> bool {
        if !self.files.exists(destination) {
            return false;
        }
        let marker = self
            .strategy
            .incomplete_marker(destination)
            .unwrap_or_else(|| aria2_marker_path(destination));
        !self.files.exists(&marker)
    }

    /// Fetch `archive` to `destination`.
    ///
    /// `on_progress` runs on the calling thread while the transfer runs on a
    /// background thread; updates cross an unbounded channel so a slow
    /// observer never stalls the transfer.
    pub fn download(
        &self,
        archive: &ArchiveReference,
        destination: &Path,
        cookie_header: Option<String>,
        on_progress: &mut dyn FnMut(&TransferProgress),
    ) -> InstallResult<DownloadOutcome> {
        if self.is_downloaded(destination) {
            info!(path = %destination.display(), "Found existing archive");
            return Ok(DownloadOutcome::Existing(destination.to_path_buf()));
        }

        let _guard = self.registry.acquire(&archive.version)?;

        if let Some(parent) = destination.parent() {
            self.files
                .create_dir_all(parent)
                .map_err(|e| InstallError::io("Failed to create directory", parent, e))?;
        }

        let task = DownloadTask::new(archive.clone(), destination).with_cookie_header(cookie_header);
        let (sender, receiver) = mpsc::channel::<TransferProgress>();

        let result = thread::scope(|scope| {
            let worker = scope.spawn(move || {
                let report = move |progress: TransferProgress| {
                    // The foreground may have stopped listening; progress is best effort.
                    let _ = sender.send(progress);
                };
                self.run_attempts(task, &report)
            });

            for progress in receiver {
                on_progress(&progress);
            }

            worker
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        });

        result.map(DownloadOutcome::Downloaded)
    }

    /// The retry loop with resume side file bookkeeping after every attempt.
    fn run_attempts(
        &self,
        task: DownloadTask,
        report: &dyn Fn(TransferProgress),
    ) -> InstallResult<PathBuf> {
        let store = ResumeStore::new(self.files.as_ref(), &task.destination);
        let persisted = store.load();
        if persisted.is_some() {
            debug!(path = %store.path().display(), "Loaded resume data");
        }

        let strategy = self.strategy.as_ref();
        let path = attempt_resumable(self.max_attempts, persisted, |attempt, resume| {
            let attempt_task = task
                .clone()
                .with_attempt(attempt)
                .with_resume_token(resume);
            let outcome = strategy.transfer(&attempt_task, report);

            let stored = match &outcome {
                Ok(_) => store.clear(),
                Err(error) => match &error.resume {
                    Some(token) => store.persist(token),
                    None => store.clear(),
                },
            };
            if let Err(e) = stored {
                warn!(error = %e, "Failed to update resume data");
            }
            outcome
        })?;

        info!(
            path = %path.display(),
            strategy = strategy.name(),
            "Download complete"
        );
        Ok(path)
    }
}
