//! Transfer strategies.
//!
//! A strategy moves the bytes of one archive to its destination for a
//! single attempt. Retry, resume persistence and progress plumbing are the
//! orchestrator's job.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::progress::TransferProgress;
use super::state::{DownloadTask, ResumeToken};

/// A single failed transfer attempt.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct TransferError {
    /// Human readable cause.
    pub reason: String,
    /// State to continue from, when the failure left usable partial bytes.
    pub resume: Option<ResumeToken>,
}

impl TransferError {
    /// A failure that has to start over.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            resume: None,
        }
    }

    /// A failure the next attempt can continue from.
    pub fn resumable(reason: impl Into<String>, token: ResumeToken) -> Self {
        Self {
            reason: reason.into(),
            resume: Some(token),
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.resume.is_some()
    }
}

/// Moves one archive over the network.
pub trait TransferStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run one attempt, reporting progress through `progress`.
    ///
    /// On success the archive is complete at `task.destination` and that
    /// path is returned.
    fn transfer(
        &self,
        task: &DownloadTask,
        progress: &dyn Fn(TransferProgress),
    ) -> Result<PathBuf, TransferError>;

    /// A file whose presence beside `destination` means the destination is
    /// incomplete.
    fn incomplete_marker(&self, _destination: &Path) -> Option<PathBuf> {
        None
    }
}
