//! User-facing output collaborator.

use tracing::{debug, info};

use crate::download::TransferProgress;

/// Receives human-readable pipeline output.
pub trait OutputSink: Send + Sync {
    /// A status line such as `(2/6) Unarchiving Xcode (This can take a while)`.
    fn status(&self, message: &str);

    /// A progress update for the transfer described by `label`.
    fn transfer(&self, label: &str, progress: &TransferProgress);

    /// The current transfer has ended, successfully or not.
    fn transfer_finished(&self) {}
}

/// [`OutputSink`] that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn status(&self, message: &str) {
        info!("{}", message);
    }

    fn transfer(&self, label: &str, progress: &TransferProgress) {
        debug!(
            label,
            percent = progress.percent,
            current_bytes = progress.current_bytes,
            total_bytes = progress.total_bytes,
            "Transfer progress"
        );
    }
}
