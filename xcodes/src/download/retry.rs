//! Bounded retry for transfer attempts.

use tracing::warn;

use super::state::ResumeToken;
use super::strategy::TransferError;
use crate::error::{InstallError, InstallResult};

/// Attempts made before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Run `operation` up to `max_attempts` times, retrying immediately.
///
/// Each attempt receives its 1-based number and the resume state left by the
/// previous failure (or `initial` on the first attempt). Every retry is
/// logged before it starts. When all attempts fail the last error is wrapped
/// in [`InstallError::RetryExhausted`].
pub fn attempt_resumable<T, F>(
    max_attempts: usize,
    initial: Option<ResumeToken>,
    mut operation: F,
) -> InstallResult<T>
where
    F: FnMut(usize, Option<ResumeToken>) -> Result<T, TransferError>,
{
    let max_attempts = max_attempts.max(1);
    let mut resume = initial;
    let mut attempt = 1;

    loop {
        match operation(attempt, resume.take()) {
            Ok(value) => return Ok(value),
            Err(error) if attempt >= max_attempts => {
                return Err(InstallError::RetryExhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(error) => {
                warn!(
                    attempt,
                    max_attempts,
                    resumable = error.is_resumable(),
                    error = %error,
                    "Download attempt failed, retrying"
                );
                resume = error.resume;
                attempt += 1;
            }
        }
    }
}
