//! Direct HTTP transfer with resume support.
//!
//! Bytes stream into `<destination>.part`. When an attempt fails after
//! receiving data, the returned [`TransferError`] carries a [`ResumeToken`]
//! and the next attempt continues with `Range` + `If-Range`. The partial file
//! is renamed into place only once complete, so the destination never exists
//! half-written.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::{
    HeaderMap, CONTENT_LENGTH, COOKIE, ETAG, IF_RANGE, LAST_MODIFIED, RANGE,
};
use reqwest::StatusCode;
use tracing::{debug, info};

use super::progress::{ThroughputMeter, TransferProgress};
use super::state::{DownloadTask, ResumeToken};
use super::strategy::{TransferError, TransferStrategy};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Downloads archives with a blocking `reqwest` client.
#[derive(Debug)]
pub struct DirectTransfer {
    client: Client,
    timeout: Duration,
}

impl DirectTransfer {
    /// Create a direct transfer with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The resume token to use for `task`, if the partial file still matches it.
    fn usable_resume(task: &DownloadTask, partial: &Path) -> Option<ResumeToken> {
        let token = task.resume_token.as_ref()?;
        if token.url != task.archive.url || token.bytes_received == 0 {
            return None;
        }
        let on_disk = fs::metadata(partial).ok()?.len();
        if on_disk != token.bytes_received {
            debug!(
                expected = token.bytes_received,
                on_disk,
                "Partial file doesn't match resume data, starting over"
            );
            return None;
        }
        Some(token.clone())
    }

    fn send(
        &self,
        task: &DownloadTask,
        resume: Option<&ResumeToken>,
    ) -> Result<Response, TransferError> {
        let url = &task.archive.url;
        let mut request = self.client.get(url);
        if let Some(cookie) = &task.cookie_header {
            request = request.header(COOKIE, cookie);
        }
        if let Some(token) = resume {
            request = request.header(RANGE, format!("bytes={}-", token.bytes_received));
            if let Some(validator) = &token.validator {
                request = request.header(IF_RANGE, validator);
            }
        }

        request.send().map_err(|e| {
            let reason = if e.is_timeout() {
                format!("Request to {} timed out after {}s", url, self.timeout.as_secs())
            } else {
                format!("Request to {} failed: {}", url, e)
            };
            // Nothing new was received, but the partial file is still good.
            match resume {
                Some(token) => TransferError::resumable(reason, token.clone()),
                None => TransferError::new(reason),
            }
        })
    }

    /// Open the partial file for the response: append on 206, truncate otherwise.
    fn prepare_partial(
        partial: &Path,
        status: StatusCode,
        resume: Option<&ResumeToken>,
    ) -> Result<(u64, File), TransferError> {
        let write_error =
            |e: std::io::Error| TransferError::new(format!("Failed to write {}: {}", partial.display(), e));

        match resume {
            Some(token) if status == StatusCode::PARTIAL_CONTENT => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(partial)
                    .map_err(write_error)?;
                Ok((token.bytes_received, file))
            }
            _ => {
                if let Some(parent) = partial.parent() {
                    fs::create_dir_all(parent).map_err(write_error)?;
                }
                let file = File::create(partial).map_err(write_error)?;
                Ok((0, file))
            }
        }
    }

    /// Stream the body into `file`, returning bytes on disk when done.
    #[allow(clippy::too_many_arguments)]
    fn stream(
        &self,
        url: &str,
        mut response: Response,
        file: File,
        partial: &Path,
        start: u64,
        total: Option<u64>,
        validator: Option<String>,
        progress: &dyn Fn(TransferProgress),
    ) -> Result<u64, TransferError> {
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = start;
        let mut meter = ThroughputMeter::default();
        let total_for_progress = total.unwrap_or(0);

        let resumable_at = |downloaded: u64, reason: String| {
            if downloaded == 0 {
                return TransferError::new(reason);
            }
            TransferError::resumable(
                reason,
                ResumeToken {
                    url: url.to_string(),
                    bytes_received: downloaded,
                    total_bytes: total,
                    validator: validator.clone(),
                },
            )
        };

        loop {
            let bytes_read = match response.read(&mut buffer) {
                Ok(n) => n,
                Err(e) => {
                    writer.flush().map_err(|e| {
                        TransferError::new(format!("Failed to write {}: {}", partial.display(), e))
                    })?;
                    return Err(resumable_at(downloaded, format!("Read error: {}", e)));
                }
            };
            if bytes_read == 0 {
                break;
            }

            writer.write_all(&buffer[..bytes_read]).map_err(|e| {
                TransferError::new(format!("Failed to write {}: {}", partial.display(), e))
            })?;
            downloaded += bytes_read as u64;

            if let Some(rate) = meter.record(bytes_read as u64, Instant::now()) {
                progress(TransferProgress::from_bytes(downloaded, total_for_progress).with_throughput(rate));
            }
        }

        writer.flush().map_err(|e| {
            TransferError::new(format!("Failed to write {}: {}", partial.display(), e))
        })?;

        if let Some(expected) = total {
            if downloaded < expected {
                return Err(resumable_at(
                    downloaded,
                    format!("Connection closed after {} of {} bytes", downloaded, expected),
                ));
            }
        }

        let mut done = TransferProgress::from_bytes(downloaded, total.unwrap_or(downloaded));
        done.throughput_bytes_per_second = meter.last_rate();
        progress(done);
        Ok(downloaded)
    }
}

impl TransferStrategy for DirectTransfer {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn transfer(
        &self,
        task: &DownloadTask,
        progress: &dyn Fn(TransferProgress),
    ) -> Result<PathBuf, TransferError> {
        let url = &task.archive.url;
        let partial = task.partial_path();
        let resume = Self::usable_resume(task, &partial);

        if let Some(token) = &resume {
            info!(url = %url, offset = token.bytes_received, "Resuming download");
        } else {
            info!(url = %url, attempt = task.attempt_number, "Starting download");
        }

        let response = self.send(task, resume.as_ref())?;
        let status = response.status();
        if !status.is_success() {
            let reason = format!("GET {} failed with status {}", url, status);
            return Err(match (&resume, status.is_server_error()) {
                (Some(token), true) => TransferError::resumable(reason, token.clone()),
                _ => TransferError::new(reason),
            });
        }

        let (start, file) = Self::prepare_partial(&partial, status, resume.as_ref())?;
        if resume.is_some() && start == 0 {
            debug!(url = %url, "Server ignored the range request, restarting from zero");
        }

        let headers = response.headers();
        let total = expected_total(headers, start);
        let validator =
            response_validator(headers).or_else(|| resume.as_ref().and_then(|t| t.validator.clone()));

        self.stream(url, response, file, &partial, start, total, validator, progress)?;

        fs::rename(&partial, &task.destination).map_err(|e| {
            TransferError::new(format!(
                "Failed to move {} to {}: {}",
                partial.display(),
                task.destination.display(),
                e
            ))
        })?;

        Ok(task.destination.clone())
    }
}

/// Full size of the resource, given the bytes already held.
fn expected_total(headers: &HeaderMap, start: u64) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|len| len + start)
}

/// Validator for a later `If-Range`, preferring a strong `ETag`.
fn response_validator(headers: &HeaderMap) -> Option<String> {
    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.starts_with("W/"));
    etag.or_else(|| headers.get(LAST_MODIFIED).and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}
