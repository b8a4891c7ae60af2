//! Accelerated transfer through `aria2c`.
//!
//! aria2 opens many connections per server and keeps its own resume state in
//! a `<destination>.aria2` file until the transfer completes, so retrying is
//! just running it again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::parser::parse_progress_line;
use super::progress::TransferProgress;
use super::state::DownloadTask;
use super::strategy::{TransferError, TransferStrategy};
use crate::archive::aria2_marker_path;
use crate::process::{ProcessError, ProcessRunner, ToolCommand};

/// Default location of the `aria2c` binary.
pub const DEFAULT_ARIA2_PATH: &str = "/usr/local/bin/aria2c";

/// Connections per server and pieces per file.
const CONNECTIONS: u32 = 16;

/// Downloads by delegating to `aria2c`.
pub struct AcceleratedTransfer {
    aria2_path: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl AcceleratedTransfer {
    pub fn new(aria2_path: impl Into<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            aria2_path: aria2_path.into(),
            runner,
        }
    }

    pub fn aria2_path(&self) -> &Path {
        &self.aria2_path
    }

    /// The `aria2c` invocation for `task`.
    pub fn command(&self, task: &DownloadTask) -> ToolCommand {
        let directory = task
            .destination
            .parent()
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let file_name = task
            .destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| task.archive.local_file_name());

        let mut command = ToolCommand::new(self.aria2_path.display().to_string());
        if let Some(cookie) = &task.cookie_header {
            command = command.arg(format!("--header=Cookie: {}", cookie));
        }
        command
            .arg(format!("--max-connection-per-server={}", CONNECTIONS))
            .arg(format!("--split={}", CONNECTIONS))
            .arg("--summary-interval=1")
            .arg(format!("--stop-with-process={}", std::process::id()))
            .arg(format!("--dir={}", directory))
            .arg(format!("--out={}", file_name))
            .arg(&task.archive.url)
    }
}

impl TransferStrategy for AcceleratedTransfer {
    fn name(&self) -> &'static str {
        "aria2"
    }

    fn transfer(
        &self,
        task: &DownloadTask,
        progress: &dyn Fn(TransferProgress),
    ) -> Result<PathBuf, TransferError> {
        let command = self.command(task);
        info!(
            url = %task.archive.url,
            attempt = task.attempt_number,
            aria2 = %self.aria2_path.display(),
            "Starting accelerated download"
        );

        let result = self.runner.run_streaming(&command, &mut |line| {
            match parse_progress_line(line) {
                Some(update) => progress(update),
                None => debug!(line, "aria2"),
            }
        });

        match result {
            Ok(_) => Ok(task.destination.clone()),
            Err(ProcessError::Execution { code, stderr, stdout, .. }) => {
                let detail = if stderr.trim().is_empty() {
                    stdout.lines().last().unwrap_or_default().to_string()
                } else {
                    stderr.trim().to_string()
                };
                Err(TransferError::new(format!("aria2c exited with code {}: {}", code, detail)))
            }
            Err(e) => Err(TransferError::new(e.to_string())),
        }
    }

    fn incomplete_marker(&self, destination: &Path) -> Option<PathBuf> {
        Some(aria2_marker_path(destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveReference;
    use crate::process::ProcessOutput;
    use crate::testing::FakeRunner;
    use semver::Version;
    use std::sync::Mutex;

    fn task() -> DownloadTask {
        let archive = ArchiveReference::new(
            Version::parse("11.2.0").unwrap(),
            "https://download.developer.apple.com/Xcode_11.2.xip",
            "Xcode_11.2.xip",
            None,
        );
        DownloadTask::new(archive, "/archives/Xcode-11.2.0.xip")
            .with_cookie_header(Some("ADCDownloadAuth=xyz".to_string()))
    }

    #[test]
    fn test_command_line() {
        let runner = Arc::new(FakeRunner::new());
        let transfer = AcceleratedTransfer::new("/opt/bin/aria2c", runner);
        let command = transfer.command(&task());

        assert_eq!(command.program(), "/opt/bin/aria2c");
        let args = command.arguments();
        assert_eq!(args[0], "--header=Cookie: ADCDownloadAuth=xyz");
        assert!(args.contains(&"--dir=/archives".to_string()));
        assert!(args.contains(&"--out=Xcode-11.2.0.xip".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://download.developer.apple.com/Xcode_11.2.xip")
        );
    }

    #[test]
    fn test_progress_lines_are_parsed() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "aria2c",
            ProcessOutput::success(
                "[NOTICE] Downloading 1 item(s)\n\
                 [#1 1.0GiB/4.4GiB(22%) CN:16 DL:10MiB ETA:6m\r\
                 [#1 4.4GiB/4.4GiB(100%) CN:16 DL:10MiB ETA:0s]\n",
            ),
        );
        let transfer = AcceleratedTransfer::new(DEFAULT_ARIA2_PATH, runner);

        let seen = Mutex::new(Vec::new());
        let path = transfer
            .transfer(&task(), &|p| seen.lock().unwrap().push(p.percent))
            .unwrap();

        assert_eq!(path, PathBuf::from("/archives/Xcode-11.2.0.xip"));
        assert_eq!(*seen.lock().unwrap(), vec![22, 100]);
    }

    #[test]
    fn test_failure_carries_no_resume_state() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "aria2c",
            ProcessOutput {
                code: 7,
                stdout: String::new(),
                stderr: "errorCode=7 Network problem".to_string(),
            },
        );
        let transfer = AcceleratedTransfer::new(DEFAULT_ARIA2_PATH, runner);

        let err = transfer.transfer(&task(), &|_| {}).unwrap_err();
        assert!(!err.is_resumable());
        assert!(err.reason.contains("Network problem"));
    }

    #[test]
    fn test_incomplete_marker() {
        let transfer = AcceleratedTransfer::new(DEFAULT_ARIA2_PATH, Arc::new(FakeRunner::new()));
        assert_eq!(
            transfer.incomplete_marker(Path::new("/archives/Xcode-11.2.0.xip")),
            Some(PathBuf::from("/archives/Xcode-11.2.0.xip.aria2"))
        );
    }
}
