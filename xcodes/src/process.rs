//! External tool invocation.
//!
//! The pipeline shells out to `xip`, `spctl`, `codesign`, `sudo`, `aria2c`
//! and friends. All of that goes through [`ProcessRunner`] so the pipeline
//! can be driven by canned output in tests.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;
use tracing::debug;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The tool could not be started at all.
    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The tool ran and exited unsuccessfully.
    #[error("Failed executing: `{command}` ({code})\n{}", combined_output(.stdout, .stderr))]
    Execution {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl ProcessError {
    /// Captured output of a failed execution, stderr first.
    pub fn output(&self) -> Option<String> {
        match self {
            Self::Spawn { .. } => None,
            Self::Execution { stdout, stderr, .. } => Some(combined_output(stdout, stderr)),
        }
    }
}

fn combined_output(stdout: &str, stderr: &str) -> String {
    [stderr.trim(), stdout.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    stdin: Option<String>,
}

impl ToolCommand {
    /// Start a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir` instead of the inherited working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Feed `input` to the tool's standard input.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn input(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Program and arguments only; standard input may hold a password and is
/// never shown.
impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// A successful run with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == 0
    }

    /// Convert a non-zero exit into [`ProcessError::Execution`].
    pub fn into_result(self, command: &ToolCommand) -> Result<ProcessOutput, ProcessError> {
        if self.succeeded() {
            Ok(self)
        } else {
            Err(ProcessError::Execution {
                command: command.to_string(),
                code: self.code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external tools.
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and capture output.
    ///
    /// A non-zero exit is returned as [`ProcessError::Execution`].
    fn run(&self, command: &ToolCommand) -> Result<ProcessOutput, ProcessError>;

    /// Run to completion, handing each stdout line to `on_line` as it arrives.
    ///
    /// Lines are split on both `\n` and `\r` so carriage-return progress
    /// redraws arrive as separate lines.
    fn run_streaming(
        &self,
        command: &ToolCommand,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Call `on_line` for every non-empty line of `text`, splitting on `\n` and `\r`.
pub fn for_each_line(text: &str, on_line: &mut dyn FnMut(&str)) {
    text.split(['\n', '\r'])
        .filter(|line| !line.trim().is_empty())
        .for_each(|line| on_line(line));
}

/// [`ProcessRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    fn spawn_error(command: &ToolCommand, source: io::Error) -> ProcessError {
        ProcessError::Spawn {
            command: command.to_string(),
            source,
        }
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, command: &ToolCommand) -> Result<ProcessOutput, ProcessError> {
        self.run_streaming(command, &mut |_| {})
    }

    fn run_streaming(
        &self,
        command: &ToolCommand,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutput, ProcessError> {
        debug!(command = %command, "Running tool");

        let mut child = command
            .to_command()
            .spawn()
            .map_err(|e| Self::spawn_error(command, e))?;

        // A tool that exits before reading its input still gets waited on,
        // and its own output takes precedence over the broken pipe.
        let stdin_error = match (command.input(), child.stdin.take()) {
            (Some(input), Some(mut stdin)) => stdin
                .write_all(input.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"))
                .err(),
            _ => None,
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let (stdout, stderr) = thread::scope(|scope| {
            // Drain stderr concurrently so a chatty tool can't fill the pipe
            // and stall while stdout is being read.
            let stderr_reader = scope.spawn(move || {
                let mut buffer = String::new();
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut buffer);
                }
                buffer
            });

            let mut captured = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let mut pending = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let read = match pipe.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    for &byte in &chunk[..read] {
                        if byte == b'\n' || byte == b'\r' {
                            flush_line(&mut pending, &mut captured, byte, on_line);
                        } else {
                            pending.push(byte);
                        }
                    }
                }
                flush_line(&mut pending, &mut captured, b'\n', on_line);
            }

            (captured, stderr_reader.join().unwrap_or_default())
        });

        let status = child.wait().map_err(|e| Self::spawn_error(command, e))?;
        let output = ProcessOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        };
        debug!(command = %command, code = output.code, "Tool finished");
        let output = output.into_result(command)?;
        match stdin_error {
            Some(e) => Err(Self::spawn_error(command, e)),
            None => Ok(output),
        }
    }
}

fn flush_line(
    pending: &mut Vec<u8>,
    captured: &mut String,
    terminator: u8,
    on_line: &mut dyn FnMut(&str),
) {
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    if !line.trim().is_empty() {
        on_line(&line);
    }
    captured.push_str(&line);
    if !line.is_empty() || terminator == b'\n' {
        captured.push(terminator as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_hides_stdin() {
        let command = ToolCommand::new("sudo").args(["-S", "-v"]).stdin("hunter2");
        assert_eq!(command.to_string(), "sudo -S -v");
        assert_eq!(command.input(), Some("hunter2"));
    }

    #[test]
    fn test_into_result_maps_non_zero_exit() {
        let command = ToolCommand::new("spctl").arg("--assess");
        let output = ProcessOutput {
            code: 3,
            stdout: String::new(),
            stderr: "rejected".to_string(),
        };

        let err = output.into_result(&command).unwrap_err();
        assert_eq!(err.output().as_deref(), Some("rejected"));
        assert_eq!(err.to_string(), "Failed executing: `spctl --assess` (3)\nrejected");
    }

    #[test]
    fn test_for_each_line_splits_on_carriage_returns() {
        let mut lines = Vec::new();
        for_each_line("a\r\nb\rc\n\n", &mut |line| lines.push(line.to_string()));
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_streams_lines() {
        let runner = SystemProcessRunner;
        let command = ToolCommand::new("sh").args(["-c", "printf 'one\\rtwo\\nthree\\n'"]);

        let mut lines = Vec::new();
        let output = runner
            .run_streaming(&command, &mut |line| lines.push(line.to_string()))
            .unwrap();

        assert!(output.succeeded());
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_failure_output() {
        let runner = SystemProcessRunner;
        let command = ToolCommand::new("sh").args(["-c", "echo broken >&2; exit 4"]);

        match runner.run(&command) {
            Err(ProcessError::Execution { code, stderr, .. }) => {
                assert_eq!(code, 4);
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_feeds_stdin_and_cwd() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = SystemProcessRunner;
        let command = ToolCommand::new("sh")
            .args(["-c", "read line; echo \"$line\"; pwd"])
            .current_dir(temp.path())
            .stdin("secret");

        let output = runner.run(&command).unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("secret"));
        let cwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_output_when_tool_ignores_stdin() {
        let runner = SystemProcessRunner;
        // Larger than any pipe buffer, so the write fails once stdin closes.
        let command = ToolCommand::new("sh")
            .args(["-c", "exec 0<&-; echo 'Sorry, try again.' >&2; exit 1"])
            .stdin("x".repeat(1 << 20));

        match runner.run(&command) {
            Err(ProcessError::Execution { code, stderr, .. }) => {
                assert_eq!(code, 1);
                assert_eq!(stderr.trim(), "Sorry, try again.");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_spawn_failure() {
        let runner = SystemProcessRunner;
        let err = runner
            .run(&ToolCommand::new("/definitely/not/a/tool"))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.output().is_none());
    }
}
