//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use console::style;
use xcodes::config::{config_file_path, ConfigFileError};
use xcodes::session::SESSION_COOKIE_ENV;
use xcodes::InstallError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Conflicting or missing command line input
    Usage(String),
    /// The pipeline failed
    Install(InstallError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("{} {}", style("Error:").red().bold(), self);

        for line in self.hints() {
            eprintln!("{}", line);
        }

        process::exit(1)
    }

    /// Extra guidance printed after the message.
    pub fn hints(&self) -> Vec<String> {
        let CliError::Install(error) = self else {
            return Vec::new();
        };
        match error {
            InstallError::MissingCredential => vec![
                String::new(),
                "Sign in at https://developer.apple.com/download/ in a browser, then either:".to_string(),
                format!("  1. export {}='<cookie header>'", SESSION_COOKIE_ENV),
                format!("  2. set cookie under [session] in {}", config_file_path().display()),
            ],
            InstallError::Process(_) | InstallError::CodesignVerifyFailed { .. } => vec![
                String::new(),
                "Run again with --verbose to see every command as it runs.".to_string(),
            ],
            InstallError::DamagedArchive { .. } => vec![
                String::new(),
                "The archive was downloaded twice and could not be expanded either time.".to_string(),
                "Check free disk space, then remove the archive with `xcodes remove` and retry.".to_string(),
            ],
            InstallError::RetryExhausted { .. } => vec![
                String::new(),
                "Partial data was kept; running the same command again resumes the download.".to_string(),
            ],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Install(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Install(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InstallError> for CliError {
    fn from(e: InstallError) -> Self {
        CliError::Install(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}
