//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and installer
//! construction so command handlers only deal with their own work.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use xcodes::config::{ConfigFile, InstallerConfig};
use xcodes::logging::{init_logging, LoggingGuard};
use xcodes::{Environment, Installer, StaticSession};

use crate::error::CliError;
use crate::output::TerminalOutput;
use crate::prompt::TerminalPrompt;

/// Which transfer strategy the user asked for on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Aria2Choice {
    /// Whatever the config file says.
    #[default]
    Configured,
    /// Use `aria2c` from this path.
    Path(PathBuf),
    /// Never use `aria2c`.
    Disabled,
}

impl Aria2Choice {
    /// Apply the choice on top of the configured settings.
    pub fn apply(&self, config: InstallerConfig) -> InstallerConfig {
        match self {
            Aria2Choice::Configured => config,
            Aria2Choice::Path(path) => config.with_aria2_path(Some(path.clone())),
            Aria2Choice::Disabled => config.with_aria2_path(None),
        }
    }
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Load config and initialize logging.
    ///
    /// With `verbose`, log events are mirrored to stderr at debug level.
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;

        let logging_guard = init_logging(&config.logging.file, verbose)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("xcodes v{}", xcodes::VERSION);
        info!("xcodes CLI: {} command", command);
    }

    /// Build an installer talking to this machine and this terminal.
    pub fn installer(&self, aria2: &Aria2Choice) -> Result<Installer, CliError> {
        let config = aria2.apply(InstallerConfig::from(&self.config));
        let session = StaticSession::from_env_or(self.config.session.cookie.clone());

        let env = Environment::system(&config, Arc::new(session))?
            .with_output(Arc::new(TerminalOutput::new()))
            .with_prompt(Arc::new(TerminalPrompt));

        info!(
            install_dir = %config.install_dir.display(),
            archive_dir = %config.archive_dir.display(),
            "Installer ready"
        );
        Ok(Installer::new(config, env))
    }
}
