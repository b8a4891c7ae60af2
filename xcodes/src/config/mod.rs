//! Configuration for xcodes.
//!
//! [`ConfigFile`] mirrors `~/.xcodes/config.ini` section by section.
//! [`InstallerConfig`] is the resolved form handed to the installer.
//!
//! # Example
//!
//! ```no_run
//! use xcodes::config::{ConfigFile, InstallerConfig};
//!
//! let file = ConfigFile::load()?;
//! let config = InstallerConfig::from(&file);
//! # Ok::<(), xcodes::config::ConfigFileError>(())
//! ```

mod file;
mod installer;
mod parser;
mod writer;

pub use file::{
    application_support_directory, config_directory, config_file_path, CatalogSettings,
    ConfigFile, ConfigFileError, DownloadSettings, LoggingSettings, PathSettings, SessionSettings,
    APPLICATION_SUPPORT_NAME, DEFAULT_CATALOG_MAX_AGE_HOURS, DEFAULT_INSTALL_DIR,
    DEFAULT_LOG_FILE,
};
pub use installer::InstallerConfig;
