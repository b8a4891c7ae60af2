//! Configuration file handling for ~/.xcodes/config.ini.
//!
//! Loads and saves user configuration with defaults. Parsing lives in
//! [`super::parser`], serialization in [`super::writer`].

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::catalog::CATALOG_CACHE_FILE;
use crate::download::{DEFAULT_ARIA2_PATH, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS};

/// Default install directory.
pub const DEFAULT_INSTALL_DIR: &str = "/Applications";

/// Default maximum catalog cache age in hours.
pub const DEFAULT_CATALOG_MAX_AGE_HOURS: u64 = 24;

/// Application support folder name shared with the macOS app.
pub const APPLICATION_SUPPORT_NAME: &str = "com.xcodeupdates.app.XcodeUpdates";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "xcodes.log";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub paths: PathSettings,
    pub download: DownloadSettings,
    pub catalog: CatalogSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

/// `[paths]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSettings {
    /// Where expanded bundles are installed.
    pub install_dir: PathBuf,
    /// Where archives are downloaded to.
    pub archive_dir: PathBuf,
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    /// Location of the `aria2c` binary.
    pub aria2_path: PathBuf,
    /// Use `aria2c` when it is present.
    pub use_aria2: bool,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
    /// Total download attempts, including the first.
    pub max_attempts: usize,
}

/// `[catalog]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    pub cache_file: PathBuf,
    pub max_age_hours: u64,
    /// Where a fresh catalog is fetched from, if anywhere.
    pub source_url: Option<String>,
}

/// `[session]` section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSettings {
    /// Download session cookie.
    pub cookie: Option<String>,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub file: PathBuf,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let support_dir = application_support_directory();
        Self {
            paths: PathSettings {
                install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
                archive_dir: support_dir.clone(),
            },
            download: DownloadSettings {
                aria2_path: PathBuf::from(DEFAULT_ARIA2_PATH),
                use_aria2: true,
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            },
            catalog: CatalogSettings {
                cache_file: support_dir.join(CATALOG_CACHE_FILE),
                max_age_hours: DEFAULT_CATALOG_MAX_AGE_HOURS,
                source_url: None,
            },
            session: SessionSettings::default(),
            logging: LoggingSettings {
                file: config_directory().join("logs").join(DEFAULT_LOG_FILE),
            },
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path (~/.xcodes/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path (~/.xcodes/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }
}

/// Get the path to the config directory (~/.xcodes).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".xcodes")
}

/// Get the path to the config file (~/.xcodes/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// `~/Library/Application Support/com.xcodeupdates.app.XcodeUpdates`.
pub fn application_support_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library")
        .join("Application Support")
        .join(APPLICATION_SUPPORT_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert_eq!(config.paths.install_dir, PathBuf::from("/Applications"));
        assert!(config.paths.archive_dir.ends_with(APPLICATION_SUPPORT_NAME));
        assert_eq!(config.download.aria2_path, PathBuf::from(DEFAULT_ARIA2_PATH));
        assert!(config.download.use_aria2);
        assert_eq!(config.download.timeout_secs, 300);
        assert_eq!(config.download.max_attempts, 3);
        assert!(config.catalog.cache_file.ends_with(CATALOG_CACHE_FILE));
        assert_eq!(config.catalog.max_age_hours, 24);
        assert!(config.catalog.source_url.is_none());
        assert!(config.session.cookie.is_none());
        assert!(config.logging.file.ends_with("logs/xcodes.log"));
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.ini");

        ConfigFile::default().save_to(&config_path).unwrap();
        assert!(config_path.exists());
    }
}
