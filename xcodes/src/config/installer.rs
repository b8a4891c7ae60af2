//! Resolved settings for the installer.

use std::path::PathBuf;
use std::time::Duration;

use crate::catalog::{CATALOG_CACHE_FILE, DEFAULT_MAX_AGE};
use crate::download::{DEFAULT_ARIA2_PATH, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS};
use crate::version::{VersionExt, XCODE_FILE_PREFIX};

use super::file::{ConfigFile, DEFAULT_INSTALL_DIR};

/// Configuration for the [`Installer`](crate::pipeline::Installer).
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Directory where bundles are installed.
    ///
    /// Typically `/Applications`.
    pub install_dir: PathBuf,

    /// Directory archives are downloaded into.
    pub archive_dir: PathBuf,

    /// `aria2c` binary to use for downloads. `None` forces direct HTTP.
    pub aria2_path: Option<PathBuf>,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Total download attempts, including the first.
    pub max_attempts: usize,

    /// Catalog cache file.
    pub catalog_cache_file: PathBuf,

    /// Age after which the catalog is refreshed.
    pub catalog_max_age: Duration,

    /// Where the catalog is refreshed from.
    pub catalog_source_url: Option<String>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        let archive_dir = std::env::temp_dir().join("xcodes-archives");
        Self {
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            catalog_cache_file: archive_dir.join(CATALOG_CACHE_FILE),
            archive_dir,
            aria2_path: Some(PathBuf::from(DEFAULT_ARIA2_PATH)),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            catalog_max_age: DEFAULT_MAX_AGE,
            catalog_source_url: None,
        }
    }
}

impl InstallerConfig {
    /// Create a new configuration with the given install and archive directories.
    pub fn new(install_dir: PathBuf, archive_dir: PathBuf) -> Self {
        Self {
            install_dir,
            catalog_cache_file: archive_dir.join(CATALOG_CACHE_FILE),
            archive_dir,
            ..Default::default()
        }
    }

    /// Resolve the settings from a loaded config file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            install_dir: config.paths.install_dir.clone(),
            archive_dir: config.paths.archive_dir.clone(),
            aria2_path: config
                .download
                .use_aria2
                .then(|| config.download.aria2_path.clone()),
            timeout: Duration::from_secs(config.download.timeout_secs),
            max_attempts: config.download.max_attempts,
            catalog_cache_file: config.catalog.cache_file.clone(),
            catalog_max_age: Duration::from_secs(config.catalog.max_age_hours * 60 * 60),
            catalog_source_url: config.catalog.source_url.clone(),
        }
    }

    /// Use `aria2c` at `path`, or direct HTTP when `None`.
    pub fn with_aria2_path(mut self, path: Option<PathBuf>) -> Self {
        self.aria2_path = path;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the total number of download attempts.
    pub fn with_max_attempts(mut self, max: usize) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    /// Set the catalog cache file.
    pub fn with_catalog_cache_file(mut self, path: PathBuf) -> Self {
        self.catalog_cache_file = path;
        self
    }

    /// Set the catalog source URL.
    pub fn with_catalog_source_url(mut self, url: Option<String>) -> Self {
        self.catalog_source_url = url;
        self
    }

    /// The installed location for `version`: `<install_dir>/Xcode-<version>.app`.
    pub fn install_path_for(&self, version: &semver::Version) -> PathBuf {
        self.install_dir.join(format!(
            "{}{}.app",
            XCODE_FILE_PREFIX,
            version.description_without_build_metadata()
        ))
    }
}

impl From<&ConfigFile> for InstallerConfig {
    fn from(config: &ConfigFile) -> Self {
        Self::from_config_file(config)
    }
}
