//! Catalog of downloadable archives.
//!
//! Listing what can be downloaded is an external concern. The shipped
//! [`CachedCatalog`] keeps the list in a JSON cache file and, when a source
//! URL is configured, refreshes it from there.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use reqwest::blocking::Client;
use semver::Version;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::ArchiveReference;
use crate::version::VersionExt;

/// File name of the catalog cache.
pub const CATALOG_CACHE_FILE: &str = "available-xcodes.json";

/// Default maximum cache age.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The cache file could not be read.
    #[error("Failed to read catalog cache {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cache file could not be written.
    #[error("Failed to write catalog cache {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The catalog JSON is malformed.
    #[error("Failed to parse catalog from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// The remote catalog could not be fetched.
    #[error("Failed to fetch catalog from {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// There is no cache and nowhere to fetch one from.
    #[error("No catalog available at {}. Set [catalog] source_url in the config file or provide the cache file.", .path.display())]
    Missing { path: PathBuf },
}

/// The list of archives that can be downloaded.
pub trait Catalog: Send + Sync {
    /// Whether the list is missing or older than allowed.
    fn should_refresh(&self) -> bool;

    /// Reload the list and return it.
    fn refresh(&self) -> Result<Vec<ArchiveReference>, CatalogError>;

    /// The current list, possibly stale or empty.
    fn available(&self) -> Vec<ArchiveReference>;
}

/// Find the entry for `version`.
///
/// Build metadata is ignored unless the request carries some, so `11.2`
/// finds `11.2.0+11B52`.
pub fn find_version<'a>(
    archives: &'a [ArchiveReference],
    version: &Version,
) -> Option<&'a ArchiveReference> {
    if version.build.is_empty() {
        archives
            .iter()
            .find(|archive| archive.version.eq_ignoring_build(version))
    } else {
        archives.iter().find(|archive| &archive.version == version)
    }
}

/// [`Catalog`] backed by a JSON cache file.
pub struct CachedCatalog {
    cache_file: PathBuf,
    max_age: Duration,
    source_url: Option<String>,
    timeout: Duration,
    entries: RwLock<Option<Vec<ArchiveReference>>>,
}

impl CachedCatalog {
    pub fn new(cache_file: impl Into<PathBuf>) -> Self {
        Self {
            cache_file: cache_file.into(),
            max_age: DEFAULT_MAX_AGE,
            source_url: None,
            timeout: Duration::from_secs(60),
            entries: RwLock::new(None),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_source_url(mut self, url: Option<String>) -> Self {
        self.source_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    fn load_cache(&self) -> Result<Vec<ArchiveReference>, CatalogError> {
        let bytes = fs::read(&self.cache_file).map_err(|source| CatalogError::Read {
            path: self.cache_file.clone(),
            source,
        })?;
        parse_catalog(&bytes, &self.cache_file.display().to_string())
    }

    fn save_cache(&self, archives: &[ArchiveReference]) -> Result<(), CatalogError> {
        let write_error = |source: io::Error| CatalogError::Write {
            path: self.cache_file.clone(),
            source,
        };
        if let Some(parent) = self.cache_file.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let json = serde_json::to_vec_pretty(archives).map_err(|e| write_error(e.into()))?;
        fs::write(&self.cache_file, json).map_err(write_error)
    }

    fn fetch(&self, url: &str) -> Result<Vec<ArchiveReference>, CatalogError> {
        let fetch_error = |reason: String| CatalogError::Fetch {
            url: url.to_string(),
            reason,
        };
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| fetch_error(e.to_string()))?;
        let response = client.get(url).send().map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("status {}", response.status())));
        }
        let body = response.bytes().map_err(|e| fetch_error(e.to_string()))?;
        parse_catalog(&body, url)
    }

    fn cache_age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.cache_file).and_then(|m| m.modified()).ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    fn store(&self, archives: Vec<ArchiveReference>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *entries = Some(archives);
    }
}

impl Catalog for CachedCatalog {
    fn should_refresh(&self) -> bool {
        if self.available().is_empty() {
            return true;
        }
        match self.cache_age() {
            Some(age) => age > self.max_age,
            None => true,
        }
    }

    fn refresh(&self) -> Result<Vec<ArchiveReference>, CatalogError> {
        let archives = match &self.source_url {
            Some(url) => {
                info!(url = %url, "Refreshing catalog");
                let archives = self.fetch(url)?;
                self.save_cache(&archives)?;
                archives
            }
            None if self.cache_file.exists() => {
                debug!(path = %self.cache_file.display(), "Reloading catalog cache");
                self.load_cache()?
            }
            None => {
                return Err(CatalogError::Missing {
                    path: self.cache_file.clone(),
                })
            }
        };
        self.store(archives.clone());
        Ok(archives)
    }

    fn available(&self) -> Vec<ArchiveReference> {
        if let Some(entries) = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return entries.clone();
        }

        let loaded = if self.cache_file.exists() {
            self.load_cache().unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring unreadable catalog cache");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        self.store(loaded.clone());
        loaded
    }
}

fn parse_catalog(bytes: &[u8], origin: &str) -> Result<Vec<ArchiveReference>, CatalogError> {
    serde_json::from_slice(bytes).map_err(|source| CatalogError::Parse {
        origin: origin.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(version: &str) -> ArchiveReference {
        ArchiveReference::new(
            Version::parse(version).unwrap(),
            format!("https://example.com/Xcode_{}.xip", version),
            format!("Xcode_{}.xip", version),
            None,
        )
    }

    #[test]
    fn test_find_version_ignores_build_metadata() {
        let archives = vec![entry("11.1.0+11A1027"), entry("11.2.0+11B52")];

        let found = find_version(&archives, &Version::parse("11.2.0").unwrap()).unwrap();
        assert_eq!(found.version, Version::parse("11.2.0+11B52").unwrap());

        assert!(find_version(&archives, &Version::parse("11.2.0+11B41").unwrap()).is_none());
        assert!(find_version(&archives, &Version::parse("11.3.0").unwrap()).is_none());
    }

    #[test]
    fn test_missing_cache_needs_refresh() {
        let temp = TempDir::new().unwrap();
        let catalog = CachedCatalog::new(temp.path().join(CATALOG_CACHE_FILE));

        assert!(catalog.available().is_empty());
        assert!(catalog.should_refresh());
        assert!(matches!(catalog.refresh(), Err(CatalogError::Missing { .. })));
    }

    #[test]
    fn test_fresh_cache_is_used() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CATALOG_CACHE_FILE);
        fs::write(&path, serde_json::to_vec(&vec![entry("11.2.0")]).unwrap()).unwrap();

        let catalog = CachedCatalog::new(&path);
        assert_eq!(catalog.available(), vec![entry("11.2.0")]);
        assert!(!catalog.should_refresh());
        assert_eq!(catalog.refresh().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_cache_needs_refresh() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CATALOG_CACHE_FILE);
        fs::write(&path, serde_json::to_vec(&vec![entry("11.2.0")]).unwrap()).unwrap();

        let catalog = CachedCatalog::new(&path).with_max_age(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(10));
        assert!(catalog.should_refresh());
    }

    #[test]
    fn test_corrupt_cache_reads_as_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CATALOG_CACHE_FILE);
        fs::write(&path, "{ not json").unwrap();

        let catalog = CachedCatalog::new(&path);
        assert!(catalog.available().is_empty());
        assert!(matches!(catalog.refresh(), Err(CatalogError::Parse { .. })));
    }

    #[test]
    fn test_release_date_round_trips_through_cache() {
        let json = r#"[{"version":"12.0.0-beta.1","url":"https://a/x.xip","filename":"x.xip","release_date":"2020-06-22"}]"#;
        let archives = parse_catalog(json.as_bytes(), "test").unwrap();
        assert_eq!(
            archives[0].release_date,
            chrono::NaiveDate::from_ymd_opt(2020, 6, 22)
        );
    }
}
