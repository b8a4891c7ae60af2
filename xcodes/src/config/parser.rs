//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::{ConfigFile, ConfigFileError};

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [paths] section
    if let Some(section) = ini.section(Some("paths")) {
        if let Some(path) = non_empty(section, "install_dir") {
            config.paths.install_dir = expand_tilde(path);
        }
        if let Some(path) = non_empty(section, "archive_dir") {
            config.paths.archive_dir = expand_tilde(path);
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(path) = non_empty(section, "aria2_path") {
            config.download.aria2_path = expand_tilde(path);
        }
        if let Some(v) = section.get("use_aria2") {
            config.download.use_aria2 = parse_bool(v).ok_or_else(|| ConfigFileError::InvalidValue {
                section: "download".to_string(),
                key: "use_aria2".to_string(),
                value: v.to_string(),
                reason: "must be true or false".to_string(),
            })?;
        }
        if let Some(v) = section.get("timeout_secs") {
            config.download.timeout_secs = parse_positive(
                "download",
                "timeout_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
        }
        if let Some(v) = section.get("max_attempts") {
            config.download.max_attempts =
                parse_positive("download", "max_attempts", v, "must be a positive integer")?;
        }
    }

    // [catalog] section
    if let Some(section) = ini.section(Some("catalog")) {
        if let Some(path) = non_empty(section, "cache_file") {
            config.catalog.cache_file = expand_tilde(path);
        }
        if let Some(v) = section.get("max_age_hours") {
            config.catalog.max_age_hours = v.trim().parse().map_err(|_| ConfigFileError::InvalidValue {
                section: "catalog".to_string(),
                key: "max_age_hours".to_string(),
                value: v.to_string(),
                reason: "must be a non-negative integer (hours)".to_string(),
            })?;
        }
        if let Some(url) = non_empty(section, "source_url") {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ConfigFileError::InvalidValue {
                    section: "catalog".to_string(),
                    key: "source_url".to_string(),
                    value: url.to_string(),
                    reason: "must be an http(s) URL".to_string(),
                });
            }
            config.catalog.source_url = Some(url.to_string());
        }
    }

    // [session] section
    if let Some(section) = ini.section(Some("session")) {
        config.session.cookie = non_empty(section, "cookie").map(str::to_string);
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(path) = non_empty(section, "file") {
            config.logging.file = expand_tilde(path);
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_positive<T>(section: &str, key: &str, value: &str, reason: &str) -> Result<T, ConfigFileError>
where
    T: FromStr + PartialOrd + Default,
{
    value
        .trim()
        .parse::<T>()
        .ok()
        .filter(|parsed| *parsed > T::default())
        .ok_or_else(|| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        })
}

/// Parse a boolean flag, accepting the usual spellings.
pub(super) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn load(contents: &str) -> Result<ConfigFile, ConfigFileError> {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.ini");
        std::fs::write(&config_path, contents).unwrap();
        ConfigFile::load_from(&config_path)
    }

    #[test]
    fn test_overlays_values_on_defaults() {
        let config = load(
            r#"
[paths]
install_dir = /Volumes/Fast/Applications
archive_dir = /Volumes/Fast/archives

[download]
use_aria2 = no
timeout_secs = 120
max_attempts = 5

[catalog]
max_age_hours = 0
source_url = https://example.com/xcodes.json

[session]
cookie = ADCDownloadAuth=abc
"#,
        )
        .unwrap();

        assert_eq!(config.paths.install_dir, Path::new("/Volumes/Fast/Applications"));
        assert_eq!(config.paths.archive_dir, Path::new("/Volumes/Fast/archives"));
        assert!(!config.download.use_aria2);
        assert_eq!(config.download.timeout_secs, 120);
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.catalog.max_age_hours, 0);
        assert_eq!(
            config.catalog.source_url.as_deref(),
            Some("https://example.com/xcodes.json")
        );
        assert_eq!(config.session.cookie.as_deref(), Some("ADCDownloadAuth=abc"));
        // Untouched keys keep their defaults.
        assert_eq!(config.download.aria2_path, ConfigFile::default().download.aria2_path);
    }

    #[test]
    fn test_empty_values_keep_defaults() {
        let config = load("[paths]\ninstall_dir =\n[session]\ncookie =\n").unwrap();
        assert_eq!(config.paths.install_dir, ConfigFile::default().paths.install_dir);
        assert!(config.session.cookie.is_none());
    }

    #[test]
    fn test_invalid_timeout() {
        let err = load("[download]\ntimeout_secs = soon\n").unwrap_err();
        assert!(err.to_string().contains("download.timeout_secs"));
        assert!(err.to_string().contains("seconds"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = load("[download]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "max_attempts"
        ));
    }

    #[test]
    fn test_invalid_bool() {
        let err = load("[download]\nuse_aria2 = sometimes\n").unwrap_err();
        assert!(err.to_string().contains("must be true or false"));
    }

    #[test]
    fn test_source_url_must_be_http() {
        let err = load("[catalog]\nsource_url = ftp://example.com/list.json\n").unwrap_err();
        assert!(err.to_string().contains("catalog.source_url"));
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/archives"), home.join("archives"));
        }
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
