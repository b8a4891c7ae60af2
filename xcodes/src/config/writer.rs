//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::file::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let source_url = config.catalog.source_url.as_deref().unwrap_or("");
    let cookie = config.session.cookie.as_deref().unwrap_or("");

    format!(
        r#"[paths]
; Directory Xcode bundles are installed into (default: /Applications)
install_dir = {}
; Directory archives are downloaded to
archive_dir = {}

[download]
; Location of aria2c, used for multi-connection downloads when present
aria2_path = {}
; Set to false to always use the built-in HTTP downloader
use_aria2 = {}
; Timeout in seconds for HTTP requests (default: 300)
timeout_secs = {}
; Total download attempts including the first (default: 3)
max_attempts = {}

[catalog]
; Cached list of downloadable versions
cache_file = {}
; Hours before the cached list is considered stale (default: 24)
max_age_hours = {}
; URL serving the catalog JSON. If empty, only the cache file is used
source_url = {}

[session]
; Download session cookie. XCODES_SESSION_COOKIE overrides this value
cookie = {}

[logging]
; Log file, truncated at the start of every run
file = {}
"#,
        path_to_string(&config.paths.install_dir),
        path_to_string(&config.paths.archive_dir),
        path_to_string(&config.download.aria2_path),
        config.download.use_aria2,
        config.download.timeout_secs,
        config.download.max_attempts,
        path_to_string(&config.catalog.cache_file),
        config.catalog.max_age_hours,
        source_url,
        cookie,
        path_to_string(&config.logging.file),
    )
}

fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
