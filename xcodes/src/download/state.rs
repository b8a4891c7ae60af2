//! Download task and resume state.
//!
//! A direct transfer that dies part way leaves behind a `.part` file holding
//! the bytes received so far plus a JSON side file describing them. The next
//! attempt (in this process or a later one) picks both up and continues with
//! a ranged request.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::ArchiveReference;
use crate::error::{InstallError, InstallResult};
use crate::files::FileSystem;

/// Extension of the resume side file.
pub const RESUME_DATA_EXTENSION: &str = "resumedata";

/// Suffix of the partial file a direct transfer streams into.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Opaque state that lets a direct transfer continue where it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    /// URL the partial bytes came from.
    pub url: String,
    /// Bytes already written to the partial file.
    pub bytes_received: u64,
    /// Total size announced by the server, if any.
    #[serde(default)]
    pub total_bytes: Option<u64>,
    /// `ETag` or `Last-Modified` of the partial response, used for `If-Range`.
    #[serde(default)]
    pub validator: Option<String>,
}

/// One attempt at fetching an archive.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub archive: ArchiveReference,
    pub destination: PathBuf,
    /// 1-based attempt counter.
    pub attempt_number: usize,
    /// Partial-transfer state carried over from a failed attempt.
    pub resume_token: Option<ResumeToken>,
    /// `Cookie` header value for the archive URL.
    pub cookie_header: Option<String>,
}

impl DownloadTask {
    pub fn new(archive: ArchiveReference, destination: impl Into<PathBuf>) -> Self {
        Self {
            archive,
            destination: destination.into(),
            attempt_number: 1,
            resume_token: None,
            cookie_header: None,
        }
    }

    pub fn with_attempt(mut self, attempt_number: usize) -> Self {
        self.attempt_number = attempt_number;
        self
    }

    pub fn with_resume_token(mut self, token: Option<ResumeToken>) -> Self {
        self.resume_token = token;
        self
    }

    pub fn with_cookie_header(mut self, cookie_header: Option<String>) -> Self {
        self.cookie_header = cookie_header;
        self
    }

    /// Where a direct transfer writes bytes before the final rename.
    pub fn partial_path(&self) -> PathBuf {
        partial_path(&self.destination)
    }
}

/// `<destination>.part`
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

/// `<destination stem>.resumedata`, beside the destination.
pub fn resume_data_path(destination: &Path) -> PathBuf {
    destination.with_extension(RESUME_DATA_EXTENSION)
}

/// Reads and writes the resume side file for one destination.
pub struct ResumeStore<'a> {
    files: &'a dyn FileSystem,
    path: PathBuf,
}

impl<'a> ResumeStore<'a> {
    pub fn new(files: &'a dyn FileSystem, destination: &Path) -> Self {
        Self {
            files,
            path: resume_data_path(destination),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a persisted token. Unreadable side files are treated as absent.
    pub fn load(&self) -> Option<ResumeToken> {
        if !self.files.exists(&self.path) {
            return None;
        }
        let bytes = self.files.read(&self.path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable resume data");
                None
            }
        }
    }

    /// Write `token`, replacing any previous side file.
    pub fn persist(&self, token: &ResumeToken) -> InstallResult<()> {
        let bytes = serde_json::to_vec_pretty(token).map_err(|e| {
            InstallError::io("Failed to encode resume data for", &self.path, e.into())
        })?;
        self.files
            .create_file(&self.path, &bytes)
            .map_err(|e| InstallError::io("Failed to write resume data to", &self.path, e))?;
        debug!(
            path = %self.path.display(),
            bytes_received = token.bytes_received,
            "Persisted resume data"
        );
        Ok(())
    }

    /// Remove the side file if present.
    pub fn clear(&self) -> InstallResult<()> {
        if self.files.exists(&self.path) {
            self.files
                .remove(&self.path)
                .map_err(|e| InstallError::io("Failed to remove resume data at", &self.path, e))?;
            debug!(path = %self.path.display(), "Removed resume data");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFileSystem;
    use semver::Version;

    fn token() -> ResumeToken {
        ResumeToken {
            url: "https://example.com/Xcode_11.2.xip".to_string(),
            bytes_received: 1_024,
            total_bytes: Some(4_096),
            validator: Some("\"abc\"".to_string()),
        }
    }

    #[test]
    fn test_side_file_paths() {
        let destination = Path::new("/archives/Xcode-11.2.0.xip");
        assert_eq!(
            resume_data_path(destination),
            PathBuf::from("/archives/Xcode-11.2.0.resumedata")
        );
        assert_eq!(
            partial_path(destination),
            PathBuf::from("/archives/Xcode-11.2.0.xip.part")
        );
    }

    #[test]
    fn test_task_builders() {
        let archive = ArchiveReference::new(
            Version::parse("11.2.0").unwrap(),
            "https://example.com/Xcode_11.2.xip",
            "Xcode_11.2.xip",
            None,
        );
        let task = DownloadTask::new(archive, "/archives/Xcode-11.2.0.xip")
            .with_attempt(2)
            .with_resume_token(Some(token()));

        assert_eq!(task.attempt_number, 2);
        assert_eq!(task.resume_token, Some(token()));
        assert_eq!(
            task.partial_path(),
            PathBuf::from("/archives/Xcode-11.2.0.xip.part")
        );
    }

    #[test]
    fn test_persist_load_clear() {
        let files = FakeFileSystem::new();
        let store = ResumeStore::new(&files, Path::new("/archives/Xcode-11.2.0.xip"));

        assert_eq!(store.load(), None);
        store.persist(&token()).unwrap();
        assert!(files.exists(Path::new("/archives/Xcode-11.2.0.resumedata")));
        assert_eq!(store.load(), Some(token()));

        store.clear().unwrap();
        assert_eq!(store.load(), None);
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_side_file_is_ignored() {
        let files = FakeFileSystem::new();
        files.add_file("/archives/Xcode-11.2.0.resumedata", "not json");
        let store = ResumeStore::new(&files, Path::new("/archives/Xcode-11.2.0.xip"));
        assert_eq!(store.load(), None);
    }
}
