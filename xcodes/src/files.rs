//! Filesystem collaborator.
//!
//! Every path the pipeline touches goes through [`FileSystem`] so tests can
//! substitute an in-memory implementation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

/// Filesystem operations used by the pipeline.
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Read a file into memory.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Read a UTF-8 file into memory.
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Create (or replace) a file with the given contents.
    fn create_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Permanently delete a file or directory tree.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Move a file or directory.
    fn move_item(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Move an item to the user's Trash and return where it ended up.
    fn trash(&self, path: &Path) -> io::Result<PathBuf>;

    /// List the direct children of a directory.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Create a directory and all of its parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`FileSystem`] backed by the real disk.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    trash_dir: PathBuf,
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileSystem {
    /// Create a filesystem that trashes into `~/.Trash`.
    pub fn new() -> Self {
        let trash_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".Trash");
        Self { trash_dir }
    }

    /// Create a filesystem with a custom trash directory.
    pub fn with_trash_dir(trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            trash_dir: trash_dir.into(),
        }
    }

    /// Pick a free name in the trash for `name`.
    fn trash_destination(&self, name: &str) -> PathBuf {
        let candidate = self.trash_dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        let stamp = Local::now().format("%H.%M.%S%.3f");
        self.trash_dir.join(format!("{} {}", name, stamp))
    }
}

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn create_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        remove_path(path)
    }

    fn move_item(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        relocate(from, to, |from, to| fs::rename(from, to))
    }

    fn trash(&self, path: &Path) -> io::Result<PathBuf> {
        let name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
            .to_string_lossy()
            .into_owned();
        fs::create_dir_all(&self.trash_dir)?;
        let destination = self.trash_destination(&name);
        relocate(path, &destination, |from, to| fs::rename(from, to))?;
        debug!(from = %path.display(), to = %destination.display(), "Moved to trash");
        Ok(destination)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Move `from` to `to` with `rename`, falling back to copy-then-remove when
/// the rename fails (across volumes, for instance).
fn relocate(
    from: &Path,
    to: &Path,
    rename: impl FnOnce(&Path, &Path) -> io::Result<()>,
) -> io::Result<()> {
    let error = match rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if fs::symlink_metadata(from).is_err() || fs::symlink_metadata(to).is_ok() {
        return Err(error);
    }

    debug!(from = %from.display(), to = %to.display(), error = %error, "Rename failed, copying instead");
    if let Err(e) = copy_recursive(from, to) {
        // The source stays intact; drop the partial copy.
        let _ = remove_path(to);
        return Err(e);
    }
    remove_path(from)
}

/// Copy a file or directory tree, keeping symlinks as symlinks.
fn copy_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(source)?;
    if metadata.file_type().is_symlink() {
        copy_symlink(source, dest)
    } else if metadata.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
        fs::set_permissions(dest, metadata.permissions())
    } else {
        fs::copy(source, dest).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(source)?, dest)
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(source, dest).map(|_| ())
}
