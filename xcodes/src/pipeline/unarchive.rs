//! Archive expansion and relocation.
//!
//! This module handles:
//! - Rejecting archive formats that can't be expanded
//! - Expanding `.xip` archives with `xip`
//! - Moving the expanded bundle to its install location

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::InstalledBundle;
use crate::error::{InstallError, InstallResult};
use crate::files::FileSystem;
use crate::process::{ProcessError, ProcessRunner, ToolCommand};

/// Location of the `xip` tool.
pub const XIP_PATH: &str = "/usr/bin/xip";

/// Bundle names `xip` may produce, in the order they are looked for.
pub const EXPANDED_BUNDLE_NAMES: [&str; 2] = ["Xcode.app", "Xcode-beta.app"];

/// Diagnostic `xip` prints for a corrupt archive. It may use either apostrophe.
const DAMAGED_MARKERS: [&str; 2] = ["damaged and can’t be expanded", "damaged and can't be expanded"];

/// Expands archives with `xip` and moves the result into place.
pub struct XipUnarchiver<'a> {
    runner: &'a dyn ProcessRunner,
    files: &'a dyn FileSystem,
}

impl<'a> XipUnarchiver<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, files: &'a dyn FileSystem) -> Self {
        Self { runner, files }
    }

    /// Fail unless `archive` is a `.xip`.
    pub fn check_format(archive: &Path) -> InstallResult<()> {
        let extension = archive
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if extension == "xip" {
            Ok(())
        } else {
            Err(InstallError::UnsupportedArchiveFormat {
                extension: if extension.is_empty() {
                    "extensionless".to_string()
                } else {
                    extension
                },
            })
        }
    }

    /// Expand `archive` next to itself and return the expanded bundle.
    ///
    /// # Errors
    ///
    /// [`InstallError::DamagedArchive`] when `xip` reports corruption, the
    /// tool failure otherwise.
    pub fn expand(&self, archive: &Path) -> InstallResult<PathBuf> {
        Self::check_format(archive)?;

        let directory = archive.parent().unwrap_or_else(|| Path::new("."));
        let command = ToolCommand::new(XIP_PATH)
            .arg("--expand")
            .arg(archive.display().to_string())
            .current_dir(directory);

        info!(archive = %archive.display(), "Expanding archive");
        self.runner.run(&command).map_err(|e| match e {
            ProcessError::Execution { ref stderr, .. } if is_damaged(stderr) => {
                InstallError::DamagedArchive {
                    path: archive.to_path_buf(),
                }
            }
            other => InstallError::Process(other),
        })?;

        let expanded = EXPANDED_BUNDLE_NAMES
            .iter()
            .map(|name| directory.join(name))
            .find(|path| self.files.exists(path))
            .unwrap_or_else(|| directory.join(EXPANDED_BUNDLE_NAMES[0]));
        debug!(bundle = %expanded.display(), "Archive expanded");
        Ok(expanded)
    }

    /// Move an expanded bundle to `destination` and read it back.
    ///
    /// # Errors
    ///
    /// [`InstallError::FailedToMove`] when nothing usable is at
    /// `destination` afterwards.
    pub fn relocate(&self, expanded: &Path, destination: &Path) -> InstallResult<InstalledBundle> {
        let failed = || InstallError::FailedToMove {
            destination: destination.to_path_buf(),
        };
        if !self.files.exists(expanded) {
            return Err(failed());
        }

        self.files
            .move_item(expanded, destination)
            .map_err(|e| InstallError::io("Failed to move Xcode to", destination, e))?;

        InstalledBundle::load(self.files, destination).ok_or_else(failed)
    }
}

fn is_damaged(stderr: &str) -> bool {
    DAMAGED_MARKERS.iter().any(|marker| stderr.contains(marker))
}
