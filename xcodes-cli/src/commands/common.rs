//! Common argument types shared across CLI commands.

use std::path::PathBuf;

use clap::Args;
use xcodes::InstallationRequest;

use crate::runner::Aria2Choice;

/// Which Xcode to install or download, and how to fetch it.
#[derive(Debug, Clone, Default, Args)]
pub struct RequestArgs {
    /// Version to use, e.g. `11.2` or `12.0 Beta 3`. Defaults to the
    /// version in `.xcode-version` in the current directory.
    #[arg(conflicts_with_all = ["latest", "latest_prerelease"])]
    pub version: Vec<String>,

    /// Local archive to install from. When only downloading, the directory
    /// to download into.
    #[arg(long, value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Use the newest release
    #[arg(long, conflicts_with_all = ["latest_prerelease", "path"])]
    pub latest: bool,

    /// Use the newest prerelease by release date
    #[arg(long, conflicts_with = "path")]
    pub latest_prerelease: bool,

    /// Download with aria2c at this path
    #[arg(long, value_name = "PATH", conflicts_with = "no_aria2")]
    pub aria2: Option<PathBuf>,

    /// Never download with aria2c, even when it is installed
    #[arg(long)]
    pub no_aria2: bool,
}

impl RequestArgs {
    /// The version words joined back together.
    pub fn version_string(&self) -> String {
        join_version(&self.version)
    }

    pub fn request(&self) -> InstallationRequest {
        if self.latest {
            return InstallationRequest::Latest;
        }
        if self.latest_prerelease {
            return InstallationRequest::LatestPrerelease;
        }
        let version = self.version_string();
        match &self.path {
            Some(path) => InstallationRequest::Path {
                path: path.clone(),
                version: (!version.is_empty()).then_some(version),
            },
            None => InstallationRequest::Version(version),
        }
    }

    pub fn aria2_choice(&self) -> Aria2Choice {
        match (&self.aria2, self.no_aria2) {
            (_, true) => Aria2Choice::Disabled,
            (Some(path), false) => Aria2Choice::Path(path.clone()),
            (None, false) => Aria2Choice::Configured,
        }
    }
}

/// `["12.0", "Beta", "3"]` -> `"12.0 Beta 3"`.
pub fn join_version(words: &[String]) -> String {
    words
        .iter()
        .map(|word| word.trim())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
