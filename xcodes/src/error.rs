//! Error types for the acquisition and installation pipeline.

use std::io;
use std::path::PathBuf;

use semver::Version;
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigFileError;
use crate::download::TransferError;
use crate::process::ProcessError;
use crate::version::VersionExt;

/// Result type for pipeline operations.
pub type InstallResult<T> = Result<T, InstallError>;

/// Errors that can occur while resolving, downloading or installing an archive.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The archive could not be expanded because it is corrupt.
    #[error("The archive \"{}\" is damaged and can't be expanded.", file_name(.path))]
    DamagedArchive { path: PathBuf },

    /// The archive has an extension the pipeline cannot expand.
    #[error("xcodes doesn't (yet) support installing Xcode from the {extension} file format.")]
    UnsupportedArchiveFormat { extension: String },

    /// No bundle was found at the install location after moving.
    #[error("Failed to move Xcode to {}.", .destination.display())]
    FailedToMove { destination: PathBuf },

    /// Gatekeeper rejected the installed bundle.
    #[error(
        "Xcode {} failed its security assessment with the following output:\n{output}\nIt remains installed at {} if you wish to use it anyways.",
        .version.xcode_description(),
        .path.display()
    )]
    SecurityAssessmentFailed {
        path: PathBuf,
        version: Version,
        output: String,
    },

    /// The code signing verifier exited unsuccessfully.
    #[error("The downloaded Xcode failed code signing verification with the following output:\n{output}")]
    CodesignVerifyFailed { output: String },

    /// The bundle is signed, but not by the expected identity.
    #[error(
        "The downloaded Xcode doesn't have the expected code signing identity.\nGot:\n  {team_identifier}\n  {authority_chain:?}\nExpected:\n  {expected_team}\n  {expected_chain:?}"
    )]
    SigningMismatch {
        team_identifier: String,
        authority_chain: Vec<String>,
        expected_team: String,
        expected_chain: Vec<String>,
    },

    /// There is no valid session to attach to the download request.
    #[error("Missing or expired download session. Sign in and try again.")]
    MissingCredential,

    /// The superuser password prompt returned nothing.
    #[error("Missing password. Please try again.")]
    MissingPassword,

    /// The requested version is already installed.
    #[error("{} is already installed at {}", .version.xcode_description(), .path.display())]
    AlreadyInstalled { version: Version, path: PathBuf },

    /// The catalog has no entry for the requested version.
    #[error("Could not find version {}.", .0.xcode_description())]
    VersionUnavailable(Version),

    /// The catalog lists no release versions.
    #[error("No non-prerelease versions available.")]
    NoNonPrereleaseVersionAvailable,

    /// The catalog lists no dated prerelease versions.
    #[error("No prerelease versions available.")]
    NoPrereleaseVersionAvailable,

    /// Nothing is installed for the requested version.
    #[error("{} is not installed.", .0.xcode_description())]
    VersionNotInstalled(Version),

    /// The version string could not be parsed.
    #[error("{0} is not a valid version number.")]
    InvalidVersionString(String),

    /// Every download attempt failed.
    #[error("download failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        last: TransferError,
    },

    /// The HTTP client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),

    /// A download for this archive is already running in this process.
    #[error("a download of Xcode {0} is already in progress")]
    DownloadInProgress(Version),

    /// The archive directory holds no archives.
    #[error("There are no downloaded archives available")]
    NoDownloadedArchives,

    /// No downloaded archive matches the requested version.
    #[error("The archive for {version} could not be found. Possible candidates for removal:\n{}", .candidates.join("\n"))]
    MissingArchive {
        version: String,
        candidates: Vec<String>,
    },

    /// An external tool failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The catalog could not be read.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The configuration file is invalid.
    #[error(transparent)]
    Config(#[from] ConfigFileError),

    /// A filesystem operation failed.
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    /// Build an [`InstallError::Io`] for a failed filesystem action.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether the error is the damaged-archive signal that triggers a redownload.
    pub fn is_damaged_archive(&self) -> bool {
        matches!(self, Self::DamagedArchive { .. })
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
