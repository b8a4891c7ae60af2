//! xcodes - Xcode archive acquisition and installation
//!
//! This library downloads Xcode archives (resumably, optionally through
//! `aria2c`), expands them, moves the result into place and checks its
//! signature before running the privileged first-launch steps.
//!
//! # High-Level API
//!
//! The [`pipeline`] module provides the [`Installer`] facade:
//!
//! ```ignore
//! use std::sync::Arc;
//! use xcodes::config::{ConfigFile, InstallerConfig};
//! use xcodes::{Environment, InstallationRequest, Installer, StaticSession};
//!
//! let config = InstallerConfig::from(&ConfigFile::load()?);
//! let session = Arc::new(StaticSession::from_env_or(None));
//! let env = Environment::system(&config, session)?;
//!
//! let installer = Installer::new(config, env);
//! installer.install(&InstallationRequest::Version("11.2".into()), true)?;
//! ```

pub mod archive;
pub mod catalog;
pub mod config;
pub mod download;
pub mod environment;
pub mod error;
pub mod files;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod resolver;
pub mod security;
pub mod session;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use archive::{ArchiveReference, DownloadedArchive, InstalledBundle};
pub use environment::Environment;
pub use error::{InstallError, InstallResult};
pub use pipeline::{AvailableVersion, InstallOutcome, Installer};
pub use resolver::InstallationRequest;
pub use session::{SessionProvider, StaticSession};

/// Version of the xcodes library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
