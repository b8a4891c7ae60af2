//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`install`] - Download and install a version
//! - [`download`] - Download an archive only, or list downloaded archives
//! - [`installed`] - List installed versions
//! - [`list`] - List every known version
//! - [`uninstall`] - Move an installed version to the Trash
//! - [`remove`] - Move a downloaded archive to the Trash

pub mod common;
pub mod download;
pub mod install;
pub mod installed;
pub mod list;
pub mod remove;
pub mod uninstall;
