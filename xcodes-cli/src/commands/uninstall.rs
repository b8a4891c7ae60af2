//! Uninstall command - move an installed version to the Trash.

use crate::commands::common::join_version;
use crate::error::CliError;
use crate::runner::{Aria2Choice, CliRunner};

/// Run the uninstall command.
pub fn run(runner: &CliRunner, version: &[String]) -> Result<(), CliError> {
    runner.log_startup("uninstall");
    let installer = runner.installer(&Aria2Choice::Configured)?;
    installer.uninstall(&join_version(version))?;
    Ok(())
}
