//! Remove command - move a downloaded archive to the Trash.

use std::path::PathBuf;

use clap::Args;

use crate::commands::common::join_version;
use crate::error::CliError;
use crate::runner::{Aria2Choice, CliRunner};

/// Arguments for `xcodes remove`.
#[derive(Debug, Clone, Args)]
pub struct RemoveArgs {
    /// Version whose archive should be removed
    #[arg(required = true)]
    pub version: Vec<String>,

    /// Directory to look in instead of the archive directory
    #[arg(long, value_name = "DIR")]
    pub path: Option<PathBuf>,
}

/// Run the remove command.
pub fn run(runner: &CliRunner, args: &RemoveArgs) -> Result<(), CliError> {
    runner.log_startup("remove");
    let installer = runner.installer(&Aria2Choice::Configured)?;
    installer.remove_downloaded(&join_version(&args.version), args.path.as_deref())?;
    Ok(())
}
