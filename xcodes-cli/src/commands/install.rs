//! Install command - download (when needed) and install a version.

use crate::commands::common::RequestArgs;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the install command.
///
/// Progress and the final message are printed by the installer's output.
pub fn run(runner: &CliRunner, args: &RequestArgs) -> Result<(), CliError> {
    runner.log_startup("install");
    let installer = runner.installer(&args.aria2_choice())?;
    installer.install(&args.request(), true)?;
    Ok(())
}
