//! Installed command - list installed versions.

use xcodes::version::VersionExt;
use xcodes::InstalledBundle;

use crate::error::CliError;
use crate::runner::{Aria2Choice, CliRunner};

/// Run the installed command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("installed");
    let installer = runner.installer(&Aria2Choice::Configured)?;
    for bundle in installer.installed_bundles() {
        println!("{}", bundle_line(&bundle));
    }
    Ok(())
}

fn bundle_line(bundle: &InstalledBundle) -> String {
    format!(
        "{}\t{}",
        bundle.version.xcode_description(),
        bundle.path.display()
    )
}
