//! List command - every version the catalog knows, plus what is installed.

use console::style;
use xcodes::version::VersionExt;
use xcodes::AvailableVersion;

use crate::error::CliError;
use crate::runner::{Aria2Choice, CliRunner};

/// Run the list command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    runner.log_startup("list");
    let installer = runner.installer(&Aria2Choice::Configured)?;
    let versions = installer.available_versions();

    if versions.is_empty() {
        println!("No versions available. Configure [catalog] source_url to refresh the list.");
        return Ok(());
    }
    for version in &versions {
        let row = version_row(version);
        if version.is_installed() {
            println!("{}", style(row).green());
        } else {
            println!("{}", row);
        }
    }
    Ok(())
}

fn version_row(version: &AvailableVersion) -> String {
    let mut row = version.version.xcode_description();
    if let Some(date) = version.release_date {
        row.push_str(&format!(" [{}]", date.format("%Y-%m-%d")));
    }
    if version.is_installed() {
        row.push_str(" (Installed)");
    }
    row
}
