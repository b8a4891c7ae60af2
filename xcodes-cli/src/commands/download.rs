//! Download command - fetch an archive without installing it.

use clap::Args;
use xcodes::version::VersionExt;
use xcodes::DownloadedArchive;

use crate::commands::common::RequestArgs;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `xcodes download`.
#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// List archives that are already downloaded instead
    #[arg(long, conflicts_with_all = ["version", "latest", "latest_prerelease"])]
    pub list: bool,
}

/// Run the download command.
pub fn run(runner: &CliRunner, args: &DownloadArgs) -> Result<(), CliError> {
    runner.log_startup("download");
    let installer = runner.installer(&args.request.aria2_choice())?;

    if args.list {
        let directory = args
            .request
            .path
            .clone()
            .unwrap_or_else(|| installer.config().archive_dir.clone());
        let archives = installer.downloaded_archives_in(&directory);
        if archives.is_empty() {
            println!("No downloaded archives in {}", directory.display());
        }
        for archive in &archives {
            println!("{}", archive_line(archive));
        }
        return Ok(());
    }

    installer.install(&args.request.request(), false)?;
    Ok(())
}

fn archive_line(archive: &DownloadedArchive) -> String {
    format!(
        "{}\t{}",
        archive.version.xcode_description(),
        archive.path.display()
    )
}
