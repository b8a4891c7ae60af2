//! xcodes CLI - Command-line interface
//!
//! This binary provides a command-line interface to the xcodes library.

mod commands;
mod error;
mod output;
mod prompt;
mod runner;

use clap::{Parser, Subcommand};

use commands::common::RequestArgs;
use commands::download::DownloadArgs;
use commands::remove::RemoveArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "xcodes")]
#[command(version = xcodes::VERSION)]
#[command(about = "Download, verify and install Xcode archives", long_about = None)]
struct Cli {
    /// Mirror log output to stderr at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download (when needed) and install a version of Xcode
    Install(RequestArgs),

    /// Download an archive without installing it
    Download(DownloadArgs),

    /// List installed versions
    Installed,

    /// List every known version, marking installed ones
    List,

    /// Move an installed version to the Trash
    Uninstall {
        /// Version to uninstall, e.g. `11.2`
        #[arg(required = true)]
        version: Vec<String>,
    },

    /// Move a downloaded archive to the Trash
    Remove(RemoveArgs),

    /// Print the version of xcodes
    Version,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Version = cli.command {
        println!("xcodes {}", xcodes::VERSION);
        return Ok(());
    }

    let runner = CliRunner::new(cli.verbose)?;
    match &cli.command {
        Commands::Install(args) => commands::install::run(&runner, args),
        Commands::Download(args) => commands::download::run(&runner, args),
        Commands::Installed => commands::installed::run(&runner),
        Commands::List => commands::list::run(&runner),
        Commands::Uninstall { version } => commands::uninstall::run(&runner, version),
        Commands::Remove(args) => commands::remove::run(&runner, args),
        Commands::Version => Ok(()),
    }
}
