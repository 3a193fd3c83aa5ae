//! # dirsync CLI
//!
//! Mirror a source directory into a destination directory, then keep the
//! destination up to date as the source changes.
//!
//! Usage:
//!   dirsync <source_dir> <destination_dir>

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use dirsync_config::path::MirrorRoots;
use dirsync_config::{log_cli_error, log_cli_info, Config, LogLevel};

/// One-way directory mirror: full sync, then incremental sync on change
#[derive(Parser, Debug)]
#[command(name = "dirsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory to mirror from
    #[arg(value_name = "SOURCE_DIR")]
    source: PathBuf,

    /// Directory to mirror into (created if missing)
    #[arg(value_name = "DESTINATION_DIR")]
    destination: PathBuf,

    /// Config file layered over ~/.dirsync/config.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (overridden by DIRSYNC_LOG / RUST_LOG)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Run the initial full sync and exit without watching
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    dirsync_config::logging::init_logging(cli.log_level.unwrap_or(config.log.level));

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_cli_error!(error = %format!("{e:#}"), "Exiting");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    let roots = MirrorRoots::resolve(&cli.source, &cli.destination)
        .context("Invalid source/destination pair")?;

    log_cli_info!(
        source = %roots.source().display(),
        dest = %roots.dest().display(),
        once = cli.once,
        "Starting dirsync"
    );

    if cli.once {
        let report = dirsync_core::sync_once(&roots, config);
        if report.failures > 0 {
            anyhow::bail!("{} entries could not be mirrored", report.failures);
        }
        return Ok(());
    }

    dirsync_core::run_mirror(roots, config)
}
