use clap::Parser;
use ledger_ingest::args::{Args, Command};
use ledger_ingest::logfile::create_log_file;
use ledger_ingest::{commands, Config, Result};
use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{debug, error, info, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();

    // The log file has to exist before the subscriber is installed, so its failure is reported
    // once logging is up.
    let dry_run = matches!(args.command(), Command::Import(import) if import.dry_run());
    let log_file = args
        .common()
        .log_dir()
        .map(|dir| create_log_file(dir, dry_run));
    let (log_path, file, log_file_error) = match log_file {
        Some(Ok((path, file))) => (Some(path), Some(file), None),
        Some(Err(e)) => (None, None, Some(e)),
        None => (None, None, None),
    };

    init_logger(log_level, file);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());
    if let Some(e) = log_file_error {
        error!("Exiting with error: {e:#}");
        return ExitCode::FAILURE;
    }
    if let Some(path) = log_path {
        info!("Logging to {}", path.display());
    }

    match main_inner(args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let config = Config::load(args.common().config())?;

    let _: () = match args.command() {
        Command::Import(import_args) => commands::import(&config, import_args.clone())?.print(),
        Command::Check => commands::check(&config)?.print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber. Events go to stderr and, when `file` is given, also to
/// that file without ANSI colors.
pub fn init_logger(level: LevelFilter, file: Option<File>) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
}
