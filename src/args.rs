//! These structs provide the CLI interface for the ledger-ingest CLI.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::filter::LevelFilter;

/// ledger-ingest: Import bank CSV exports into an Excel ledger without duplicating rows.
///
/// Each configured source names a set of CSV files from one bank account. Their transactions are
/// normalized and inserted into the ledger's Details sheet, kept sorted by bank, account and
/// date, and appended to the account's own sheet with the bank's raw columns. Rows that are
/// already in the ledger are recognized and skipped, so importing the same files twice is safe.
///
/// By default the workbook is first copied to a timestamped working copy beside it, and only the
/// copy is changed.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Import every configured source into the ledger workbook.
    ///
    /// Sources are processed in the order of the configuration file, and the files of each
    /// source one at a time. The workbook is saved after every insertion, so an interrupted
    /// import leaves a valid workbook holding everything imported up to that point.
    Import(ImportArgs),
    /// Check the configuration and the layout of the workbook without changing anything.
    Check,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// Also write the log to a file named after the current UTC time in this directory.
    #[arg(long, env = "LEDGER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// The configuration file.
    #[arg(long, env = "LEDGER_CONFIG", default_value_t = default_config_path())]
    config: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, log_dir: Option<PathBuf>, config: PathBuf) -> Self {
        Self {
            log_level,
            log_dir,
            config: config.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn config(&self) -> &DisplayPath {
        &self.config
    }
}

/// (Not shown): Args for the `ledger-ingest import` command.
#[derive(Debug, Default, Parser, Clone)]
pub struct ImportArgs {
    /// Skip transactions dated before this day (YYYY-MM-DD).
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Skip transactions dated after this day (YYYY-MM-DD).
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Read everything and report what would be added, without writing any file.
    #[arg(long)]
    dry_run: bool,

    /// Change the configured workbook itself instead of a timestamped working copy.
    #[arg(long)]
    in_place: bool,
}

impl ImportArgs {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>, dry_run: bool, in_place: bool) -> Self {
        Self {
            start,
            end,
            dry_run,
            in_place,
        }
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn in_place(&self) -> bool {
        self.in_place
    }
}

fn default_config_path() -> DisplayPath {
    DisplayPath(PathBuf::from(crate::config::DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
