//! The `import` command: reads every configured source, file by file, and inserts its
//! transactions into the account sheet and the Details sheet of the ledger workbook.

use crate::args::ImportArgs;
use crate::commands::Out;
use crate::config::Source;
use crate::dedup::{identity_raw_map, KeyCache};
use crate::ingest::{collect_all, has_extension, normalize, read_csv, DateRange, DELIMITED_EXTENSIONS};
use crate::insert::{insert_into_account_sheet, insert_into_details, AccountTarget, DetailsTarget};
use crate::model::ledger::OCCUPANCY_COLUMNS;
use crate::model::TransactionRecord;
use crate::sheet::{WorkbookStore, XlsxStore};
use crate::{backup, Config, Result};
use anyhow::ensure;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// What one source contributed to the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    name: String,
    account_sheet: Option<String>,
    files: usize,
    rows: usize,
    nat: usize,
    account_added: usize,
    details_added: usize,
    existing: usize,
    deduped: usize,
    skipped: bool,
}

impl SourceReport {
    fn new(source: &Source) -> Self {
        Self {
            name: source.name().to_string(),
            account_sheet: source.account_sheet().map(str::to_string),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of input files that matched the source's patterns.
    pub fn files(&self) -> usize {
        self.files
    }

    /// Rows that reached insertion, after the date filter.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Rows whose date could not be parsed.
    pub fn nat(&self) -> usize {
        self.nat
    }

    pub fn account_added(&self) -> usize {
        self.account_added
    }

    pub fn details_added(&self) -> usize {
        self.details_added
    }

    /// Data rows already in the account sheet before this run touched it.
    pub fn existing(&self) -> usize {
        self.existing
    }

    /// Rows recognized as already present in the Details sheet.
    pub fn deduped(&self) -> usize {
        self.deduped
    }

    /// True when the source was skipped as a whole.
    pub fn skipped(&self) -> bool {
        self.skipped
    }

    fn has_data(&self) -> bool {
        self.account_added > 0 || self.details_added > 0
    }

    /// Only sources with an account sheet can disagree with the Details sheet.
    fn is_discrepant(&self) -> bool {
        self.account_sheet.is_some() && self.account_added != self.details_added
    }
}

/// The outcome of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    workbook: String,
    dry_run: bool,
    sources: Vec<SourceReport>,
}

impl ImportReport {
    /// Where the rows were written, or would have been for a dry run.
    pub fn workbook(&self) -> &str {
        &self.workbook
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// One report per configured source, in configuration order.
    pub fn sources(&self) -> &[SourceReport] {
        &self.sources
    }

    pub fn sources_with_data(&self) -> usize {
        self.sources.iter().filter(|s| s.has_data()).count()
    }

    pub fn account_added(&self) -> usize {
        self.sources.iter().map(|s| s.account_added).sum()
    }

    pub fn details_added(&self) -> usize {
        self.sources.iter().map(|s| s.details_added).sum()
    }

    pub fn existing(&self) -> usize {
        self.sources.iter().map(|s| s.existing).sum()
    }

    pub fn deduped(&self) -> usize {
        self.sources.iter().map(|s| s.deduped).sum()
    }

    pub fn nat(&self) -> usize {
        self.sources.iter().map(|s| s.nat).sum()
    }

    /// Sources whose account sheet and Details sheet received a different number of rows.
    pub fn discrepancies(&self) -> Vec<&SourceReport> {
        self.sources.iter().filter(|s| s.is_discrepant()).collect()
    }

    fn log_summary(&self) {
        info!(
            "Summary: {} sources processed, {} had data",
            self.sources.len(),
            self.sources_with_data()
        );
        info!(
            "per-account added={}, details added={}",
            self.account_added(),
            self.details_added()
        );
        let by_account = self
            .sources
            .iter()
            .map(|s| format!("{}={}", s.name, s.existing))
            .collect::<Vec<_>>()
            .join(", ");
        info!("Pre-existing by account: {by_account}");
        info!(
            "Pre-existing rows={}, Deduped rows={}, NaT (Not a Time) total={}",
            self.existing(),
            self.deduped(),
            self.nat()
        );

        let discrepancies = self.discrepancies();
        if !discrepancies.is_empty() {
            warn!(
                "Deduplication mismatch: per-account added {}, details added {}",
                discrepancies.iter().map(|s| s.account_added).sum::<usize>(),
                discrepancies.iter().map(|s| s.details_added).sum::<usize>()
            );
            for s in discrepancies {
                warn!(
                    "  {}: per-account={}, details={}",
                    s.name, s.account_added, s.details_added
                );
            }
        }
    }
}

/// Imports every configured source into the target workbook.
///
/// Unless this is a dry run or `--in-place` is given, the workbook is first copied to a
/// timestamped working copy and only the copy is changed. A dry run reads the target workbook and
/// writes nothing.
pub fn import(config: &Config, args: ImportArgs) -> Result<Out<ImportReport>> {
    if let (Some(start), Some(end)) = (args.start(), args.end()) {
        ensure!(start <= end, "The start date {start} is after the end date {end}");
    }

    let original = XlsxStore::open(config.target_workbook())?;
    info!("Original workbook: {}", original.path().display());
    let store = if args.dry_run() {
        info!("Dry run: no changes will be written");
        original
    } else if args.in_place() {
        warn!("Importing in place into {}", original.path().display());
        original
    } else {
        let copy = backup::create_working_copy(original.path())?;
        XlsxStore::open(copy)?
    };

    let range = DateRange::new(args.start(), args.end());
    let report = run_import(config, &store, range, args.dry_run())?;
    report.log_summary();

    let message = if report.dry_run() {
        format!(
            "(dry-run) No changes written. {} rows would be added to '{}' and {} to account sheets",
            report.details_added(),
            config.details_sheet(),
            report.account_added()
        )
    } else {
        format!(
            "Done. Added {} rows to '{}' and {} to account sheets in {}",
            report.details_added(),
            config.details_sheet(),
            report.account_added(),
            report.workbook()
        )
    };
    Ok(Out::new(message, report))
}

/// Runs every source of `config` against `store`, sharing one key cache across the whole run.
pub(crate) fn run_import<S>(
    config: &Config,
    store: &S,
    range: DateRange,
    dry_run: bool,
) -> Result<ImportReport>
where
    S: WorkbookStore + ?Sized,
{
    let mut cache = KeyCache::new();
    let mut sources = Vec::with_capacity(config.sources().len());
    for source in config.sources() {
        sources.push(import_source(config, source, store, range, dry_run, &mut cache)?);
    }
    debug!("Key cache holds {} keys at the end of the run", cache.len());
    Ok(ImportReport {
        workbook: store.describe(),
        dry_run,
        sources,
    })
}

fn import_source<S>(
    config: &Config,
    source: &Source,
    store: &S,
    range: DateRange,
    dry_run: bool,
    cache: &mut KeyCache,
) -> Result<SourceReport>
where
    S: WorkbookStore + ?Sized,
{
    info!("Source: {}", source.name());
    let mut report = SourceReport::new(source);

    let files = collect_all(source.files());
    report.files = files.len();
    if files.is_empty() {
        warn!(
            "Source '{}': no files matched {:?}",
            source.name(),
            source.files()
        );
    } else {
        info!("Source '{}': {} matched files", source.name(), files.len());
        for path in &files {
            info!("  {}", path.display());
        }
    }

    let Some(raw_map) = resolve_raw_map(store, source) else {
        report.skipped = true;
        return Ok(report);
    };
    if source.account_sheet().is_some() {
        debug!("Raw map headers: {:?}", raw_map.keys().collect::<Vec<_>>());
    }

    let mut existing = None;
    for path in &files {
        let Some(records) = read_file(path, source, range, &mut report)? else {
            continue;
        };
        report.rows += records.len();

        if let Some(sheet) = source.account_sheet() {
            let target = AccountTarget {
                sheet,
                bank: source.bank_label(),
                account: source.account_label(),
                source,
                raw_map: &raw_map,
                dry_run,
            };
            let outcome = insert_into_account_sheet(store, &target, &records, cache)?;
            existing.get_or_insert(outcome.existing());
            report.account_added += outcome.added();
            cache.merge_account(sheet, outcome.into_new_keys());
        }

        let target = DetailsTarget {
            sheet: config.details_sheet(),
            bank: source.bank_label(),
            account: source.account_label(),
            label_columns: config.label_columns(),
            dry_run,
        };
        let outcome = insert_into_details(store, &target, &records, cache)?;
        report.details_added += outcome.added();
        cache.merge_details(outcome.into_new_keys());
    }

    report.existing = match (existing, source.account_sheet()) {
        (Some(existing), _) => existing,
        (None, Some(sheet)) => {
            let existing = count_existing_rows(store, sheet);
            info!("No new data, but found {existing} existing records in '{sheet}'");
            existing
        }
        (None, None) => 0,
    };
    report.deduped = report.rows - report.details_added;
    info!(
        "Source '{}': existing records {}, per-account added {}, details added {}",
        source.name(),
        report.existing,
        report.account_added,
        report.details_added
    );
    Ok(report)
}

/// Reads and normalizes one file, returning its records within `range`. Returns `None` when the
/// file is skipped or has nothing to insert.
fn read_file(
    path: &Path,
    source: &Source,
    range: DateRange,
    report: &mut SourceReport,
) -> Result<Option<Vec<TransactionRecord>>> {
    if !has_extension(path, DELIMITED_EXTENSIONS) {
        warn!("Skipping {}: not a delimited text file", path.display());
        return Ok(None);
    }
    let table = read_csv(path, &source.csv_options())?;
    info!("{}: {} rows read", path.display(), table.len());
    debug!("CSV headers: {:?}", table.headers());

    let normalized = match normalize(&table, source) {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!("Skipping {}: {e}", path.display());
            return Ok(None);
        }
    };
    let nat = normalized.nat_count();
    report.nat += nat;
    if nat > 0 {
        warn!(
            "{}: NaT count {nat} of {} (dates that could not be parsed are dropped)",
            path.display(),
            normalized.len()
        );
    }
    if let Some((first, last)) = normalized.date_bounds() {
        info!("{}: dates {first} .. {last}", path.display());
    }

    let records = normalized.into_records(range);
    info!("{}: {} rows after date filter", path.display(), records.len());
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(records))
}

/// The account sheet header to CSV column map for `source`. With `auto_raw_from_sheet` it is the
/// identity over the account sheet's raw headers. Returns `None` when the source must be skipped
/// because the workbook or the account sheet cannot be read.
fn resolve_raw_map<S>(store: &S, source: &Source) -> Option<BTreeMap<String, String>>
where
    S: WorkbookStore + ?Sized,
{
    let (true, Some(sheet_name)) = (source.auto_raw_from_sheet(), source.account_sheet()) else {
        return Some(source.raw_map().cloned().unwrap_or_default());
    };
    let workbook = match store.load() {
        Ok(workbook) => workbook,
        Err(e) => {
            warn!(
                "Skipping source '{}': cannot read the workbook for auto_raw_from_sheet: {e:#}",
                source.name()
            );
            return None;
        }
    };
    let Some(sheet) = workbook.sheet(sheet_name) else {
        warn!(
            "Skipping source '{}': account sheet '{sheet_name}' not found for auto_raw_from_sheet",
            source.name()
        );
        return None;
    };
    Some(identity_raw_map(sheet))
}

/// Data rows in the account sheet `sheet`, or 0 if it cannot be read.
fn count_existing_rows<S>(store: &S, sheet: &str) -> usize
where
    S: WorkbookStore + ?Sized,
{
    match store.load() {
        Ok(workbook) => workbook
            .sheet(sheet)
            .map(|s| s.count_occupied_rows(OCCUPANCY_COLUMNS))
            .unwrap_or(0),
        Err(e) => {
            warn!("Failed to count existing records in '{sheet}': {e:#}");
            0
        }
    }
}
