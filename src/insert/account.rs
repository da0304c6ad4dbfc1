use super::{clone_row_template, guarded_write, InsertOutcome};
use crate::config::Source;
use crate::dedup::{
    is_date_header, lookup_raw, raw_columns, AccountKeyStrategy, DedupKey, DuplicateDetector,
    KeyCache,
};
use crate::ingest::dates::{coerce_date, parse_generic};
use crate::model::ledger::{self, OCCUPANCY_COLUMNS, TEMPLATE_COLUMNS};
use crate::model::TransactionRecord;
use crate::sheet::formula::MAX_ROWS;
use crate::sheet::{CellValue, Workbook, WorkbookStore, Worksheet};
use crate::Result;
use anyhow::ensure;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Where a batch of records goes among the account sheets.
#[derive(Debug, Clone, Copy)]
pub struct AccountTarget<'a> {
    pub sheet: &'a str,
    pub bank: &'a str,
    pub account: &'a str,
    /// The source the records came from; its declared columns choose the key.
    pub source: &'a Source,
    /// Account sheet header to CSV column.
    pub raw_map: &'a BTreeMap<String, String>,
    pub dry_run: bool,
}

/// Appends `records` to an account sheet below its last data row, carrying the bank's raw columns
/// through `raw_map`.
///
/// Records whose key is already on the sheet, or in `cache`, are skipped. When the sheet has no
/// usable key columns every record is appended.
pub fn insert_into_account_sheet<S>(
    store: &S,
    target: &AccountTarget<'_>,
    records: &[TransactionRecord],
    cache: &KeyCache,
) -> Result<InsertOutcome>
where
    S: WorkbookStore + ?Sized,
{
    if records.is_empty() {
        return Ok(InsertOutcome::default());
    }
    let mut workbook = store.load()?;
    let outcome = insert_account(&mut workbook, target, records, cache)?;
    if !target.dry_run && outcome.added() > 0 {
        store.save(&workbook)?;
    }
    debug!(
        "Account sheet '{}': {} added, {} duplicates, {} existing",
        target.sheet,
        outcome.added(),
        outcome.duplicates(),
        outcome.existing()
    );
    Ok(outcome)
}

/// A raw column to fill on every new row.
struct RawWrite<'a> {
    col: u16,
    csv_col: &'a str,
    is_date: bool,
}

fn insert_account(
    workbook: &mut Workbook,
    target: &AccountTarget<'_>,
    records: &[TransactionRecord],
    cache: &KeyCache,
) -> Result<InsertOutcome> {
    let sheet = workbook.require_sheet(target.sheet)?;
    let headers = sheet.header_map();
    let bank_col = headers.get(ledger::BANK).copied();
    let account_col = headers.get(ledger::ACCOUNT).copied();
    let raw: HashMap<String, u16> = raw_columns(sheet).into_iter().collect();

    let writes: Vec<RawWrite<'_>> = target
        .raw_map
        .iter()
        .filter_map(|(header, csv_col)| match raw.get(header.trim()) {
            Some(col) => Some(RawWrite {
                col: *col,
                csv_col: csv_col.as_str(),
                is_date: is_date_header(header),
            }),
            None => {
                warn!("Sheet '{}' has no raw column '{header}'", target.sheet);
                None
            }
        })
        .collect();

    let strategy = AccountKeyStrategy::resolve(sheet, target.source, target.raw_map);
    let mut known: HashSet<DedupKey> = strategy.scan(sheet);
    known.extend(cache.account(target.sheet).cloned());

    let mut outcome = InsertOutcome {
        existing: sheet.count_occupied_rows(OCCUPANCY_COLUMNS),
        ..InsertOutcome::default()
    };
    let mut last = last_data_row(sheet, bank_col, account_col);
    let donor = find_donor(sheet, last);

    for record in records {
        let key = strategy.incoming_key(record);
        if let Some(key) = &key {
            if known.contains(key) {
                outcome.duplicates += 1;
                continue;
            }
            known.insert(key.clone());
        }
        if !target.dry_run {
            ensure!(
                last < MAX_ROWS,
                "Sheet '{}' has no room for another row",
                target.sheet
            );
            let row = last + 1;
            workbook.insert_row(target.sheet, row)?;
            let sheet = workbook.require_sheet_mut(target.sheet)?;
            if let Some(donor) = donor {
                clone_row_template(sheet, donor, row, TEMPLATE_COLUMNS);
            }
            guarded_write(sheet, row, bank_col, target.bank);
            guarded_write(sheet, row, account_col, target.account);
            for write in &writes {
                let value = lookup_raw(record, write.csv_col)
                    .map(|text| raw_cell_value(text, write.is_date))
                    .unwrap_or_default();
                if !value.is_empty() {
                    guarded_write(sheet, row, Some(write.col), value);
                }
            }
            last = row;
        }
        outcome.record_added(key);
    }
    Ok(outcome)
}

/// The last row with a bank or account. Sheets without either header fall back to any value.
fn last_data_row(sheet: &Worksheet, bank_col: Option<u16>, account_col: Option<u16>) -> u32 {
    let cols: Vec<u16> = [bank_col, account_col].into_iter().flatten().collect();
    if cols.is_empty() {
        let all: Vec<u16> = (1..=sheet.max_column()).collect();
        return sheet.last_data_row(&all);
    }
    sheet.last_data_row(&cols)
}

/// The closest data row at or above `last` with a formula in the template columns, or `last`
/// itself when no row has one. `None` when the sheet has no data rows.
fn find_donor(sheet: &Worksheet, last: u32) -> Option<u32> {
    if last < 2 {
        return None;
    }
    (2..=last)
        .rev()
        .find(|row| sheet.row_has_formula(*row, TEMPLATE_COLUMNS))
        .or(Some(last))
}

/// The cell value for raw CSV text: dates under date-like headers, plain numbers as numbers, and
/// anything else as text.
fn raw_cell_value(text: &str, is_date: bool) -> CellValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return CellValue::Empty;
    }
    if is_date {
        if let Some(d) = coerce_date(trimmed).or_else(|| parse_generic(trimmed)) {
            return CellValue::Date(d);
        }
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        _ => CellValue::text(text),
    }
}
