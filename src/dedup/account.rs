use super::{normalize_text, DedupKey, DuplicateDetector};
use crate::config::Source;
use crate::ingest::columns::clean_header;
use crate::ingest::dates::to_iso_dateish;
use crate::model::ledger::FIRST_RAW_COLUMN;
use crate::model::{Amount, TransactionRecord};
use crate::sheet::{CellValue, Worksheet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn};

/// Header combinations tried, in order, when the source does not declare usable key columns.
const COMMON_KEY_GROUPS: [&[&str]; 6] = [
    &["Date", "Description", "Amount"],
    &["Posting Date", "Description", "Amount"],
    &["Post Date", "Description", "Amount"],
    &["Date", "Description", "Debit", "Credit"],
    &["Posting Date", "Description", "Debit", "Credit"],
    &["Post Date", "Description", "Debit", "Credit"],
];

/// The raw headers of an account sheet (row 1, column 11 onwards), left to right. The first
/// occurrence of a duplicated header wins.
pub fn raw_columns(sheet: &Worksheet) -> Vec<(String, u16)> {
    let mut columns: Vec<(String, u16)> = Vec::new();
    for (col, cell) in sheet.row_cells(1) {
        if col < FIRST_RAW_COLUMN {
            continue;
        }
        let header = cell.value().to_text().trim().to_string();
        if !header.is_empty() && !columns.iter().any(|(h, _)| *h == header) {
            columns.push((header, col));
        }
    }
    columns
}

/// The raw map an account sheet implies by itself: each raw header is fed by the CSV column of
/// the same name.
pub fn identity_raw_map(sheet: &Worksheet) -> BTreeMap<String, String> {
    raw_columns(sheet)
        .into_iter()
        .map(|(header, _)| (header.clone(), header))
        .collect()
}

/// Date-like raw headers hold dates, both for keys and when written.
pub(crate) fn is_date_header(header: &str) -> bool {
    header.to_lowercase().contains("date")
}

/// The text of CSV column `column` in `record`, matching the column name exactly or, failing
/// that, by cleaned name.
pub(crate) fn lookup_raw<'a>(record: &'a TransactionRecord, column: &str) -> Option<&'a str> {
    if let Some(value) = record.raw_value(column) {
        return Some(value);
    }
    let wanted = clean_header(column);
    record
        .raw()
        .iter()
        .find(|(k, _)| clean_header(k) == wanted)
        .map(|(_, v)| v.as_str())
}

/// Where the key columns of an account sheet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOrigin {
    /// The source's declared date, description and amount columns.
    DeclaredAmount,
    /// The source's declared date, description, debit and credit columns.
    DeclaredDebitCredit,
    /// A common header combination found on the sheet.
    CommonHeaders,
}

serde_plain::derive_display_from_serialize!(KeyOrigin);

/// The account sheet headers that make up a key, and where they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyGroup {
    origin: KeyOrigin,
    headers: Vec<String>,
}

impl KeyGroup {
    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyPart {
    sheet_col: u16,
    csv_col: String,
    is_date: bool,
}

/// Keys account sheet rows by a group of raw columns.
///
/// When no key group can be resolved the strategy is disabled: it produces no keys at all, so
/// every incoming row is treated as new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeyStrategy {
    group: Option<KeyGroup>,
    parts: Vec<KeyPart>,
}

impl AccountKeyStrategy {
    /// Chooses the key columns of `sheet` for `source`: the declared amount columns, then the
    /// declared debit and credit columns, then the first common header combination present on
    /// the sheet. `raw_map` maps sheet headers to CSV columns.
    pub fn resolve(sheet: &Worksheet, source: &Source, raw_map: &BTreeMap<String, String>) -> Self {
        let raw = raw_columns(sheet);
        let csv_for = |header: &str| -> String {
            raw_map
                .get(header)
                .cloned()
                .unwrap_or_else(|| header.to_string())
        };
        // The sheet header fed by CSV column `csv`.
        let header_for = |csv: &str| -> Option<String> {
            let wanted = clean_header(csv);
            raw.iter()
                .map(|(h, _)| h)
                .find(|h| raw_map.get(*h).map(|c| clean_header(c) == wanted).unwrap_or(false))
                .or_else(|| raw.iter().map(|(h, _)| h).find(|h| clean_header(h) == wanted))
                .cloned()
        };
        let declared = |names: &[Option<&str>]| -> Option<Vec<String>> {
            names
                .iter()
                .map(|name| name.and_then(|n| header_for(n)))
                .collect()
        };

        let group = declared(&[source.date_col(), source.description_col(), source.amount_col()])
            .map(|headers| KeyGroup {
                origin: KeyOrigin::DeclaredAmount,
                headers,
            })
            .or_else(|| {
                declared(&[
                    source.date_col(),
                    source.description_col(),
                    source.debit_col(),
                    source.credit_col(),
                ])
                .map(|headers| KeyGroup {
                    origin: KeyOrigin::DeclaredDebitCredit,
                    headers,
                })
            })
            .or_else(|| {
                COMMON_KEY_GROUPS
                    .iter()
                    .find(|group| group.iter().all(|h| raw.iter().any(|(r, _)| r == h)))
                    .map(|group| KeyGroup {
                        origin: KeyOrigin::CommonHeaders,
                        headers: group.iter().map(|h| h.to_string()).collect(),
                    })
            });

        let parts = match &group {
            Some(group) => group
                .headers
                .iter()
                .filter_map(|header| {
                    let (_, col) = raw.iter().find(|(h, _)| h == header)?;
                    Some(KeyPart {
                        sheet_col: *col,
                        csv_col: csv_for(header),
                        is_date: is_date_header(header),
                    })
                })
                .collect(),
            None => Vec::new(),
        };

        match &group {
            Some(group) => debug!(
                "Sheet '{}' is keyed by {} ({})",
                sheet.name(),
                group.headers.join(", "),
                group.origin
            ),
            None => warn!(
                "Sheet '{}' has no usable key columns; duplicate detection is disabled for it and \
                 every row will be treated as new",
                sheet.name()
            ),
        }
        Self { group, parts }
    }

    pub fn group(&self) -> Option<&KeyGroup> {
        self.group.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        !self.parts.is_empty()
    }
}

impl DuplicateDetector for AccountKeyStrategy {
    fn existing_key(&self, sheet: &Worksheet, row: u32) -> Option<DedupKey> {
        if !self.is_enabled() {
            return None;
        }
        let values: Vec<String> = self
            .parts
            .iter()
            .map(|p| cell_part(sheet.value(row, p.sheet_col), p.is_date))
            .collect();
        if values.iter().all(String::is_empty) {
            return None;
        }
        Some(DedupKey::Account(values))
    }

    fn incoming_key(&self, record: &TransactionRecord) -> Option<DedupKey> {
        if !self.is_enabled() {
            return None;
        }
        let values: Vec<String> = self
            .parts
            .iter()
            .map(|p| {
                let raw = lookup_raw(record, &p.csv_col).unwrap_or_default();
                if p.is_date && raw.trim().is_empty() {
                    record.date().format("%Y-%m-%d").to_string()
                } else {
                    text_part(raw, p.is_date)
                }
            })
            .collect();
        if values.iter().all(String::is_empty) {
            return None;
        }
        Some(DedupKey::Account(values))
    }
}

fn cell_part(value: &CellValue, is_date: bool) -> String {
    if value.is_empty() {
        return String::new();
    }
    if is_date {
        if let Some(d) = value.as_date() {
            return d.format("%Y-%m-%d").to_string();
        }
        return to_iso_dateish(&value.to_text());
    }
    match value.as_amount() {
        Some(amount) => amount.to_string(),
        None => normalize_text(&value.to_text()),
    }
}

fn text_part(s: &str, is_date: bool) -> String {
    if s.trim().is_empty() {
        return String::new();
    }
    if is_date {
        return to_iso_dateish(s);
    }
    match Amount::from_str(s) {
        Ok(amount) => amount.to_string(),
        Err(_) => normalize_text(s),
    }
}
