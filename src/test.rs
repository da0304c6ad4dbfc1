//! Shared test utilities: workbook and record builders and a temporary working directory.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::model::{Amount, TransactionRecord};
use crate::sheet::xlsx::write_workbook;
use crate::sheet::{Workbook, Worksheet};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;

/// The header row of the Details sheet built by [`details_sheet`].
pub(crate) const DETAILS_HEADERS: [&str; 13] = [
    "Bank",
    "Account",
    "Date",
    "Transaction Description",
    "Withdrawals",
    "Deposits",
    "Transaction Type",
    "Accrual period",
    "Reviewed by (initials)",
    "Notes",
    "Type",
    "Category",
    "Subcategory",
];

pub(crate) fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// A Details sheet holding `rows` of (bank, account, ISO date, description, signed amount).
pub(crate) fn details_sheet(rows: &[(&str, &str, &str, &str, f64)]) -> Worksheet {
    let mut sheet = Worksheet::new("Details");
    for (i, header) in DETAILS_HEADERS.iter().enumerate() {
        sheet.set_value(1, i as u16 + 1, *header);
    }
    for (i, (bank, account, day, description, amount)) in rows.iter().enumerate() {
        let row = i as u32 + 2;
        sheet.set_value(row, 1, *bank);
        sheet.set_value(row, 2, *account);
        sheet.set_value(row, 3, date(day));
        sheet.set_value(row, 4, *description);
        if *amount < 0.0 {
            sheet.set_value(row, 5, amount.abs());
            sheet.set_value(row, 6, 0.0);
        } else {
            sheet.set_value(row, 5, 0.0);
            sheet.set_value(row, 6, *amount);
        }
    }
    sheet
}

/// An account sheet named "Chase" with Bank and Account in columns 1 and 2 and `raw_headers`
/// from column 11. Each of `rows` fills the raw columns of one Chase/Checking row.
pub(crate) fn account_sheet(raw_headers: &[&str], rows: &[&[&str]]) -> Worksheet {
    let mut sheet = Worksheet::new("Chase");
    sheet.set_value(1, 1, "Bank");
    sheet.set_value(1, 2, "Account");
    for (i, header) in raw_headers.iter().enumerate() {
        sheet.set_value(1, i as u16 + 11, *header);
    }
    for (i, values) in rows.iter().enumerate() {
        let row = i as u32 + 2;
        sheet.set_value(row, 1, "Chase");
        sheet.set_value(row, 2, "Checking");
        for (j, value) in values.iter().enumerate() {
            if !value.is_empty() {
                sheet.set_value(row, j as u16 + 11, *value);
            }
        }
    }
    sheet
}

pub(crate) fn workbook(sheets: Vec<Worksheet>) -> Workbook {
    let mut workbook = Workbook::new();
    for sheet in sheets {
        workbook.add_sheet(sheet);
    }
    workbook
}

/// A record with no raw columns.
pub(crate) fn record(day: &str, amount: &str, description: &str) -> TransactionRecord {
    TransactionRecord::new(
        date(day),
        Amount::from_str(amount).unwrap(),
        description,
        "test.csv",
    )
}

/// A record carrying `raw` CSV columns. Its description is the raw "Description", if any.
pub(crate) fn raw_record(day: &str, amount: &str, raw: &[(&str, &str)]) -> TransactionRecord {
    let raw: BTreeMap<String, String> = raw
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let description = raw.get("Description").cloned().unwrap_or_default();
    record(day, amount, &description).with_raw(raw)
}

/// A temporary directory holding a ledger workbook, statement files and a configuration file.
/// Holds the TempDir to keep the directory alive for the duration of the test.
pub(crate) struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    pub(crate) fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a text file relative to the root, creating parent directories.
    pub(crate) fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub(crate) fn write_workbook(&self, name: &str, workbook: &Workbook) -> PathBuf {
        let path = self.root().join(name);
        write_workbook(workbook, &path).unwrap();
        path
    }
}
