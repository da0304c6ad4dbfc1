//! The sheet insertion engine.
//!
//! Both insertion operations follow the same cycle: load the workbook from a
//! [`WorkbookStore`](crate::sheet::WorkbookStore), scan the destination sheet for existing keys,
//! merge in the keys the run has already seen, insert every record whose key is new, and save. A
//! dry run performs the key checks and counts but never mutates or saves the workbook.

mod account;
mod details;

pub use account::{insert_into_account_sheet, AccountTarget};
pub use details::{insert_into_details, DetailsTarget};

use crate::dedup::DedupKey;
use crate::sheet::formula::{clone_formula, ClonedFormula};
use crate::sheet::{CellValue, Worksheet};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use tracing::debug;

/// What one insertion call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    added: usize,
    existing: usize,
    duplicates: usize,
    new_keys: HashSet<DedupKey>,
}

impl InsertOutcome {
    /// Rows added to the sheet, or that would have been added in a dry run.
    pub fn added(&self) -> usize {
        self.added
    }

    /// Data rows already on the sheet before the call.
    pub fn existing(&self) -> usize {
        self.existing
    }

    /// Incoming records skipped because their key was already present.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Keys of the added rows, to be merged into the run's key cache.
    pub fn new_keys(&self) -> &HashSet<DedupKey> {
        &self.new_keys
    }

    pub fn into_new_keys(self) -> HashSet<DedupKey> {
        self.new_keys
    }

    fn record_added(&mut self, key: Option<DedupKey>) {
        self.added += 1;
        if let Some(key) = key {
            self.new_keys.insert(key);
        }
    }
}

/// True when the row directly above or below `row` (within the data rows of `sheet`) has a formula
/// in `col`. Such a column is taken to be formula-driven, and literal writes into it are skipped.
pub(crate) fn should_skip_write(sheet: &Worksheet, row: u32, col: u16) -> bool {
    let max_row = sheet.max_row();
    [row.checked_sub(1), row.checked_add(1)]
        .into_iter()
        .flatten()
        .filter(|n| (2..=max_row).contains(n))
        .any(|n| sheet.formula(n, col).is_some())
}

/// Writes `value` into `row` of column `col`, unless the column is absent or formula-driven.
/// Returns whether the write happened.
pub(crate) fn guarded_write(
    sheet: &mut Worksheet,
    row: u32,
    col: Option<u16>,
    value: impl Into<CellValue>,
) -> bool {
    let Some(col) = col else {
        return false;
    };
    if should_skip_write(sheet, row, col) {
        debug!("Skipped write to row {row}, column {col} of '{}': formula-driven", sheet.name());
        return false;
    }
    sheet.set_value(row, col, value);
    true
}

/// Clears `row` of column `col` under the same guard as [`guarded_write`].
pub(crate) fn guarded_clear(sheet: &mut Worksheet, row: u32, col: Option<u16>) {
    let Some(col) = col else {
        return;
    };
    if !should_skip_write(sheet, row, col) {
        sheet.clear(row, col);
    }
}

/// Makes `row` look like `donor`: every style is copied, and the formulas of `formula_cols` are
/// translated to the new row (or copied verbatim when they are too complex to translate safely).
pub(crate) fn clone_row_template(
    sheet: &mut Worksheet,
    donor: u32,
    row: u32,
    formula_cols: RangeInclusive<u16>,
) {
    sheet.copy_row_style(donor, row);
    let formulas: Vec<(u16, String)> = sheet
        .row_cells(donor)
        .filter(|(col, _)| formula_cols.contains(col))
        .filter_map(|(col, cell)| cell.formula().map(|f| (col, f.to_string())))
        .collect();
    for (col, formula) in formulas {
        match clone_formula(&formula, donor, row) {
            ClonedFormula::Translated(f) | ClonedFormula::Verbatim(f) => {
                sheet.set_formula(row, col, f, CellValue::Empty)
            }
            ClonedFormula::Dropped => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> Worksheet {
        let mut sheet = Worksheet::new("S");
        sheet.set_value(1, 1, "Header");
        sheet.set_value(2, 1, 1.0);
        sheet.set_formula(3, 1, "=A2+1", CellValue::Number(2.0));
        sheet.set_value(4, 1, 3.0);
        sheet
    }

    #[test]
    fn test_should_skip_write() {
        let sheet = sheet();
        assert!(should_skip_write(&sheet, 2, 1));
        assert!(should_skip_write(&sheet, 4, 1));
        assert!(!should_skip_write(&sheet, 3, 1));
        assert!(!should_skip_write(&sheet, 2, 2));
        // The header row never counts as a neighbor.
        let mut top = Worksheet::new("T");
        top.set_formula(1, 1, "=1", CellValue::Empty);
        assert!(!should_skip_write(&top, 2, 1));
    }

    #[test]
    fn test_guarded_write() {
        let mut sheet = sheet();
        assert!(!guarded_write(&mut sheet, 4, Some(1), 9.0));
        assert_eq!(sheet.value(4, 1), &CellValue::Number(3.0));
        assert!(guarded_write(&mut sheet, 5, Some(2), "x"));
        assert_eq!(sheet.value(5, 2).to_text(), "x");
        assert!(!guarded_write(&mut sheet, 5, None, "x"));
    }

    #[test]
    fn test_clone_row_template() {
        let mut sheet = Worksheet::new("S");
        sheet.set_formula(2, 1, "=B2*2", CellValue::Empty);
        sheet.set_formula(2, 12, "=L1", CellValue::Empty);
        sheet.set_formula(2, 3, "=INDIRECT(\"B2\")", CellValue::Empty);
        clone_row_template(&mut sheet, 2, 5, 1..=10);
        assert_eq!(sheet.formula(5, 1), Some("=B5*2"));
        assert_eq!(sheet.formula(5, 3), Some("=INDIRECT(\"B2\")"));
        assert_eq!(sheet.formula(5, 12), None);
    }

    #[test]
    fn test_outcome_counts_keys() {
        let mut outcome = InsertOutcome::default();
        outcome.record_added(Some(DedupKey::Account(vec!["a".into()])));
        outcome.record_added(None);
        assert_eq!(outcome.added(), 2);
        assert_eq!(outcome.new_keys().len(), 1);
    }
}
