use super::{clone_row_template, guarded_clear, guarded_write, should_skip_write, InsertOutcome};
use crate::dedup::{DedupKey, DetailsColumns, DetailsKeyStrategy, DuplicateDetector, KeyCache};
use crate::model::{Amount, TransactionRecord};
use crate::sheet::formula::{column_letters, repair_row_local, transaction_type_formula, MAX_ROWS};
use crate::sheet::{CellValue, Workbook, WorkbookStore, Worksheet};
use crate::Result;
use anyhow::ensure;
use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Where a batch of records goes in the Details sheet, and under which labels.
#[derive(Debug, Clone, Copy)]
pub struct DetailsTarget<'a> {
    pub sheet: &'a str,
    pub bank: &'a str,
    pub account: &'a str,
    /// Headers of the labeling columns to leave blank on new rows.
    pub label_columns: &'a [String],
    pub dry_run: bool,
}

/// Inserts `records` into the Details sheet, keeping it sorted by bank, account and date.
///
/// Records whose key is already on the sheet, or in `cache`, are skipped. The workbook is saved
/// once at the end unless this is a dry run or nothing was added.
pub fn insert_into_details<S>(
    store: &S,
    target: &DetailsTarget<'_>,
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
    let outcome = insert_details(&mut workbook, target, records, cache)?;
    if !target.dry_run && outcome.added() > 0 {
        store.save(&workbook)?;
    }
    debug!(
        "Details '{}' for {}/{}: {} added, {} duplicates, {} existing",
        target.sheet,
        target.bank,
        target.account,
        outcome.added(),
        outcome.duplicates(),
        outcome.existing()
    );
    Ok(outcome)
}

fn insert_details(
    workbook: &mut Workbook,
    target: &DetailsTarget<'_>,
    records: &[TransactionRecord],
    cache: &KeyCache,
) -> Result<InsertOutcome> {
    let sheet = workbook.require_sheet(target.sheet)?;
    let columns = DetailsColumns::resolve(sheet)?;
    let headers = sheet.header_map();
    let label_columns: Vec<u16> = target
        .label_columns
        .iter()
        .filter_map(|h| headers.get(h.trim()).copied())
        .collect();
    let strategy = DetailsKeyStrategy::new(columns, target.bank, target.account);
    let scanned = strategy.scan(sheet);

    let mut outcome = InsertOutcome {
        existing: scanned.len(),
        ..InsertOutcome::default()
    };
    let mut known: HashSet<DedupKey> = scanned;
    known.extend(cache.details().iter().cloned());

    // The batch shares one bank and account, so sorting by date matches the sheet order.
    let mut sorted: Vec<&TransactionRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.date());

    for record in sorted {
        let key = strategy.incoming_key(record);
        if let Some(key) = &key {
            if known.contains(key) {
                trace!("Duplicate in Details: {key:?}");
                outcome.duplicates += 1;
                continue;
            }
            known.insert(key.clone());
        }
        if !target.dry_run {
            insert_record(workbook, target, &columns, &label_columns, record)?;
        }
        outcome.record_added(key);
    }

    if !target.dry_run && outcome.added > 0 {
        repair_formulas(workbook.require_sheet_mut(target.sheet)?, &columns);
    }
    Ok(outcome)
}

/// The first row after every row ordered at or before `key`, searching the data rows 2 through
/// the last row with a bank or account.
fn find_insert_index(
    sheet: &Worksheet,
    columns: &DetailsColumns,
    key: &(String, String, Option<NaiveDate>),
) -> u32 {
    let mut lo = 2;
    let mut hi = sheet.last_data_row(&[columns.bank, columns.account]) + 1;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if columns.order_key(sheet, mid) <= *key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn insert_record(
    workbook: &mut Workbook,
    target: &DetailsTarget<'_>,
    columns: &DetailsColumns,
    label_columns: &[u16],
    record: &TransactionRecord,
) -> Result<u32> {
    let sheet = workbook.require_sheet(target.sheet)?;
    ensure!(
        sheet.max_row() < MAX_ROWS,
        "Sheet '{}' has no room for another row",
        target.sheet
    );
    let order_key = (
        target.bank.trim().to_string(),
        target.account.trim().to_string(),
        Some(record.date()),
    );
    let row = find_insert_index(sheet, columns, &order_key);
    workbook.insert_row(target.sheet, row)?;

    let sheet = workbook.require_sheet_mut(target.sheet)?;
    let donor = if row > 2 { row - 1 } else { row + 1 };
    if donor <= sheet.max_row() {
        clone_row_template(sheet, donor, row, 1..=u16::MAX);
    }
    trace!("Inserting {} into '{}' at row {row}", record.description(), target.sheet);

    let c = columns;
    let amount = record.amount();
    let (withdrawal, deposit) = if amount.is_negative() {
        (amount.abs(), Amount::ZERO)
    } else {
        (Amount::ZERO, amount)
    };
    guarded_write(sheet, row, Some(c.bank), target.bank);
    guarded_write(sheet, row, Some(c.account), target.account);
    guarded_write(sheet, row, Some(c.date), record.date());
    guarded_write(sheet, row, Some(c.description), record.description());
    guarded_write(sheet, row, Some(c.withdrawals), withdrawal);
    guarded_write(sheet, row, Some(c.deposits), deposit);

    if let Some(col) = c.transaction_type {
        let kind = if amount.is_negative() { "Withdrawal" } else { "Deposit" };
        let formula = transaction_type_formula(&column_letters(c.withdrawals), row);
        // A formula cloned from the donor only needs its cached result.
        if sheet.formula(row, col) == Some(formula.as_str()) || !should_skip_write(sheet, row, col) {
            sheet.set_formula(row, col, formula, CellValue::text(kind));
        } else {
            debug!("Skipped Transaction Type at row {row}: formula-driven");
        }
    }

    let date = record.date();
    let first_of_month = date.with_day(1).unwrap_or(date);
    guarded_write(sheet, row, c.accrual_period, first_of_month);
    guarded_write(sheet, row, c.reviewed_by, "No");
    guarded_clear(sheet, row, c.notes);
    guarded_clear(sheet, row, c.manual_type);
    for col in label_columns {
        guarded_clear(sheet, row, Some(*col));
    }
    match record.category_hint() {
        Some(hint) => {
            guarded_write(sheet, row, c.automated_category, hint);
        }
        None => guarded_clear(sheet, row, c.automated_category),
    }
    Ok(row)
}

/// Points row-local formulas of the Accrual period and Transaction Type columns back at their own
/// row after insertions.
fn repair_formulas(sheet: &mut Worksheet, columns: &DetailsColumns) {
    let cols: Vec<u16> = [columns.accrual_period, columns.transaction_type]
        .into_iter()
        .flatten()
        .collect();
    let mut repaired = 0;
    for row in 2..=sheet.max_row() {
        for col in &cols {
            let Some(formula) = sheet.formula(row, *col) else {
                continue;
            };
            if let Some(fixed) = repair_row_local(formula, row) {
                let cached = sheet.value(row, *col).clone();
                sheet.set_formula(row, *col, fixed, cached);
                repaired += 1;
            }
        }
    }
    if repaired > 0 {
        debug!("Repaired {repaired} row-local formulas on '{}'", sheet.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{CellStyle, MemoryStore};
    use crate::test::{date, details_sheet, record, workbook};

    const LABELS: [&str; 2] = ["Category", "Subcategory"];

    fn labels() -> Vec<String> {
        LABELS.iter().map(|s| s.to_string()).collect()
    }

    fn target<'a>(labels: &'a [String], dry_run: bool) -> DetailsTarget<'a> {
        DetailsTarget {
            sheet: "Details",
            bank: "Chase",
            account: "Checking",
            label_columns: labels,
            dry_run,
        }
    }

    fn order_keys(sheet: &Worksheet) -> Vec<(String, String, Option<NaiveDate>)> {
        let columns = DetailsColumns::resolve(sheet).unwrap();
        (2..=sheet.last_data_row(&[1, 2]))
            .map(|row| columns.order_key(sheet, row))
            .collect()
    }

    #[test]
    fn test_duplicate_across_files_in_one_run() {
        let store = MemoryStore::new(workbook(vec![details_sheet(&[])]));
        let labels = labels();
        let mut cache = KeyCache::new();

        let file_1 = vec![record("2024-01-05", "-4.50", "Coffee")];
        let first = insert_into_details(&store, &target(&labels, false), &file_1, &cache).unwrap();
        assert_eq!(first.added(), 1);
        cache.merge_details(first.into_new_keys());

        let file_2 = vec![record("2024-01-05", "-4.50", "Coffee")];
        let second = insert_into_details(&store, &target(&labels, false), &file_2, &cache).unwrap();
        assert_eq!(second.added(), 0);
        assert_eq!(second.duplicates(), 1);
        assert_eq!(store.saves(), 1);

        let wb = store.workbook();
        assert_eq!(wb.sheet("Details").unwrap().last_data_row(&[1, 2]), 2);
    }

    #[test]
    fn test_rerun_adds_nothing() {
        let store = MemoryStore::new(workbook(vec![details_sheet(&[(
            "Chase",
            "Checking",
            "2024-01-01",
            "Opening",
            100.0,
        )])]));
        let labels = labels();
        let records = vec![
            record("2024-01-05", "-4.50", "Coffee"),
            record("2024-01-07", "20.00", "Refund"),
        ];
        let first =
            insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();
        assert_eq!(first.added(), 2);
        assert_eq!(first.existing(), 1);

        let second =
            insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();
        assert_eq!(second.added(), 0);
        assert_eq!(second.duplicates(), 2);
        assert_eq!(second.existing(), 3);
    }

    #[test]
    fn test_keeps_sheet_sorted() {
        let store = MemoryStore::new(workbook(vec![details_sheet(&[
            ("Amex", "Card", "2024-01-03", "Lunch", -12.0),
            ("Chase", "Checking", "2024-01-02", "Rent", -900.0),
            ("Chase", "Checking", "2024-01-10", "Salary", 2000.0),
            ("Wells", "Savings", "2024-01-01", "Interest", 1.0),
        ])]));
        let labels = labels();
        let records = vec![
            record("2024-01-12", "-3.00", "Late"),
            record("2024-01-01", "-1.00", "Early"),
            record("2024-01-05", "-2.00", "Middle"),
            record("2024-01-10", "-5.00", "Same day"),
        ];
        let outcome =
            insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();
        assert_eq!(outcome.added(), 4);

        let wb = store.workbook();
        let sheet = wb.sheet("Details").unwrap();
        let keys = order_keys(sheet);
        assert_eq!(keys.len(), 8);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        // Rows of other accounts stay where they were relative to the Chase block.
        assert_eq!(sheet.value(2, 1).to_text(), "Amex");
        assert_eq!(sheet.value(9, 1).to_text(), "Wells");
        // A same-day record goes after the existing one.
        assert_eq!(sheet.value(6, 4).to_text(), "Salary");
        assert_eq!(sheet.value(7, 4).to_text(), "Same day");
    }

    #[test]
    fn test_writes_fields() {
        let store = MemoryStore::new(workbook(vec![details_sheet(&[])]));
        let labels = labels();
        let records = vec![
            record("2024-02-17", "-50.00", "ATM"),
            record("2024-02-20", "12.25", "Deposit").with_category_hint(Some("Income".into())),
        ];
        insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();

        let wb = store.workbook();
        let sheet = wb.sheet("Details").unwrap();
        assert_eq!(sheet.value(2, 1).to_text(), "Chase");
        assert_eq!(sheet.value(2, 2).to_text(), "Checking");
        assert_eq!(sheet.value(2, 3), &CellValue::Date(date("2024-02-17")));
        assert_eq!(sheet.value(2, 4).to_text(), "ATM");
        assert_eq!(sheet.value(2, 5), &CellValue::Number(50.0));
        assert_eq!(sheet.value(2, 6), &CellValue::Number(0.0));
        assert_eq!(sheet.formula(2, 7), Some("=IF(E2>0,\"Withdrawal\",\"Deposit\")"));
        assert_eq!(sheet.value(2, 7).to_text(), "Withdrawal");
        assert_eq!(sheet.value(2, 8), &CellValue::Date(date("2024-02-01")));
        assert_eq!(sheet.value(2, 9).to_text(), "No");
        assert!(sheet.value(2, 10).is_empty());
        assert!(sheet.value(2, 12).is_empty());
        assert!(sheet.value(2, 13).is_empty());

        assert_eq!(sheet.value(3, 5), &CellValue::Number(0.0));
        assert_eq!(sheet.value(3, 6), &CellValue::Number(12.25));
        assert_eq!(sheet.formula(3, 7), Some("=IF(E3>0,\"Withdrawal\",\"Deposit\")"));
        assert_eq!(sheet.value(3, 7).to_text(), "Deposit");
    }

    #[test]
    fn test_category_hint() {
        let mut sheet = details_sheet(&[]);
        sheet.set_value(1, 14, "Automated Trans. Category");
        let store = MemoryStore::new(workbook(vec![sheet]));
        let labels = labels();
        let records =
            vec![record("2024-02-20", "12.25", "Pay").with_category_hint(Some("Income".into()))];
        insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();
        let wb = store.workbook();
        assert_eq!(wb.sheet("Details").unwrap().value(2, 14).to_text(), "Income");
    }

    #[test]
    fn test_dry_run_does_not_save() {
        let initial = workbook(vec![details_sheet(&[])]);
        let store = MemoryStore::new(initial.clone());
        let labels = labels();
        let records = vec![
            record("2024-01-05", "-4.50", "Coffee"),
            record("2024-01-05", "-4.50", "Coffee"),
        ];
        let outcome =
            insert_into_details(&store, &target(&labels, true), &records, &KeyCache::new()).unwrap();
        assert_eq!(outcome.added(), 1);
        assert_eq!(outcome.duplicates(), 1);
        assert_eq!(outcome.new_keys().len(), 1);
        assert_eq!(store.saves(), 0);
        assert_eq!(store.workbook(), initial);
    }

    #[test]
    fn test_formula_columns_are_cloned_not_overwritten() {
        let mut sheet = details_sheet(&[
            ("Chase", "Checking", "2024-01-02", "Rent", -900.0),
            ("Chase", "Checking", "2024-03-10", "Salary", 2000.0),
        ]);
        sheet.set_formula(2, 8, "=DATE(YEAR(C2),MONTH(C2),1)", CellValue::Empty);
        sheet.set_formula(3, 8, "=DATE(YEAR(C3),MONTH(C3),1)", CellValue::Empty);
        let store = MemoryStore::new(workbook(vec![sheet]));
        let labels = labels();
        let records = vec![record("2024-02-14", "-8.00", "Flowers")];
        insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();

        let wb = store.workbook();
        let sheet = wb.sheet("Details").unwrap();
        assert_eq!(sheet.value(3, 4).to_text(), "Flowers");
        assert_eq!(sheet.formula(2, 8), Some("=DATE(YEAR(C2),MONTH(C2),1)"));
        assert_eq!(sheet.formula(3, 8), Some("=DATE(YEAR(C3),MONTH(C3),1)"));
        assert_eq!(sheet.formula(4, 8), Some("=DATE(YEAR(C4),MONTH(C4),1)"));
    }

    #[test]
    fn test_earliest_row_clones_formulas_from_row_below() {
        let mut sheet = details_sheet(&[
            ("Chase", "Checking", "2024-03-10", "Salary", 2000.0),
            ("Chase", "Checking", "2024-03-12", "Rent", -900.0),
        ]);
        sheet.set_value(1, 14, "Net");
        for row in 2..=3 {
            sheet.set_formula(
                row,
                7,
                format!("=IF(E{row}>0,\"Withdrawal\",\"Deposit\")"),
                CellValue::Empty,
            );
            sheet.set_formula(
                row,
                8,
                format!("=DATE(YEAR(C{row}),MONTH(C{row}),1)"),
                CellValue::Empty,
            );
            sheet.set_formula(row, 14, format!("=F{row}-E{row}"), CellValue::Empty);
        }
        let money = CellStyle {
            num_format: Some("#,##0.00".to_string()),
            ..CellStyle::default()
        };
        sheet.set_style(2, 5, money.clone());
        let store = MemoryStore::new(workbook(vec![sheet]));
        let labels = labels();
        let records = vec![record("2024-01-02", "-7.00", "Coffee")];
        let outcome =
            insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).unwrap();
        assert_eq!(outcome.added(), 1);

        let wb = store.workbook();
        let sheet = wb.sheet("Details").unwrap();
        assert_eq!(sheet.value(2, 4).to_text(), "Coffee");
        assert_eq!(sheet.value(3, 4).to_text(), "Salary");
        assert_eq!(sheet.value(4, 4).to_text(), "Rent");

        assert_eq!(sheet.formula(2, 7), Some("=IF(E2>0,\"Withdrawal\",\"Deposit\")"));
        assert_eq!(sheet.value(2, 7).to_text(), "Withdrawal");
        assert_eq!(sheet.formula(2, 8), Some("=DATE(YEAR(C2),MONTH(C2),1)"));
        assert_eq!(sheet.formula(2, 14), Some("=F2-E2"));
        assert_eq!(sheet.cell(2, 5).unwrap().style(), &money);

        assert_eq!(sheet.formula(3, 7), Some("=IF(E3>0,\"Withdrawal\",\"Deposit\")"));
        assert_eq!(sheet.formula(3, 8), Some("=DATE(YEAR(C3),MONTH(C3),1)"));
        assert_eq!(sheet.formula(3, 14), Some("=F3-E3"));
        assert_eq!(sheet.formula(4, 14), Some("=F4-E4"));
    }

    #[test]
    fn test_repairs_misaligned_row_local_formulas() {
        let mut sheet = details_sheet(&[("Chase", "Checking", "2024-01-02", "Rent", -900.0)]);
        sheet.set_formula(2, 8, "=DATE(YEAR(C7),MONTH(C7),1)", CellValue::Empty);
        let mut wb = workbook(vec![sheet]);
        let labels = labels();
        let records = vec![record("2024-01-05", "-1.00", "Gum")];
        insert_details(&mut wb, &target(&labels, false), &records, &KeyCache::new()).unwrap();
        let sheet = wb.sheet("Details").unwrap();
        assert_eq!(sheet.formula(2, 8), Some("=DATE(YEAR(C2),MONTH(C2),1)"));
    }

    #[test]
    fn test_missing_sheet_or_headers() {
        let labels = labels();
        let records = vec![record("2024-01-05", "-1.00", "Gum")];
        let store = MemoryStore::new(workbook(vec![]));
        assert!(insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).is_err());

        let mut bare = Worksheet::new("Details");
        bare.set_value(1, 1, "Bank");
        let store = MemoryStore::new(workbook(vec![bare]));
        assert!(insert_into_details(&store, &target(&labels, false), &records, &KeyCache::new()).is_err());
    }

    #[test]
    fn test_find_insert_index_ignores_trailing_blank_rows() {
        let mut sheet = details_sheet(&[("Chase", "Checking", "2024-01-02", "Rent", -900.0)]);
        sheet.set_value(40, 3, "");
        let columns = DetailsColumns::resolve(&sheet).unwrap();
        let key = ("Chase".to_string(), "Checking".to_string(), Some(date("2024-05-01")));
        assert_eq!(find_insert_index(&sheet, &columns, &key), 3);
    }
}
