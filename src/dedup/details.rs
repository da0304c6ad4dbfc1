use super::{normalize_text, DedupKey, DuplicateDetector};
use crate::model::ledger::{self, REQUIRED_DETAILS_HEADERS};
use crate::model::{Amount, TransactionRecord};
use crate::sheet::{CellValue, Worksheet};
use crate::Result;
use anyhow::bail;
use std::collections::HashMap;

/// Column positions of the Details sheet, resolved from its header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailsColumns {
    pub bank: u16,
    pub account: u16,
    pub date: u16,
    pub description: u16,
    pub withdrawals: u16,
    pub deposits: u16,
    pub transaction_type: Option<u16>,
    pub accrual_period: Option<u16>,
    pub reviewed_by: Option<u16>,
    pub notes: Option<u16>,
    pub manual_type: Option<u16>,
    pub automated_category: Option<u16>,
}

impl DetailsColumns {
    /// Resolves the columns of `sheet`, failing with the list of missing headers if any of the
    /// required ones are absent.
    pub fn resolve(sheet: &Worksheet) -> Result<Self> {
        let headers = sheet.header_map();
        let missing: Vec<&str> = REQUIRED_DETAILS_HEADERS
            .iter()
            .filter(|h| !headers.contains_key(**h))
            .copied()
            .collect();
        if !missing.is_empty() {
            bail!(
                "Sheet '{}' is missing required headers: {}",
                sheet.name(),
                missing.join(", ")
            );
        }
        let get = |name: &str| headers.get(name).copied().unwrap_or_default();
        Ok(Self {
            bank: get(ledger::BANK),
            account: get(ledger::ACCOUNT),
            date: get(ledger::DATE),
            description: get(ledger::DESCRIPTION),
            withdrawals: get(ledger::WITHDRAWALS),
            deposits: get(ledger::DEPOSITS),
            transaction_type: headers.get(ledger::TRANSACTION_TYPE).copied(),
            accrual_period: headers.get(ledger::ACCRUAL_PERIOD).copied(),
            reviewed_by: reviewed_by_column(&headers),
            notes: headers.get(ledger::NOTES).copied(),
            manual_type: headers.get(ledger::TYPE).copied(),
            automated_category: headers.get(ledger::AUTOMATED_CATEGORY).copied(),
        })
    }

    /// The (bank, account, date) ordering key of `row`. Blank labels compare as empty strings and
    /// date-times as their calendar date.
    pub fn order_key(&self, sheet: &Worksheet, row: u32) -> (String, String, Option<chrono::NaiveDate>) {
        (
            sheet.value(row, self.bank).to_text().trim().to_string(),
            sheet.value(row, self.account).to_text().trim().to_string(),
            sheet.value(row, self.date).as_date(),
        )
    }
}

/// The leftmost header starting with "Reviewed by".
fn reviewed_by_column(headers: &HashMap<String, u16>) -> Option<u16> {
    headers
        .iter()
        .filter(|(h, _)| h.starts_with(ledger::REVIEWED_BY_PREFIX))
        .map(|(_, col)| *col)
        .min()
}

/// The signed amount of an existing Details row: the negated withdrawal when it is non-zero,
/// otherwise the deposit.
pub fn existing_amount(withdrawals: &CellValue, deposits: &CellValue) -> Amount {
    let withdrawal = withdrawals.as_amount().unwrap_or_default();
    if !withdrawal.is_zero() {
        return -withdrawal.abs();
    }
    deposits.as_amount().unwrap_or_default()
}

/// Keys Details rows by bank, account, date, description and amount.
///
/// Incoming records take their bank and account from the source being imported. Existing rows
/// take theirs from the sheet, so rows of other accounts never collide with the source's rows.
#[derive(Debug, Clone)]
pub struct DetailsKeyStrategy {
    columns: DetailsColumns,
    bank: String,
    account: String,
}

impl DetailsKeyStrategy {
    pub fn new(columns: DetailsColumns, bank: &str, account: &str) -> Self {
        Self {
            columns,
            bank: bank.trim().to_string(),
            account: account.trim().to_string(),
        }
    }
}

impl DuplicateDetector for DetailsKeyStrategy {
    fn existing_key(&self, sheet: &Worksheet, row: u32) -> Option<DedupKey> {
        let c = &self.columns;
        let bank = sheet.value(row, c.bank).to_text().trim().to_string();
        let account = sheet.value(row, c.account).to_text().trim().to_string();
        let date_value = sheet.value(row, c.date);
        if bank.is_empty() && account.is_empty() && date_value.is_empty() {
            return None;
        }
        let date = match date_value.as_date() {
            Some(d) => d.format("%Y-%m-%d").to_string(),
            None => date_value.to_text().trim().to_string(),
        };
        let amount = existing_amount(sheet.value(row, c.withdrawals), sheet.value(row, c.deposits));
        Some(DedupKey::Details {
            bank,
            account,
            date,
            description: normalize_text(&sheet.value(row, c.description).to_text()),
            amount: amount.to_string(),
        })
    }

    fn incoming_key(&self, record: &TransactionRecord) -> Option<DedupKey> {
        Some(DedupKey::Details {
            bank: self.bank.clone(),
            account: self.account.clone(),
            date: record.date().format("%Y-%m-%d").to_string(),
            description: normalize_text(record.description()),
            amount: record.amount().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{details_sheet, record};
    use chrono::NaiveDate;

    #[test]
    fn test_resolve_reports_missing_headers() {
        let mut sheet = Worksheet::new("Details");
        sheet.set_value(1, 1, "Bank");
        sheet.set_value(1, 2, "Date");
        let err = DetailsColumns::resolve(&sheet).unwrap_err().to_string();
        assert!(err.contains("Account"));
        assert!(err.contains("Withdrawals"));
        assert!(!err.contains("Bank,"));
    }

    #[test]
    fn test_resolve_optional_columns() {
        let sheet = details_sheet(&[]);
        let columns = DetailsColumns::resolve(&sheet).unwrap();
        assert_eq!(columns.bank, 1);
        assert!(columns.transaction_type.is_some());
        assert!(columns.reviewed_by.is_some());
        assert!(columns.automated_category.is_none());
    }

    #[test]
    fn test_existing_amount() {
        let w = CellValue::Number(50.0);
        let d = CellValue::Number(0.0);
        assert_eq!(existing_amount(&w, &d).to_string(), "-50.00");
        assert_eq!(
            existing_amount(&CellValue::Empty, &CellValue::Number(12.5)).to_string(),
            "12.50"
        );
        // Both set: the withdrawal wins.
        assert_eq!(
            existing_amount(&CellValue::Number(3.0), &CellValue::Number(9.0)).to_string(),
            "-3.00"
        );
        assert!(existing_amount(&CellValue::Empty, &CellValue::Empty).is_zero());
    }

    #[test]
    fn test_existing_and_incoming_keys_agree() {
        let sheet = details_sheet(&[("Chase", "Checking", "2024-01-05", "Coffee  Shop", -4.5)]);
        let columns = DetailsColumns::resolve(&sheet).unwrap();
        let strategy = DetailsKeyStrategy::new(columns, "Chase", " Checking ");
        let existing = strategy.existing_key(&sheet, 2).unwrap();
        let incoming = strategy
            .incoming_key(&record("2024-01-05", "-4.50", "coffee shop"))
            .unwrap();
        assert_eq!(existing, incoming);

        let other_day = strategy
            .incoming_key(&record("2024-01-06", "-4.50", "coffee shop"))
            .unwrap();
        assert_ne!(existing, other_day);
    }

    #[test]
    fn test_scan_skips_blank_rows() {
        let mut sheet = details_sheet(&[("Chase", "Checking", "2024-01-05", "Coffee", -4.5)]);
        sheet.set_value(4, 1, "Chase");
        sheet.set_value(4, 3, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let columns = DetailsColumns::resolve(&sheet).unwrap();
        let strategy = DetailsKeyStrategy::new(columns, "Chase", "Checking");
        let keys = strategy.scan(&sheet);
        assert_eq!(keys.len(), 2);
    }
}
