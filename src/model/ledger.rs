//! Header names and fixed column positions of the ledger workbook.
//!
//! The Details sheet is located by header name, so its columns may appear in any order. Account
//! sheets keep their template columns (labels and formulas) in the first ten columns and the raw
//! bank columns from column 11 onwards.

use std::ops::RangeInclusive;

pub const BANK: &str = "Bank";
pub const ACCOUNT: &str = "Account";
pub const DATE: &str = "Date";
pub const DESCRIPTION: &str = "Transaction Description";
pub const WITHDRAWALS: &str = "Withdrawals";
pub const DEPOSITS: &str = "Deposits";
pub const TRANSACTION_TYPE: &str = "Transaction Type";
pub const ACCRUAL_PERIOD: &str = "Accrual period";
/// Matched as a prefix, e.g. "Reviewed by (initials)".
pub const REVIEWED_BY_PREFIX: &str = "Reviewed by";
pub const NOTES: &str = "Notes";
pub const TYPE: &str = "Type";
pub const AUTOMATED_CATEGORY: &str = "Automated Trans. Category";

/// Headers the Details sheet must have for insertion and deduplication to work.
pub const REQUIRED_DETAILS_HEADERS: [&str; 6] =
    [BANK, ACCOUNT, DATE, DESCRIPTION, WITHDRAWALS, DEPOSITS];

/// Account sheet columns whose formulas are carried onto appended rows.
pub const TEMPLATE_COLUMNS: RangeInclusive<u16> = 1..=10;

/// The first account sheet column holding raw bank data.
pub const FIRST_RAW_COLUMN: u16 = 11;

/// Columns examined when deciding whether an account sheet row holds data.
pub const OCCUPANCY_COLUMNS: RangeInclusive<u16> = 1..=15;
