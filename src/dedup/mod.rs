//! Duplicate detection for the two kinds of destination sheet.
//!
//! The Details sheet and the account sheets identify a transaction differently, so each has its
//! own [`DuplicateDetector`]: [`DetailsKeyStrategy`] and [`AccountKeyStrategy`]. The
//! [`KeyCache`] carries the keys seen during a run from one insertion call to the next.

mod account;
mod details;

pub use account::{identity_raw_map, raw_columns, AccountKeyStrategy, KeyGroup, KeyOrigin};
pub use details::{existing_amount, DetailsColumns, DetailsKeyStrategy};
pub(crate) use account::{is_date_header, lookup_raw};

use crate::model::TransactionRecord;
use crate::sheet::Worksheet;
use std::collections::{HashMap, HashSet};

/// The identity of a transaction within one destination sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DedupKey {
    /// Bank, account, ISO date, normalized description and the signed amount with two decimals.
    Details {
        bank: String,
        account: String,
        date: String,
        description: String,
        amount: String,
    },
    /// The normalized values of the account sheet's key columns, in key group order.
    Account(Vec<String>),
}

/// Computes dedup keys for the rows of a sheet and for incoming records.
pub trait DuplicateDetector {
    /// The key of an existing sheet row, or `None` when the row holds nothing to compare.
    fn existing_key(&self, sheet: &Worksheet, row: u32) -> Option<DedupKey>;

    /// The key of an incoming record, or `None` when the record cannot be compared, in which case
    /// it is always treated as new.
    fn incoming_key(&self, record: &TransactionRecord) -> Option<DedupKey>;

    /// Keys of every data row of `sheet`.
    fn scan(&self, sheet: &Worksheet) -> HashSet<DedupKey> {
        (2..=sheet.max_row())
            .filter_map(|row| self.existing_key(sheet, row))
            .collect()
    }
}

/// Collapses runs of whitespace to a single space, trims and lower-cases.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The keys seen so far in one run: those scanned from the sheets plus those this run inserted.
///
/// The orchestrator owns the cache and merges each insertion call's keys into it once the call
/// has finished, so later files of the same run (including dry runs, which never touch the sheet)
/// see rows that earlier files added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCache {
    details: HashSet<DedupKey>,
    accounts: HashMap<String, HashSet<DedupKey>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn details(&self) -> &HashSet<DedupKey> {
        &self.details
    }

    /// Keys of the account sheet `sheet`, empty if nothing was recorded for it yet.
    pub fn account(&self, sheet: &str) -> impl Iterator<Item = &DedupKey> {
        self.accounts.get(sheet).into_iter().flatten()
    }

    pub fn merge_details(&mut self, keys: impl IntoIterator<Item = DedupKey>) {
        self.details.extend(keys);
    }

    pub fn merge_account(&mut self, sheet: &str, keys: impl IntoIterator<Item = DedupKey>) {
        self.accounts
            .entry(sheet.to_string())
            .or_default()
            .extend(keys);
    }

    /// Total number of keys held, across all sheets.
    pub fn len(&self) -> usize {
        self.details.len() + self.accounts.values().map(HashSet::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_key(parts: &[&str]) -> DedupKey {
        DedupKey::Account(parts.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Coffee\tSHOP  #12 "), "coffee shop #12");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_key_cache_merge() {
        let mut cache = KeyCache::new();
        assert!(cache.is_empty());
        cache.merge_account("Chase", vec![account_key(&["2024-01-05", "coffee", "4.50"])]);
        cache.merge_account("Chase", vec![account_key(&["2024-01-05", "coffee", "4.50"])]);
        cache.merge_account("Amex", vec![account_key(&["2024-01-06", "tea", "3.00"])]);
        assert_eq!(cache.account("Chase").count(), 1);
        assert_eq!(cache.account("Amex").count(), 1);
        assert_eq!(cache.account("Nope").count(), 0);
        assert_eq!(cache.len(), 2);
        assert!(cache.details().is_empty());
    }
}
