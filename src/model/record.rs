use crate::model::Amount;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One normalized bank transaction, ready to be inserted into the ledger.
///
/// Records are built by the normalizer, one per CSV row whose date could be parsed, and are not
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    date: NaiveDate,
    amount: Amount,
    description: String,
    source_file: String,
    /// The bank's own category for the transaction, when the source declares a column for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    category_hint: Option<String>,
    /// Original CSV cell text keyed by (renamed) CSV column name.
    raw: BTreeMap<String, String>,
}

impl TransactionRecord {
    pub fn new(
        date: NaiveDate,
        amount: Amount,
        description: impl Into<String>,
        source_file: impl Into<String>,
    ) -> Self {
        Self {
            date,
            amount,
            description: description.into(),
            source_file: source_file.into(),
            category_hint: None,
            raw: BTreeMap::new(),
        }
    }

    pub fn with_raw(mut self, raw: BTreeMap<String, String>) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_category_hint(mut self, hint: Option<String>) -> Self {
        self.category_hint = hint.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn category_hint(&self) -> Option<&str> {
        self.category_hint.as_deref()
    }

    pub fn raw(&self) -> &BTreeMap<String, String> {
        &self.raw
    }

    /// The original text of CSV column `column`, if the row had it.
    pub fn raw_value(&self, column: &str) -> Option<&str> {
        self.raw.get(column).map(String::as_str)
    }
}
