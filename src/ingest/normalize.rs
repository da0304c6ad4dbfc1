//! Turns a raw CSV `Table` into dated, signed, described transactions.

use crate::config::Source;
use crate::ingest::columns::{clean_header, find_column, rename_headers, resolve_column, Role};
use crate::ingest::dates::{date_like_ratio, parse_dates};
use crate::ingest::reader::Table;
use crate::model::{Amount, TransactionRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use tracing::{debug, info, warn};

/// Below this fraction of date-like values the resolved date column is second-guessed.
const DATE_LIKE_THRESHOLD: f64 = 0.30;

/// Below this fraction of parsed dates (among non-blank values) a file is considered unusable.
const MIN_PARSED_RATIO: f64 = 0.05;

/// One CSV row after normalization. The date is `None` when it could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    date: Option<NaiveDate>,
    amount: Amount,
    description: String,
    category_hint: Option<String>,
    raw: BTreeMap<String, String>,
}

impl NormalizedRow {
    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// An inclusive date range. Missing bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map(|s| date >= s).unwrap_or(true) && self.end.map(|e| date <= e).unwrap_or(true)
    }
}

/// The normalized contents of one CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    source_file: String,
    date_column: String,
    rows: Vec<NormalizedRow>,
}

impl Normalized {
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    /// The CSV column the dates were taken from.
    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn rows(&self) -> &[NormalizedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows whose date could not be parsed.
    pub fn nat_count(&self) -> usize {
        self.rows.iter().filter(|r| r.date.is_none()).count()
    }

    /// Earliest and latest parsed date.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self.rows.iter().filter_map(|r| r.date);
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }

    /// Converts the rows that have a date inside `range` into records. Rows without a date are
    /// dropped.
    pub fn into_records(self, range: DateRange) -> Vec<TransactionRecord> {
        let source_file = self.source_file;
        self.rows
            .into_iter()
            .filter_map(|row| {
                let date = row.date?;
                if !range.contains(date) {
                    return None;
                }
                Some(
                    TransactionRecord::new(date, row.amount, row.description, source_file.as_str())
                        .with_category_hint(row.category_hint)
                        .with_raw(row.raw),
                )
            })
            .collect()
    }
}

/// The date column of a file yielded (almost) no parseable dates, so the file cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateColumnUnusable {
    column: String,
    parsed: usize,
    non_blank: usize,
}

impl Display for DateColumnUnusable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "only {} of {} values in date column '{}' could be parsed",
            self.parsed, self.non_blank, self.column
        )
    }
}

impl Error for DateColumnUnusable {}

/// Normalizes `table` according to the column and sign settings of `source`.
pub fn normalize(table: &Table, source: &Source) -> Result<Normalized, DateColumnUnusable> {
    let headers = rename_headers(table.headers(), source.columns());
    let source_file = table.source_file().to_string();
    if table.is_empty() || headers.is_empty() {
        return Ok(Normalized {
            source_file,
            date_column: String::new(),
            rows: Vec::new(),
        });
    }

    let date_index = pick_date_column(table, &headers, source.date_col());
    let date_column = headers[date_index].clone();
    let desc_index =
        resolve_column(&headers, source.description_col(), Role::Description).unwrap_or(0);
    debug!(
        "Using '{}' for descriptions in {source_file}",
        headers[desc_index]
    );

    let raw_dates = table.column(date_index);
    let dates = parse_dates(&raw_dates, source.date_format());
    let non_blank = raw_dates.iter().filter(|v| !v.trim().is_empty()).count();
    let parsed = dates.iter().filter(|d| d.is_some()).count();
    if non_blank == 0 || (parsed as f64) < (non_blank as f64) * MIN_PARSED_RATIO {
        return Err(DateColumnUnusable {
            column: date_column,
            parsed,
            non_blank,
        });
    }

    let mut amounts = compute_amounts(table, &headers, source);
    refine_signs(table, &headers, source, &mut amounts);

    let hint_index = source
        .automated_trans_cat_col()
        .and_then(|c| find_declared(&headers, c));

    let rows = table
        .rows()
        .iter()
        .zip(dates)
        .zip(amounts)
        .map(|((row, date), amount)| NormalizedRow {
            date,
            amount,
            description: collapse_whitespace(&row[desc_index]),
            category_hint: hint_index.map(|i| row[i].trim().to_string()),
            raw: headers.iter().cloned().zip(row.iter().cloned()).collect(),
        })
        .collect();

    Ok(Normalized {
        source_file,
        date_column,
        rows,
    })
}

/// Resolves the date column and second-guesses it when too few of its values look like dates.
fn pick_date_column(table: &Table, headers: &[String], declared: Option<&str>) -> usize {
    let resolved = resolve_column(headers, declared, Role::Date).unwrap_or(0);
    let ratio = date_like_ratio(&table.column(resolved));
    let mut best = (resolved, ratio);
    if ratio < DATE_LIKE_THRESHOLD {
        for i in 0..headers.len() {
            let r = date_like_ratio(&table.column(i));
            if r > best.1 {
                best = (i, r);
            }
        }
        if best.0 != resolved {
            warn!(
                "Column '{}' does not look like dates ({ratio:.2}), using '{}' ({:.2}) instead",
                headers[resolved], headers[best.0], best.1
            );
        }
    }
    info!(
        "Date column picked: '{}' (date-like={:.2})",
        headers[best.0], best.1
    );
    best.0
}

/// Computes each row's signed amount from a single amount column or a debit/credit pair.
fn compute_amounts(table: &Table, headers: &[String], source: &Source) -> Vec<Amount> {
    let coerce_column = |index: Option<usize>| -> Vec<Amount> {
        match index {
            Some(i) => table.column(i).iter().map(|v| Amount::coerce(v)).collect(),
            None => vec![Amount::ZERO; table.len()],
        }
    };

    if let Some(i) = find_column(headers, source.amount_col(), Role::Amount) {
        debug!("Using '{}' as the amount column", headers[i]);
        return coerce_column(Some(i));
    }

    let debit = find_column(headers, source.debit_col(), Role::Debit);
    let credit = find_column(headers, source.credit_col(), Role::Credit);
    if debit.is_none() && credit.is_none() {
        warn!("No amount, debit or credit column found, amounts will be zero");
        return vec![Amount::ZERO; table.len()];
    }
    let debits = coerce_column(debit);
    let credits = coerce_column(credit);
    let signed = source.debit_credit_are_signed();
    debits
        .into_iter()
        .zip(credits)
        .enumerate()
        .map(|(row, (d, c))| {
            let amount = if signed {
                d.checked_add(c)
            } else {
                c.checked_sub(d)
            };
            amount.unwrap_or_else(|| {
                warn!("Amount overflow in data row {}, using zero", row + 1);
                Amount::ZERO
            })
        })
        .collect()
}

/// Forces the sign of each amount to agree with a transaction type column, when configured.
fn refine_signs(table: &Table, headers: &[String], source: &Source, amounts: &mut [Amount]) {
    let Some(rule) = source.sign_from() else {
        return;
    };
    let Some(col) = find_declared(headers, rule.column()) else {
        debug!("Sign column '{}' not present", rule.column());
        return;
    };
    let lower = |words: &[String]| -> Vec<String> {
        words
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect()
    };
    let debit_words = lower(rule.debit_keywords());
    let credit_words = lower(rule.credit_keywords());

    for (amount, kind) in amounts.iter_mut().zip(table.column(col)) {
        let kind = kind.to_lowercase();
        if debit_words.iter().any(|w| kind.contains(w.as_str())) && !amount.is_negative() {
            *amount = -amount.abs();
        }
        if credit_words.iter().any(|w| kind.contains(w.as_str())) && !amount.is_positive() {
            *amount = amount.abs();
        }
    }
}

fn find_declared(headers: &[String], declared: &str) -> Option<usize> {
    let wanted = clean_header(declared);
    headers.iter().position(|h| clean_header(h) == wanted)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
