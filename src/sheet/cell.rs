//! Cell values, formulas and styles of the in-memory workbook.

use crate::ingest::dates::parse_generic;
use crate::model::Amount;
use chrono::{NaiveDate, NaiveDateTime};
use std::str::FromStr;

/// The value held by a cell. For formula cells this is the cached result.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Error(String),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// True for empty cells and whitespace-only text.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// The value as display text: numbers without a trailing `.0`, dates in ISO form.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) | CellValue::Error(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) => "FALSE".to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// The calendar date this value represents: date cells directly, date-times truncated, and
    /// text parsed generically.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::DateTime(dt) => Some(dt.date()),
            CellValue::Text(s) => parse_generic(s),
            _ => None,
        }
    }

    /// The monetary amount this value represents. Blank cells and non-numeric text have none.
    pub fn as_amount(&self) -> Option<Amount> {
        match self {
            CellValue::Number(n) => Amount::from_f64(*n),
            CellValue::Text(s) if !s.trim().is_empty() => Amount::from_str(s).ok(),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        CellValue::Date(value)
    }
}

impl From<Amount> for CellValue {
    fn from(value: Amount) -> Self {
        CellValue::Number(value.to_f64())
    }
}

/// The visual formatting of a cell that survives a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CellStyle {
    pub num_format: Option<String>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    /// `0xRRGGBB`
    pub font_color: Option<u32>,
    /// `0xRRGGBB`
    pub fill_color: Option<u32>,
    pub border: bool,
    pub h_align: Option<String>,
}

impl CellStyle {
    pub fn is_default(&self) -> bool {
        *self == CellStyle::default()
    }

    /// True when the number format displays a date.
    pub fn is_date_format(&self) -> bool {
        self.num_format
            .as_deref()
            .map(is_date_format_code)
            .unwrap_or(false)
    }
}

/// Detects date format codes such as `yyyy-mm-dd` or `m/d/yy`, ignoring quoted literals and
/// bracketed sections like colors and locales.
pub fn is_date_format_code(code: &str) -> bool {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut prev_escape = false;
    for c in code.chars() {
        if prev_escape {
            prev_escape = false;
            continue;
        }
        match c {
            '\\' => prev_escape = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            'y' | 'Y' | 'd' | 'D' if !in_quotes && !in_brackets => return true,
            _ => {}
        }
    }
    false
}

/// A single cell: value (or cached formula result), formula text starting with `=`, and style.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    value: CellValue,
    formula: Option<String>,
    style: CellStyle,
}

impl Cell {
    pub fn value(&self) -> &CellValue {
        &self.value
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    pub fn has_formula(&self) -> bool {
        self.formula.is_some()
    }

    pub fn style(&self) -> &CellStyle {
        &self.style
    }

    pub(crate) fn set_value(&mut self, value: CellValue) {
        self.value = value;
        self.formula = None;
    }

    pub(crate) fn set_formula(&mut self, formula: impl Into<String>, cached: CellValue) {
        self.formula = Some(normalize_formula(formula.into()));
        self.value = cached;
    }

    pub(crate) fn set_style(&mut self, style: CellStyle) {
        self.style = style;
    }

    /// True when the cell holds nothing worth writing: no value, no formula, default style.
    pub fn is_blank(&self) -> bool {
        self.value == CellValue::Empty && self.formula.is_none() && self.style.is_default()
    }
}

fn normalize_formula(formula: String) -> String {
    if formula.starts_with('=') {
        formula
    } else {
        format!("={formula}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_text() {
        assert_eq!(CellValue::Number(4.0).to_text(), "4");
        assert_eq!(CellValue::Number(4.5).to_text(), "4.5");
        assert_eq!(CellValue::Bool(true).to_text(), "TRUE");
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(CellValue::Date(d).to_text(), "2024-01-05");
    }

    #[test]
    fn test_is_empty() {
        assert!(CellValue::Empty.is_empty());
        assert!(CellValue::text("  ").is_empty());
        assert!(!CellValue::Number(0.0).is_empty());
    }

    #[test]
    fn test_as_date() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(CellValue::Date(d).as_date(), Some(d));
        assert_eq!(CellValue::DateTime(d.and_hms_opt(9, 0, 0).unwrap()).as_date(), Some(d));
        assert_eq!(CellValue::text("1/5/2024").as_date(), Some(d));
        assert_eq!(CellValue::Number(45296.0).as_date(), None);
    }

    #[test]
    fn test_as_amount() {
        assert_eq!(CellValue::Number(4.5).as_amount().unwrap().to_string(), "4.50");
        assert_eq!(CellValue::text("$4.50").as_amount().unwrap().to_string(), "4.50");
        assert_eq!(CellValue::text("Coffee").as_amount(), None);
        assert_eq!(CellValue::text("").as_amount(), None);
        assert_eq!(CellValue::Empty.as_amount(), None);
    }

    #[test]
    fn test_date_format_codes() {
        assert!(is_date_format_code("yyyy-mm-dd"));
        assert!(is_date_format_code("m/d/yy"));
        assert!(is_date_format_code("[$-409]d-mmm-yy;@"));
        assert!(!is_date_format_code("#,##0.00"));
        assert!(!is_date_format_code("\"Day\" 0"));
        assert!(!is_date_format_code("[Red]0.00"));
        assert!(!is_date_format_code("General"));
    }

    #[test]
    fn test_formula_normalized() {
        let mut cell = Cell::default();
        cell.set_formula("SUM(A1:A2)", CellValue::Empty);
        assert_eq!(cell.formula(), Some("=SUM(A1:A2)"));
        assert!(cell.has_formula());
        assert!(!cell.is_blank());
    }
}
