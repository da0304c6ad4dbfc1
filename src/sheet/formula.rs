//! Best-effort handling of formula text when rows are inserted or cloned.
//!
//! Nothing here evaluates a formula. References are found by scanning the formula text (string
//! literals are skipped) and only their row numbers are ever rewritten. Three operations exist:
//!
//! - [`adjust_for_insert`]: what a spreadsheet does to every formula when a row is inserted.
//! - [`clone_formula`]: copy a template row's formula to another row, translating relative rows
//!   if the formula is simple and safe, copying it verbatim otherwise.
//! - [`repair_row_local`]: rewrite known row-local templates that point at the wrong row.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// The number of rows in an .xlsx worksheet.
pub const MAX_ROWS: u32 = 1_048_576;

/// Formulas longer than this are copied verbatim rather than translated.
pub const MAX_TRANSLATE_LEN: usize = 500;

/// Either a string literal (kept as is) or a cell reference with an optional sheet qualifier.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""(?:[^"]|"")*"|(?:(?:'(?P<qsheet>(?:[^']|'')+)'|(?P<sheet>[A-Za-z_][A-Za-z0-9_.]*))!)?(?P<cabs>\$?)(?P<col>[A-Za-z]{1,3})(?P<rabs>\$?)(?P<row>[0-9]+)"#,
    )
    .unwrap()
});

static DENYLIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:INDIRECT|OFFSET|INDEX|EXEC|CALL|REGISTER|EVALUATE|HYPERLINK|WEBSERVICE|FILTERXML)\s*\(",
    )
    .unwrap()
});

static ACCRUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^=\s*DATE\(\s*YEAR\(\s*([A-Z]{1,3})([0-9]+)\s*\)\s*,\s*MONTH\(\s*([A-Z]{1,3})([0-9]+)\s*\)\s*,\s*1\s*\)\s*$",
    )
    .unwrap()
});

static TRANSACTION_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^=\s*IF\(\s*([A-Z]{1,3})([0-9]+)\s*>\s*0\s*,\s*"Withdrawal"\s*,\s*"Deposit"\s*\)\s*$"#)
        .unwrap()
});

/// A cell reference found in formula text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    /// The sheet qualifier, unquoted, if the reference has one (or inherits one as the right-hand
    /// side of a range).
    pub sheet: Option<String>,
    pub row: u32,
    pub row_absolute: bool,
}

/// The result of cloning a formula from one row to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClonedFormula {
    /// Relative row references were shifted to the new row.
    Translated(String),
    /// The formula was too long or used a denylisted function and was copied unchanged.
    Verbatim(String),
    /// Translating would have produced a reference outside the worksheet.
    Dropped,
}

/// Rewrites the row number of every cell reference in `formula`. `new_row` receives each
/// reference and returns its new row, or `None` to abandon the rewrite.
pub fn rewrite_rows<F>(formula: &str, mut new_row: F) -> Option<String>
where
    F: FnMut(&CellRef) -> Option<u32>,
{
    let bytes = formula.as_bytes();
    let mut out = String::with_capacity(formula.len() + 8);
    let mut last = 0;
    // (end offset, sheet) of the previous reference, for ranges like Sheet2!A1:B2
    let mut previous: Option<(usize, Option<String>)> = None;

    for caps in TOKEN.captures_iter(formula) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.as_str().starts_with('"') {
            continue;
        }
        let Some(row_match) = caps.name("row") else {
            continue;
        };
        if !is_reference_boundary(bytes, whole.start(), whole.end()) {
            continue;
        }
        let Ok(row) = row_match.as_str().parse::<u32>() else {
            continue;
        };
        if row == 0 {
            continue;
        }

        let mut sheet = sheet_name(&caps);
        if sheet.is_none() && whole.start() > 0 && bytes[whole.start() - 1] == b':' {
            if let Some((end, inherited)) = &previous {
                if *end + 1 == whole.start() {
                    sheet = inherited.clone();
                }
            }
        }

        let reference = CellRef {
            sheet,
            row,
            row_absolute: caps.name("rabs").map(|m| !m.as_str().is_empty()).unwrap_or(false),
        };
        let row_to = new_row(&reference)?;
        out.push_str(&formula[last..row_match.start()]);
        out.push_str(&row_to.to_string());
        last = row_match.end();
        previous = Some((whole.end(), reference.sheet));
    }
    out.push_str(&formula[last..]);
    Some(out)
}

/// A reference must not be glued to an identifier on its left, and must not be a function name
/// (`LOG10(`) or the start of a longer identifier on its right.
fn is_reference_boundary(bytes: &[u8], start: usize, end: usize) -> bool {
    if start > 0 {
        let before = bytes[start - 1];
        if before.is_ascii_alphanumeric() || matches!(before, b'_' | b'.' | b'$') {
            return false;
        }
    }
    if let Some(&after) = bytes.get(end) {
        if after.is_ascii_alphanumeric() || matches!(after, b'_' | b'(' | b'.' | b'!') {
            return false;
        }
    }
    true
}

fn sheet_name(caps: &Captures) -> Option<String> {
    if let Some(quoted) = caps.name("qsheet") {
        return Some(quoted.as_str().replace("''", "'"));
    }
    caps.name("sheet").map(|m| m.as_str().to_string())
}

/// Moves every relative row reference in `formula` by `delta` rows, as copying a cell does.
/// Returns `None` if a shifted row would fall outside the worksheet.
pub fn translate(formula: &str, delta: i64) -> Option<String> {
    if delta == 0 {
        return Some(formula.to_string());
    }
    rewrite_rows(formula, |r| {
        if r.row_absolute {
            return Some(r.row);
        }
        let shifted = i64::from(r.row) + delta;
        if (1..=i64::from(MAX_ROWS)).contains(&shifted) {
            u32::try_from(shifted).ok()
        } else {
            None
        }
    })
}

/// Adjusts `formula`, which lives on `formula_sheet`, for a row inserted at `at` on
/// `target_sheet`: every reference to that sheet at or below `at` moves down one row, whether
/// absolute or relative.
pub fn adjust_for_insert(formula: &str, formula_sheet: &str, target_sheet: &str, at: u32) -> String {
    rewrite_rows(formula, |r| {
        let sheet = r.sheet.as_deref().unwrap_or(formula_sheet);
        if r.row >= at && r.row < MAX_ROWS && sheet.eq_ignore_ascii_case(target_sheet) {
            Some(r.row + 1)
        } else {
            Some(r.row)
        }
    })
    .unwrap_or_else(|| formula.to_string())
}

/// True when `formula` calls a function that can reach cells or systems indirectly.
pub fn is_denylisted(formula: &str) -> bool {
    DENYLIST.is_match(formula)
}

/// Copies `formula` from `from_row` to `to_row`.
pub fn clone_formula(formula: &str, from_row: u32, to_row: u32) -> ClonedFormula {
    if is_denylisted(formula) {
        warn!("Copying formula with a denylisted function verbatim to row {to_row}: {formula}");
        return ClonedFormula::Verbatim(formula.to_string());
    }
    if formula.len() > MAX_TRANSLATE_LEN {
        debug!(
            "Copying a {} character formula verbatim to row {to_row}",
            formula.len()
        );
        return ClonedFormula::Verbatim(formula.to_string());
    }
    match translate(formula, i64::from(to_row) - i64::from(from_row)) {
        Some(translated) => ClonedFormula::Translated(translated),
        None => {
            warn!("Not copying formula '{formula}' to row {to_row}: it would leave the worksheet");
            ClonedFormula::Dropped
        }
    }
}

/// Repairs row-local template formulas that point at another row: the first-of-month formula
/// `=DATE(YEAR(Cn),MONTH(Cn),1)` and the withdrawal/deposit formula
/// `=IF(Wn>0,"Withdrawal","Deposit")`. Returns the corrected formula, or `None` if `formula` is
/// not one of these or is already correct.
pub fn repair_row_local(formula: &str, own_row: u32) -> Option<String> {
    if own_row == 0 || own_row > MAX_ROWS {
        return None;
    }
    if let Some(caps) = ACCRUAL.captures(formula) {
        let (col_a, row_a, col_b, row_b) = (&caps[1], &caps[2], &caps[3], &caps[4]);
        let row: u32 = row_a.parse().ok()?;
        if col_a.eq_ignore_ascii_case(col_b) && row_a == row_b && row != own_row {
            let col = col_a.to_ascii_uppercase();
            return Some(format!("=DATE(YEAR({col}{own_row}),MONTH({col}{own_row}),1)"));
        }
        return None;
    }
    if let Some(caps) = TRANSACTION_TYPE.captures(formula) {
        let row: u32 = caps[2].parse().ok()?;
        if row != own_row {
            return Some(transaction_type_formula(&caps[1].to_ascii_uppercase(), own_row));
        }
    }
    None
}

/// `=IF(<col><row>>0,"Withdrawal","Deposit")`
pub fn transaction_type_formula(withdrawals_col: &str, row: u32) -> String {
    format!("=IF({withdrawals_col}{row}>0,\"Withdrawal\",\"Deposit\")")
}

/// Converts a 1-based column number to its letters: 1 is `A`, 27 is `AA`.
pub fn column_letters(mut col: u16) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        letters.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Parses an `A1` style reference into a 1-based `(row, col)`.
pub fn parse_a1(reference: &str) -> Option<(u32, u16)> {
    let reference = reference.trim().replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        col = col * 26 + u32::from(c.to_ascii_uppercase() as u8 - b'A' + 1);
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((row, u16::try_from(col).ok()?))
}
