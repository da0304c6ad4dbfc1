//! Date detection and parsing for bank exports.
//!
//! Banks disagree on date formats, and some put dates in columns with names nobody would guess.
//! These functions answer two questions: "does this column look like dates?" and "what calendar
//! date does this cell hold?".

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static MMDD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}(?:/\d{2,4})?\b").unwrap());
static ISO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4}-\d{1,2}-\d{1,2}\b").unwrap());
static MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\b").unwrap()
});
static FOUR_DIGIT_YEAR_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\d{2})(\d{2})$").unwrap());

/// Embedded date fragments tried, in order, when too many values failed to parse.
static EXTRACTORS: LazyLock<Vec<(Regex, Option<&'static str>)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"(\d{1,2}/\d{1,2}/\d{4})").unwrap(), Some("%m/%d/%Y")),
        (Regex::new(r"(\d{1,2}/\d{1,2}/\d{2})").unwrap(), Some("%m/%d/%y")),
        (Regex::new(r"(\d{4}-\d{1,2}-\d{1,2})").unwrap(), None),
    ]
});

/// Formats tried by `parse_generic`, most specific first.
const GENERIC_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%y",
    "%m-%d-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%b-%Y",
    "%d-%b-%y",
];

const GENERIC_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
];

/// Formats tried when coercing a free-form cell into a date, e.g. for a raw "Posting Date" column.
const COERCE_FORMATS: &[&str] = &["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d", "%m-%d-%y", "%m-%d-%Y"];

/// Failure ratio above which the extraction fallbacks are attempted.
const EXTRACT_THRESHOLD: f64 = 0.25;

/// Returns true if `s` contains something that looks like a date: `1/5`, `01/05/2024`,
/// `2024-01-05` or a month name.
pub fn is_date_like(s: &str) -> bool {
    MMDD.is_match(s) || ISO.is_match(s) || MONTH.is_match(s)
}

/// The fraction of `values` that look like dates. Blank values count as not date-like.
pub fn date_like_ratio<S: AsRef<str>>(values: &[S]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let hits = values.iter().filter(|v| is_date_like(v.as_ref())).count();
    hits as f64 / values.len() as f64
}

/// Parses every value in `values` into a calendar date, or `None` where that is not possible.
///
/// With a declared strftime `format`, values are parsed with that format only. A declared
/// two-digit year (`%y`) tolerates data that actually carries four digits (`01/05/2024`). Without
/// a format, values are parsed generically and, while more than a quarter of them are still
/// missing, date fragments embedded in longer text are extracted and parsed. Extraction only
/// fills values that are still missing.
pub fn parse_dates<S: AsRef<str>>(values: &[S], format: Option<&str>) -> Vec<Option<NaiveDate>> {
    let trimmed: Vec<&str> = values.iter().map(|v| v.as_ref().trim()).collect();

    if let Some(format) = format.filter(|f| !f.trim().is_empty()) {
        if is_valid_format(format) {
            let truncate = format.contains("%y") && !format.contains("%Y");
            return trimmed
                .iter()
                .map(|s| {
                    if truncate {
                        let s = FOUR_DIGIT_YEAR_TAIL.replace(s, "/$2");
                        parse_with_format(&s, format)
                    } else {
                        parse_with_format(s, format)
                    }
                })
                .collect();
        }
        warn!("The date format '{format}' is not a valid strftime format, parsing generically");
    }

    let mut parsed: Vec<Option<NaiveDate>> = trimmed.iter().map(|s| parse_generic(s)).collect();
    for (pattern, fmt) in EXTRACTORS.iter() {
        if failure_ratio(&parsed) <= EXTRACT_THRESHOLD {
            break;
        }
        for (slot, s) in parsed.iter_mut().zip(trimmed.iter()) {
            if slot.is_some() {
                continue;
            }
            let Some(fragment) = pattern.captures(s).and_then(|c| c.get(1)) else {
                continue;
            };
            *slot = match fmt {
                Some(fmt) => parse_with_format(fragment.as_str(), fmt),
                None => parse_generic(fragment.as_str()),
            };
        }
    }
    parsed
}

/// Parses a single value the way a spreadsheet user would expect: ISO, US slash dates,
/// month-name dates and date-times (whose time part is dropped).
pub fn parse_generic(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(d) = GENERIC_DATE_FORMATS
        .iter()
        .find_map(|fmt| parse_date_only(s, fmt))
    {
        return Some(d);
    }
    if let Some(d) = GENERIC_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    {
        return Some(d.date());
    }
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.date_naive())
}

/// Tries the small set of formats used for raw account columns. Returns `None` when the value
/// is not a recognizable date.
pub fn coerce_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    COERCE_FORMATS.iter().find_map(|fmt| parse_date_only(s, fmt))
}

/// Renders `s` as an ISO date if it can be coerced (or parsed generically, for date-times),
/// otherwise returns the trimmed text itself.
pub fn to_iso_dateish(s: &str) -> String {
    match coerce_date(s).or_else(|| parse_generic(s)) {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => s.trim().to_string(),
    }
}

fn parse_with_format(s: &str, format: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, format)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, format).ok().map(|d| d.date()))
}

/// `%Y` in chrono happily accepts `24` as the year 24, which a human never means.
fn parse_date_only(s: &str, format: &str) -> Option<NaiveDate> {
    let d = NaiveDate::parse_from_str(s, format).ok()?;
    if format.contains("%Y") && !(1000..=9999).contains(&chrono::Datelike::year(&d)) {
        return None;
    }
    Some(d)
}

fn is_valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

fn failure_ratio(parsed: &[Option<NaiveDate>]) -> f64 {
    if parsed.is_empty() {
        return 0.0;
    }
    parsed.iter().filter(|d| d.is_none()).count() as f64 / parsed.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_date_like() {
        assert!(is_date_like("1/5"));
        assert!(is_date_like("01/05/2024"));
        assert!(is_date_like("2024-01-05"));
        assert!(is_date_like("Jan 5"));
        assert!(is_date_like("5 SEPTEMBER"));
        assert!(!is_date_like("COFFEE SHOP"));
        assert!(!is_date_like(""));
        assert!(!is_date_like("4.50"));
    }

    #[test]
    fn test_date_like_ratio() {
        let values = ["2024-01-05", "2024-01-06", "oops", "2024-01-07"];
        assert!((date_like_ratio(&values) - 0.75).abs() < f64::EPSILON);
        let empty: [&str; 0] = [];
        assert_eq!(date_like_ratio(&empty), 0.0);
    }

    #[test]
    fn test_parse_generic() {
        assert_eq!(parse_generic("2024-01-05"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("1/5/2024"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("01/05/24"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("Jan 5, 2024"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("05 Jan 2024"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("2024-01-05 13:45:00"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("2024-01-05T13:45:00Z"), ymd(2024, 1, 5));
        assert_eq!(parse_generic("nope"), None);
        assert_eq!(parse_generic(""), None);
    }

    #[test]
    fn test_declared_format() {
        let parsed = parse_dates(&["05.01.2024", "bad"], Some("%d.%m.%Y"));
        assert_eq!(parsed, vec![ymd(2024, 1, 5), None]);
    }

    #[test]
    fn test_declared_two_digit_year_with_four_digit_data() {
        let parsed = parse_dates(&["01/05/2024", "01/06/24"], Some("%m/%d/%y"));
        assert_eq!(parsed, vec![ymd(2024, 1, 5), ymd(2024, 1, 6)]);
    }

    #[test]
    fn test_invalid_declared_format_parses_generically() {
        let parsed = parse_dates(&["2024-01-05"], Some("%Q"));
        assert_eq!(parsed, vec![ymd(2024, 1, 5)]);
    }

    #[test]
    fn test_extraction_fills_missing_only() {
        let values = [
            "POS 01/05/2024 COFFEE",
            "ref 2024-02-01 transfer",
            "2024-03-01",
            "no date here",
        ];
        let parsed = parse_dates(&values, None);
        assert_eq!(
            parsed,
            vec![ymd(2024, 1, 5), ymd(2024, 2, 1), ymd(2024, 3, 1), None]
        );
    }

    #[test]
    fn test_extraction_skipped_when_mostly_parsed() {
        let values = [
            "2024-01-01",
            "2024-01-02",
            "2024-01-03",
            "2024-01-04",
            "2024-01-05",
            "x 01/06/2024",
        ];
        // one failure in six is under the threshold, so nothing is extracted
        let parsed = parse_dates(&values, None);
        assert_eq!(parsed[5], None);
        assert_eq!(parsed[0], ymd(2024, 1, 1));
    }

    #[test]
    fn test_four_digit_year_rejects_short_year() {
        assert_eq!(parse_date_only("1/5/24", "%m/%d/%Y"), None);
    }

    #[test]
    fn test_coerce_and_iso() {
        assert_eq!(coerce_date("1/5/24"), ymd(2024, 1, 5));
        assert_eq!(coerce_date("01-05-2024"), ymd(2024, 1, 5));
        assert_eq!(to_iso_dateish("1/5/2024"), "2024-01-05");
        assert_eq!(to_iso_dateish(" pending "), "pending");
        assert_eq!(to_iso_dateish("2024-01-05 00:00:00"), "2024-01-05");
    }
}
