//! Reads bank CSV exports into an in-memory table of strings.

use crate::Result;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// What to do with a line that has more fields than the header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadLinePolicy {
    /// Skip the line and log a warning.
    #[default]
    Warn,
    /// Skip the line silently.
    Skip,
    /// Fail the whole file.
    Error,
}

serde_plain::derive_display_from_serialize!(BadLinePolicy);
serde_plain::derive_fromstr_from_deserialize!(BadLinePolicy);

/// A column kept by `csv_usecols`: a header name or a zero-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

/// How to read a source's CSV files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    separator: u8,
    encoding: String,
    on_bad_lines: BadLinePolicy,
    /// Headers for files without a header line. When set, the first line is data.
    names: Option<Vec<String>>,
    usecols: Option<Vec<ColumnRef>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: b',',
            encoding: String::from("utf-8-sig"),
            on_bad_lines: BadLinePolicy::Warn,
            names: None,
            usecols: None,
        }
    }
}

impl CsvOptions {
    pub fn new(separator: u8, encoding: impl Into<String>, on_bad_lines: BadLinePolicy) -> Self {
        Self {
            separator,
            encoding: encoding.into(),
            on_bad_lines,
            names: None,
            usecols: None,
        }
    }

    pub fn with_names(mut self, names: Option<Vec<String>>) -> Self {
        self.names = names;
        self
    }

    pub fn with_usecols(mut self, usecols: Option<Vec<ColumnRef>>) -> Self {
        self.usecols = usecols;
        self
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn on_bad_lines(&self) -> BadLinePolicy {
        self.on_bad_lines
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn usecols(&self) -> Option<&[ColumnRef]> {
        self.usecols.as_deref()
    }
}

/// The contents of one CSV file: a header row and data rows padded to the header's width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    source_file: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(source_file: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self {
            source_file: source_file.into(),
            headers,
            rows,
        }
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// All values of column `index`, top to bottom.
    pub fn column(&self, index: usize) -> Vec<&str> {
        self.rows
            .iter()
            .map(|row| row.get(index).map(String::as_str).unwrap_or_default())
            .collect()
    }

    /// Keeps only the `selected` columns, in file order. Names match ignoring case. Fails if a
    /// column does not exist.
    pub fn select_columns(self, selected: &[ColumnRef]) -> Result<Self> {
        let mut keep = Vec::with_capacity(selected.len());
        for column in selected {
            let index = match column {
                ColumnRef::Index(i) => Some(*i).filter(|i| *i < self.headers.len()),
                ColumnRef::Name(name) => self
                    .headers
                    .iter()
                    .position(|h| h.trim().eq_ignore_ascii_case(name.trim())),
            };
            let Some(index) = index else {
                bail!(
                    "Column {column:?} is not in {} (headers {:?})",
                    self.source_file,
                    self.headers
                );
            };
            keep.push(index);
        }
        keep.sort_unstable();
        keep.dedup();

        let pick =
            |row: &[String]| -> Vec<String> { keep.iter().map(|&i| row[i].clone()).collect() };
        Ok(Self {
            headers: pick(&self.headers),
            rows: self.rows.iter().map(|row| pick(row)).collect(),
            source_file: self.source_file,
        })
    }
}

/// Reads the CSV file at `path` using `options`.
pub fn read_csv(path: &Path, options: &CsvOptions) -> Result<Table> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Unable to read file {}", path.display()))?;
    let text = decode(&bytes, options.encoding())
        .with_context(|| format!("Unable to decode {}", path.display()))?;
    parse_csv(&path.display().to_string(), &text, options)
        .with_context(|| format!("Unable to parse CSV file {}", path.display()))
}

/// Parses CSV `text`. The first record is the header unless `options` supplies the names. Short
/// rows are padded; rows longer than the header are handled according to the bad-line policy.
pub fn parse_csv(source_file: &str, text: &str, options: &CsvOptions) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.separator())
        .quote(b'"')
        .double_quote(true)
        .escape(Some(b'\\'))
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let (headers, first_line): (Vec<String>, usize) = match options.names() {
        Some(names) => (names.to_vec(), 1),
        None => match records.next() {
            Some(header) => (
                header
                    .context("Unable to read the header line")?
                    .iter()
                    .map(|h| h.to_string())
                    .collect(),
                2,
            ),
            None => return Ok(Table::new(source_file, Vec::new(), Vec::new())),
        },
    };

    let mut rows = Vec::new();
    for (i, result) in records.enumerate() {
        let line = i + first_line;
        let problem = match result {
            Ok(record) if record.len() <= headers.len() => {
                rows.push(record.iter().map(|f| f.to_string()).collect());
                continue;
            }
            Ok(record) => format!(
                "expected {} fields, saw {}",
                headers.len(),
                record.len()
            ),
            Err(e) => e.to_string(),
        };
        match options.on_bad_lines() {
            BadLinePolicy::Warn => warn!("Skipping bad line {line} in {source_file}: {problem}"),
            BadLinePolicy::Skip => debug!("Skipping bad line {line} in {source_file}: {problem}"),
            BadLinePolicy::Error => bail!("Bad line {line} in {source_file}: {problem}"),
        }
    }
    let table = Table::new(source_file, headers, rows);
    match options.usecols() {
        Some(usecols) if !table.headers().is_empty() => table.select_columns(usecols),
        _ => Ok(table),
    }
}

/// Decodes `bytes` using the named encoding. UTF-8 input has its byte-order mark removed and falls
/// back to Windows-1252 when it is not valid UTF-8, which is what spreadsheet exports usually are.
pub fn decode(bytes: &[u8], encoding: &str) -> Result<String> {
    let label = encoding.trim().to_ascii_lowercase();
    if matches!(label.as_str(), "" | "utf-8" | "utf8" | "utf-8-sig" | "utf_8_sig") {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        return match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => {
                warn!("Input is not valid UTF-8, decoding as Windows-1252");
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
                Ok(decoded.into_owned())
            }
        };
    }
    let Some(codec) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
        bail!("Unknown encoding '{encoding}'");
    };
    let (decoded, _, had_errors) = codec.decode(bytes);
    if had_errors {
        warn!("Some bytes could not be decoded as {}", codec.name());
    }
    Ok(decoded.into_owned())
}
