//! Configuration file handling.
//!
//! The configuration is a YAML file, by default `config/config.yaml`, naming the target workbook
//! and describing each bank source: where its files are, how to read them, which columns mean
//! what, and which sheets its transactions go to.

use crate::ingest::{BadLinePolicy, ColumnRef, CsvOptions};
use crate::ingest::files::expand_home;
use crate::{utils, Result};
use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

const DEFAULT_DETAILS_SHEET: &str = "Details";

/// The `Config` object represents the loaded and validated configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    config_path: PathBuf,
    target_workbook: PathBuf,
    details_sheet: String,
    label_columns: Vec<String>,
    sources: Vec<Source>,
}

impl Config {
    /// This will
    /// - read and parse the YAML file at `path`
    /// - validate the target workbook and every source
    /// - return the loaded configuration object, with sources in file order
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("The config file is missing '{}'", path.display())
        }
        let content = utils::read(path)?;
        Self::parse(path, &content)
            .with_context(|| format!("Failed to load config file at {}", path.display()))
    }

    /// Parses YAML `content` as if it had been read from `config_path`.
    pub fn parse(config_path: impl Into<PathBuf>, content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content).context("Invalid YAML")?;

        ensure!(
            !file.target_workbook.trim().is_empty(),
            "target_workbook must not be empty"
        );
        ensure!(!file.sources.is_empty(), "No sources are configured");

        let mut sources = Vec::with_capacity(file.sources.len());
        for (key, value) in file.sources {
            let Some(name) = key.as_str().map(str::to_string) else {
                bail!("Source names must be strings, found {key:?}");
            };
            let mut source: Source = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid settings for source '{name}'"))?;
            source.name = name;
            source.validate()?;
            debug!("Loaded source '{}'", source.name);
            sources.push(source);
        }

        Ok(Self {
            config_path: config_path.into(),
            target_workbook: expand_home(file.target_workbook.trim()),
            details_sheet: file.details_sheet,
            label_columns: file.label_columns,
            sources,
        })
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The workbook that transactions are inserted into.
    pub fn target_workbook(&self) -> &Path {
        &self.target_workbook
    }

    pub fn details_sheet(&self) -> &str {
        &self.details_sheet
    }

    /// Details sheet columns filled in later by the labeling pass. New rows leave them blank.
    pub fn label_columns(&self) -> &[String] {
        &self.label_columns
    }

    /// Sources in the order they appear in the configuration file.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }
}

/// Represents the serialization format of the configuration file.
///
/// Example configuration:
/// ```yaml
/// target_workbook: ~/finance/ledger.xlsx
/// details_sheet: Details
/// sources:
///   chase_checking:
///     files: ["~/Downloads/Chase*.csv"]
///     bank_label: Chase
///     account_label: Checking
///     account_sheet: Chase Checking
///     date_format: "%m/%d/%Y"
///     auto_raw_from_sheet: true
/// ```
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    target_workbook: String,

    #[serde(default = "default_details_sheet")]
    details_sheet: String,

    #[serde(default = "default_label_columns")]
    label_columns: Vec<String>,

    /// A YAML mapping keeps the order of the file, which is the processing order.
    #[serde(default)]
    sources: serde_yaml::Mapping,
}

fn default_details_sheet() -> String {
    DEFAULT_DETAILS_SHEET.to_string()
}

fn default_label_columns() -> Vec<String> {
    vec!["Category".to_string(), "Subcategory".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_csv_sep() -> String {
    ",".to_string()
}

fn default_encoding() -> String {
    "utf-8-sig".to_string()
}

/// Settings for one bank source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    /// The key of the source in the configuration file.
    #[serde(skip)]
    name: String,

    /// Paths, directories or wildcard patterns of the source's statement files.
    #[serde(default)]
    files: Vec<String>,

    #[serde(default)]
    bank_label: Option<String>,

    #[serde(default)]
    account_label: Option<String>,

    /// The per-account raw sheet. Without one, only the Details sheet is updated.
    #[serde(default)]
    account_sheet: Option<String>,

    #[serde(default = "default_csv_sep")]
    csv_sep: String,

    #[serde(default = "default_encoding")]
    encoding: String,

    #[serde(default)]
    csv_on_bad_lines: BadLinePolicy,

    /// Headers for exports without a header line.
    #[serde(default)]
    csv_names: Option<Vec<String>>,

    /// Columns to keep, by header name or zero-based position.
    #[serde(default)]
    csv_usecols: Option<Vec<ColumnRef>>,

    /// Header renames applied before column resolution, `from: to`.
    #[serde(default)]
    columns: BTreeMap<String, String>,

    #[serde(default)]
    date_col: Option<String>,

    /// A strftime format such as `%m/%d/%Y`.
    #[serde(default)]
    date_format: Option<String>,

    #[serde(default)]
    description_col: Option<String>,

    #[serde(default)]
    amount_col: Option<String>,

    #[serde(default)]
    debit_col: Option<String>,

    #[serde(default)]
    credit_col: Option<String>,

    /// When true, debit values are already negative and amount = debit + credit. Otherwise
    /// amount = credit - debit.
    #[serde(default = "default_true")]
    debit_credit_are_signed: bool,

    #[serde(default)]
    sign_from: Option<SignFrom>,

    /// A CSV column holding the bank's own category, copied to the Details sheet.
    #[serde(default)]
    automated_trans_cat_col: Option<String>,

    /// Account sheet header to CSV column.
    #[serde(default)]
    raw_map: Option<BTreeMap<String, String>>,

    /// Derive the raw map from the account sheet's own headers instead of `raw_map`.
    #[serde(default)]
    auto_raw_from_sheet: bool,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            name: String::from("source"),
            files: Vec::new(),
            bank_label: None,
            account_label: None,
            account_sheet: None,
            csv_sep: default_csv_sep(),
            encoding: default_encoding(),
            csv_on_bad_lines: BadLinePolicy::default(),
            csv_names: None,
            csv_usecols: None,
            columns: BTreeMap::new(),
            date_col: None,
            date_format: None,
            description_col: None,
            amount_col: None,
            debit_col: None,
            credit_col: None,
            debit_credit_are_signed: true,
            sign_from: None,
            automated_trans_cat_col: None,
            raw_map: None,
            auto_raw_from_sheet: false,
        }
    }
}

impl Source {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.files.is_empty(),
            "Source '{}' has no files configured",
            self.name
        );
        ensure!(
            self.csv_sep.len() == 1,
            "Source '{}' has an invalid csv_sep '{}', it must be a single ASCII character",
            self.name,
            self.csv_sep
        );
        if let Some(names) = &self.csv_names {
            ensure!(
                !names.is_empty(),
                "Source '{}' sets an empty csv_names list",
                self.name
            );
        }
        if self.auto_raw_from_sheet {
            ensure!(
                self.account_sheet.is_some(),
                "Source '{}' sets auto_raw_from_sheet without an account_sheet",
                self.name
            );
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The bank label written to the sheets. Defaults to the source name.
    pub fn bank_label(&self) -> &str {
        self.bank_label.as_deref().unwrap_or(&self.name)
    }

    /// The account label written to the sheets. Defaults to the source name.
    pub fn account_label(&self) -> &str {
        self.account_label.as_deref().unwrap_or(&self.name)
    }

    pub fn account_sheet(&self) -> Option<&str> {
        self.account_sheet.as_deref()
    }

    pub fn csv_options(&self) -> CsvOptions {
        let separator = self.csv_sep.bytes().next().unwrap_or(b',');
        CsvOptions::new(separator, self.encoding.clone(), self.csv_on_bad_lines)
            .with_names(self.csv_names.clone())
            .with_usecols(self.csv_usecols.clone())
    }

    pub fn columns(&self) -> &BTreeMap<String, String> {
        &self.columns
    }

    pub fn date_col(&self) -> Option<&str> {
        self.date_col.as_deref()
    }

    pub fn date_format(&self) -> Option<&str> {
        self.date_format.as_deref()
    }

    pub fn description_col(&self) -> Option<&str> {
        self.description_col.as_deref()
    }

    pub fn amount_col(&self) -> Option<&str> {
        self.amount_col.as_deref()
    }

    pub fn debit_col(&self) -> Option<&str> {
        self.debit_col.as_deref()
    }

    pub fn credit_col(&self) -> Option<&str> {
        self.credit_col.as_deref()
    }

    pub fn debit_credit_are_signed(&self) -> bool {
        self.debit_credit_are_signed
    }

    pub fn sign_from(&self) -> Option<&SignFrom> {
        self.sign_from.as_ref()
    }

    pub fn automated_trans_cat_col(&self) -> Option<&str> {
        self.automated_trans_cat_col.as_deref()
    }

    pub fn raw_map(&self) -> Option<&BTreeMap<String, String>> {
        self.raw_map.as_ref()
    }

    pub fn auto_raw_from_sheet(&self) -> bool {
        self.auto_raw_from_sheet
    }
}

#[cfg(test)]
impl Source {
    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: vec![format!("{name}.csv")],
            ..Self::default()
        }
    }

    pub(crate) fn with_columns(mut self, columns: BTreeMap<String, String>) -> Self {
        self.columns = columns;
        self
    }

    pub(crate) fn with_date_col(mut self, col: &str) -> Self {
        self.date_col = Some(col.to_string());
        self
    }

    pub(crate) fn with_description_col(mut self, col: &str) -> Self {
        self.description_col = Some(col.to_string());
        self
    }

    pub(crate) fn with_amount_col(mut self, col: &str) -> Self {
        self.amount_col = Some(col.to_string());
        self
    }

    pub(crate) fn with_debit_credit_are_signed(mut self, signed: bool) -> Self {
        self.debit_credit_are_signed = signed;
        self
    }

    pub(crate) fn with_sign_from(mut self, sign_from: SignFrom) -> Self {
        self.sign_from = Some(sign_from);
        self
    }

    pub(crate) fn with_automated_trans_cat_col(mut self, col: &str) -> Self {
        self.automated_trans_cat_col = Some(col.to_string());
        self
    }
}

/// Forces amount signs to agree with a transaction type column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignFrom {
    column: String,
    #[serde(default)]
    debit_keywords: Vec<String>,
    #[serde(default)]
    credit_keywords: Vec<String>,
}

impl SignFrom {
    pub fn new(
        column: impl Into<String>,
        debit_keywords: Vec<String>,
        credit_keywords: Vec<String>,
    ) -> Self {
        Self {
            column: column.into(),
            debit_keywords,
            credit_keywords,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn debit_keywords(&self) -> &[String] {
        &self.debit_keywords
    }

    pub fn credit_keywords(&self) -> &[String] {
        &self.credit_keywords
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
target_workbook: ledger.xlsx
sources:
  zeta_bank:
    files: ["zeta/*.csv"]
    bank_label: Zeta
    account_label: Checking
    account_sheet: Zeta Checking
    csv_sep: ";"
    csv_on_bad_lines: skip
    debit_credit_are_signed: false
    sign_from:
      column: Type
      debit_keywords: [debit, withdrawal]
  alpha_card:
    files: ["alpha.csv"]
    raw_map:
      Date: Transaction Date
      Description: Description
      Amount: Amount
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse("config.yaml", SAMPLE).unwrap();
        assert_eq!(config.target_workbook(), Path::new("ledger.xlsx"));
        assert_eq!(config.details_sheet(), "Details");
        assert_eq!(config.label_columns(), &["Category", "Subcategory"]);

        // File order, not alphabetical order
        let names: Vec<&str> = config.sources().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["zeta_bank", "alpha_card"]);

        let zeta = &config.sources()[0];
        assert_eq!(zeta.bank_label(), "Zeta");
        assert_eq!(zeta.account_sheet(), Some("Zeta Checking"));
        assert_eq!(zeta.csv_options().separator(), b';');
        assert_eq!(zeta.csv_options().on_bad_lines(), BadLinePolicy::Skip);
        assert!(!zeta.debit_credit_are_signed());
        let rule = zeta.sign_from().unwrap();
        assert_eq!(rule.column(), "Type");
        assert!(rule.credit_keywords().is_empty());

        let alpha = &config.sources()[1];
        assert_eq!(alpha.bank_label(), "alpha_card");
        assert_eq!(alpha.account_label(), "alpha_card");
        assert!(alpha.debit_credit_are_signed());
        assert_eq!(alpha.csv_options().encoding(), "utf-8-sig");
        assert_eq!(
            alpha.raw_map().unwrap().get("Date").map(String::as_str),
            Some("Transaction Date")
        );
    }

    #[test]
    fn test_missing_target_workbook() {
        let yaml = "sources:\n  a:\n    files: [a.csv]\n";
        let err = Config::parse("c.yaml", yaml).unwrap_err();
        assert!(err.to_string().contains("target_workbook"));
    }

    #[test]
    fn test_no_sources() {
        let yaml = "target_workbook: x.xlsx\n";
        assert!(Config::parse("c.yaml", yaml).is_err());
    }

    #[test]
    fn test_source_without_files() {
        let yaml = "target_workbook: x.xlsx\nsources:\n  a:\n    bank_label: A\n";
        let err = Config::parse("c.yaml", yaml).unwrap_err();
        assert!(format!("{err:#}").contains("no files"));
    }

    #[test]
    fn test_unknown_source_field() {
        let yaml = "target_workbook: x.xlsx\nsources:\n  a:\n    files: [a.csv]\n    colour: red\n";
        assert!(Config::parse("c.yaml", yaml).is_err());
    }

    #[test]
    fn test_bad_separator() {
        let yaml = "target_workbook: x.xlsx\nsources:\n  a:\n    files: [a.csv]\n    csv_sep: ';;'\n";
        assert!(Config::parse("c.yaml", yaml).is_err());
    }

    #[test]
    fn test_auto_raw_requires_account_sheet() {
        let yaml =
            "target_workbook: x.xlsx\nsources:\n  a:\n    files: [a.csv]\n    auto_raw_from_sheet: true\n";
        assert!(Config::parse("c.yaml", yaml).is_err());
    }

    #[test]
    fn test_headerless_source_options() {
        let yaml = "target_workbook: x.xlsx\nsources:\n  a:\n    files: [a.csv]\n    \
                    csv_names: [Date, Ref, Description, Amount]\n    \
                    csv_usecols: [Date, 2, Amount]\n";
        let config = Config::parse("c.yaml", yaml).unwrap();
        let options = config.sources()[0].csv_options();
        assert_eq!(
            options.names().unwrap(),
            &["Date", "Ref", "Description", "Amount"]
        );
        assert_eq!(
            options.usecols().unwrap(),
            &[
                ColumnRef::Name("Date".to_string()),
                ColumnRef::Index(2),
                ColumnRef::Name("Amount".to_string())
            ]
        );

        let yaml = "target_workbook: x.xlsx\nsources:\n  a:\n    files: [a.csv]\n    csv_names: []\n";
        assert!(Config::parse("c.yaml", yaml).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(Config::parse("c.yaml", "target_workbook: [unclosed").is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.config_path(), path);
        assert_eq!(config.sources().len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_parse_example_config() {
        let example = include_str!("../config/config.example.yaml");
        let config = Config::parse("config.example.yaml", example).unwrap();
        let names: Vec<&str> = config.sources().iter().map(|s| s.name()).collect();
        assert_eq!(names, ["chase_checking", "amex", "credit_union", "brokerage_cash"]);
        assert!(config.sources()[0].auto_raw_from_sheet());
        assert!(!config.sources()[1].debit_credit_are_signed());
        assert_eq!(config.sources()[2].account_sheet(), None);
        assert_eq!(config.sources()[2].csv_options().separator(), b';');
        assert_eq!(config.sources()[3].csv_options().usecols().map(<[_]>::len), Some(3));
    }
}
