//! The `check` command: validates the configuration against the workbook without changing either.

use crate::backup::list_working_copies;
use crate::commands::Out;
use crate::config::Source;
use crate::dedup::{identity_raw_map, raw_columns, AccountKeyStrategy, DetailsColumns, KeyGroup};
use crate::ingest::collect_all;
use crate::sheet::{Workbook, WorkbookStore, XlsxStore};
use crate::{Config, Result};
use anyhow::bail;
use serde::Serialize;
use tracing::{info, warn};

/// How one source would be imported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCheck {
    name: String,
    files: Vec<String>,
    account_sheet: Option<String>,
    /// The account sheet's key columns. `None` with an account sheet means dedup is disabled.
    key_group: Option<KeyGroup>,
    problems: Vec<String>,
}

impl SourceCheck {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The input files that currently match the source's patterns.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn account_sheet(&self) -> Option<&str> {
        self.account_sheet.as_deref()
    }

    pub fn key_group(&self) -> Option<&KeyGroup> {
        self.key_group.as_ref()
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    workbook: String,
    details_sheet: String,
    /// Problems with the Details sheet.
    problems: Vec<String>,
    sources: Vec<SourceCheck>,
    working_copies: Vec<String>,
}

impl CheckReport {
    pub fn workbook(&self) -> &str {
        &self.workbook
    }

    pub fn sources(&self) -> &[SourceCheck] {
        &self.sources
    }

    /// Existing working copies of the workbook, oldest first.
    pub fn working_copies(&self) -> &[String] {
        &self.working_copies
    }

    /// Every problem found, Details sheet first, then per source.
    pub fn problems(&self) -> Vec<&str> {
        self.problems
            .iter()
            .chain(self.sources.iter().flat_map(|s| s.problems.iter()))
            .map(String::as_str)
            .collect()
    }
}

/// Checks that the target workbook opens, that its Details sheet has the required headers and
/// that every source's account sheet exists, and reports how each source would be deduplicated.
/// Fails if any problem is found.
pub fn check(config: &Config) -> Result<Out<CheckReport>> {
    let store = XlsxStore::open(config.target_workbook())?;
    let workbook = store.load()?;
    let mut report = inspect(config, &workbook);
    report.workbook = store.describe();
    report.working_copies = list_working_copies(store.path())?
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    info!(
        "{} existing working copies of {}",
        report.working_copies.len(),
        report.workbook
    );

    let problems = report.problems();
    if !problems.is_empty() {
        for problem in &problems {
            warn!("{problem}");
        }
        bail!("Found {} problems in {}", problems.len(), report.workbook);
    }
    let message = format!(
        "{} is ready: '{}' and {} sources checked",
        report.workbook,
        config.details_sheet(),
        report.sources.len()
    );
    Ok(Out::new(message, report))
}

fn inspect(config: &Config, workbook: &Workbook) -> CheckReport {
    let mut problems = Vec::new();
    match workbook.require_sheet(config.details_sheet()) {
        Ok(sheet) => match DetailsColumns::resolve(sheet) {
            Ok(_) => info!(
                "Details sheet '{}' has {} rows",
                sheet.name(),
                sheet.max_row().saturating_sub(1)
            ),
            Err(e) => problems.push(format!("{e:#}")),
        },
        Err(e) => problems.push(format!("{e:#}")),
    }

    CheckReport {
        details_sheet: config.details_sheet().to_string(),
        problems,
        sources: config
            .sources()
            .iter()
            .map(|source| check_source(source, workbook))
            .collect(),
        ..CheckReport::default()
    }
}

fn check_source(source: &Source, workbook: &Workbook) -> SourceCheck {
    let mut check = SourceCheck {
        name: source.name().to_string(),
        files: collect_all(source.files())
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        account_sheet: source.account_sheet().map(str::to_string),
        ..SourceCheck::default()
    };
    if check.files.is_empty() {
        warn!(
            "Source '{}': no files currently match {:?}",
            source.name(),
            source.files()
        );
    } else {
        info!(
            "Source '{}': {} matched files",
            source.name(),
            check.files.len()
        );
    }

    let Some(sheet_name) = source.account_sheet() else {
        info!("Source '{}': Details sheet only", source.name());
        return check;
    };
    let Some(sheet) = workbook.sheet(sheet_name) else {
        check.problems.push(format!(
            "Source '{}': account sheet '{sheet_name}' does not exist",
            source.name()
        ));
        return check;
    };

    let raw_map = if source.auto_raw_from_sheet() {
        identity_raw_map(sheet)
    } else {
        source.raw_map().cloned().unwrap_or_default()
    };
    let raw = raw_columns(sheet);
    for header in raw_map.keys() {
        if !raw.iter().any(|(h, _)| h == header) {
            warn!(
                "Source '{}': raw map header '{header}' is not a raw column of '{sheet_name}'",
                source.name()
            );
        }
    }

    let strategy = AccountKeyStrategy::resolve(sheet, source, &raw_map);
    match strategy.group() {
        Some(group) => info!(
            "Source '{}': '{sheet_name}' is keyed by {} ({})",
            source.name(),
            group.headers().join(", "),
            group.origin()
        ),
        None => warn!(
            "Source '{}': '{sheet_name}' has no usable key columns, every row would be imported",
            source.name()
        ),
    }
    check.key_group = strategy.group().cloned();
    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::KeyOrigin;
    use crate::sheet::Worksheet;
    use crate::test::{account_sheet, details_sheet, workbook, TestEnv};

    fn config(env: &TestEnv, sources: &str) -> Config {
        let yaml = format!(
            "target_workbook: \"{}\"\nsources:\n{sources}",
            env.root().join("Ledger.xlsx").display()
        );
        Config::parse(env.root().join("config.yaml"), &yaml).unwrap()
    }

    fn chase_source(env: &TestEnv) -> String {
        format!(
            "  chase:\n    files: [\"{}\"]\n    account_sheet: Chase\n    auto_raw_from_sheet: true\n",
            env.root().join("*.csv").display()
        )
    }

    #[test]
    fn test_inspect_reports_key_group_and_files() {
        let env = TestEnv::new();
        env.write_file("jan.csv", "Date,Description,Amount\n");
        let config = config(&env, &chase_source(&env));
        let workbook = workbook(vec![
            details_sheet(&[]),
            account_sheet(&["Date", "Description", "Amount"], &[]),
        ]);

        let report = inspect(&config, &workbook);
        assert!(report.problems().is_empty());
        let chase = &report.sources()[0];
        assert_eq!(chase.files().len(), 1);
        assert_eq!(chase.account_sheet(), Some("Chase"));
        let group = chase.key_group().unwrap();
        assert_eq!(group.origin(), KeyOrigin::CommonHeaders);
        assert_eq!(group.headers(), ["Date", "Description", "Amount"]);
    }

    #[test]
    fn test_inspect_degraded_account_sheet() {
        let env = TestEnv::new();
        let config = config(&env, &chase_source(&env));
        let workbook = workbook(vec![details_sheet(&[]), account_sheet(&["Memo"], &[])]);

        let report = inspect(&config, &workbook);
        assert!(report.problems().is_empty());
        assert!(report.sources()[0].key_group().is_none());
        assert!(report.sources()[0].files().is_empty());
    }

    #[test]
    fn test_inspect_problems() {
        let env = TestEnv::new();
        let config = config(&env, &chase_source(&env));
        let mut details = Worksheet::new("Details");
        details.set_value(1, 1, "Bank");
        let workbook = workbook(vec![details]);

        let report = inspect(&config, &workbook);
        let problems = report.problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("Transaction Description"));
        assert!(problems[1].contains("'Chase' does not exist"));
    }

    #[test]
    fn test_check_workbook_on_disk() {
        let env = TestEnv::new();
        let config = config(&env, &chase_source(&env));
        env.write_workbook(
            "Ledger.xlsx",
            &workbook(vec![
                details_sheet(&[("Chase", "Checking", "2024-01-05", "Coffee", -4.5)]),
                account_sheet(&["Date", "Description", "Amount"], &[]),
            ]),
        );
        let out = check(&config).unwrap();
        let report = out.structure().unwrap();
        assert!(report.working_copies().is_empty());
        assert!(report.workbook().ends_with("Ledger.xlsx"));

        env.write_workbook("Ledger.xlsx", &workbook(vec![details_sheet(&[])]));
        assert!(check(&config).is_err());
    }
}
