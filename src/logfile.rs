//! The optional run log: a file that receives every log event alongside stderr.

use crate::{utils, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Creates a new log file in `dir`, creating `dir` if needed, and returns its path and handle.
pub fn create_log_file(dir: &Path, dry_run: bool) -> Result<(PathBuf, File)> {
    utils::create_dir_all(dir)?;
    let path = dir.join(log_file_name(Utc::now(), dry_run));
    let file = File::create(&path)
        .with_context(|| format!("Unable to create log file {}", path.display()))?;
    Ok((path, file))
}

/// `Log 2025-03-09T14-05-09Z.txt`, or `Log 2025-03-09T14-05-09Z dry-run.txt`.
fn log_file_name(now: DateTime<Utc>, dry_run: bool) -> String {
    let suffix = if dry_run { " dry-run" } else { "" };
    format!("Log {}{suffix}.txt", now.format(TIMESTAMP_FORMAT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_name() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 9).unwrap();
        assert_eq!(log_file_name(now, false), "Log 2025-03-09T14-05-09Z.txt");
        assert_eq!(log_file_name(now, true), "Log 2025-03-09T14-05-09Z dry-run.txt");
    }

    #[test]
    fn test_create_log_file() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let (path, _file) = create_log_file(&logs, true).unwrap();
        assert!(path.is_file());
        assert!(path.starts_with(&logs));
        assert!(path.to_string_lossy().ends_with(" dry-run.txt"));
    }
}
