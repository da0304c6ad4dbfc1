//! Working copies of the ledger workbook.
//!
//! An import never mutates the configured workbook directly. It first copies it to a sibling file
//! named `{stem} {YYYY-MM-DDTHH-MM-SS.mmm}{ext}` (local time) and mutates only the copy, so the
//! original is always left as it was.

use crate::{utils, Result};
use anyhow::{bail, Context};
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use tracing::info;

/// The timestamp in a working copy's file name. Colons are not allowed in Windows file names.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Copies `original` to a new timestamped working copy beside it and returns the copy's path.
pub fn create_working_copy(original: &Path) -> Result<PathBuf> {
    if !original.is_file() {
        bail!("Original file does not exist: {}", original.display());
    }
    let path = working_copy_path(original, Local::now().naive_local())?;
    if path.exists() {
        bail!("A working copy named {} already exists", path.display());
    }
    utils::copy(original, &path)?;
    info!("Created working copy: {}", path.display());
    Ok(path)
}

/// The working copy path for `original` made at `now`.
fn working_copy_path(original: &Path, now: NaiveDateTime) -> Result<PathBuf> {
    let (stem, extension) = split_name(original)?;
    let timestamp = now.format(TIMESTAMP_FORMAT);
    Ok(original.with_file_name(format!("{stem} {timestamp}{extension}")))
}

/// Existing working copies of `original`, oldest first.
pub fn list_working_copies(original: &Path) -> Result<Vec<PathBuf>> {
    let (stem, extension) = split_name(original)?;
    let dir = match original.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("Unable to read directory {}", dir.display()))?;

    let mut copies: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.context("Failed to read directory entry")?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(timestamp) = parse_copy_timestamp(&name, &stem, &extension) {
            copies.push((timestamp, entry.path()));
        }
    }
    copies.sort();
    Ok(copies.into_iter().map(|(_, path)| path).collect())
}

/// The file stem and the extension, with its leading dot, of `path`.
fn split_name(path: &Path) -> Result<(String, String)> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    Ok((stem, extension))
}

/// Parses the timestamp out of a working copy file name. Returns None if the file name doesn't
/// match the expected pattern.
fn parse_copy_timestamp(filename: &str, stem: &str, extension: &str) -> Option<NaiveDateTime> {
    let remainder = filename.strip_prefix(stem)?.strip_prefix(' ')?;
    let timestamp = remainder.strip_suffix(extension)?;
    NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn test_working_copy_path() {
        let path = working_copy_path(Path::new("/books/Ledger 2025.xlsx"), at(14, 5, 9, 42)).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/books/Ledger 2025 2025-03-09T14-05-09.042.xlsx")
        );
    }

    #[test]
    fn test_parse_copy_timestamp() {
        assert_eq!(
            parse_copy_timestamp("Ledger 2025-03-09T14-05-09.042.xlsx", "Ledger", ".xlsx"),
            Some(at(14, 5, 9, 42))
        );
        // Wrong stem
        assert_eq!(
            parse_copy_timestamp("Budget 2025-03-09T14-05-09.042.xlsx", "Ledger", ".xlsx"),
            None
        );
        // The original itself
        assert_eq!(parse_copy_timestamp("Ledger.xlsx", "Ledger", ".xlsx"), None);
        // Not a timestamp
        assert_eq!(
            parse_copy_timestamp("Ledger final.xlsx", "Ledger", ".xlsx"),
            None
        );
    }

    #[test]
    fn test_create_and_list_working_copies() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("Ledger.xlsx");
        std::fs::write(&original, "workbook bytes").unwrap();
        std::fs::write(dir.path().join("Ledger 2020-01-01T00-00-00.000.xlsx"), "old").unwrap();
        std::fs::write(dir.path().join("Other.xlsx"), "other").unwrap();

        let copy = create_working_copy(&original).unwrap();
        assert_eq!(std::fs::read_to_string(&copy).unwrap(), "workbook bytes");
        assert_eq!(std::fs::read_to_string(&original).unwrap(), "workbook bytes");

        let copies = list_working_copies(&original).unwrap();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[1], copy);
    }

    #[test]
    fn test_create_working_copy_missing_original() {
        let dir = TempDir::new().unwrap();
        assert!(create_working_copy(&dir.path().join("missing.xlsx")).is_err());
    }
}
