//! Finds the input files a source's `files` patterns refer to.
//!
//! Bank downloads land with unpredictable capitalization (`Export.CSV`, `export.csv`), so file
//! names and wildcard patterns are matched case-insensitively. Wildcards are supported in the file
//! name component only.

use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Extensions that are collected as statement files.
pub const STATEMENT_EXTENSIONS: &[&str] = &["csv", "txt", "ofx", "qfx"];

/// Extensions that can actually be read as delimited text.
pub const DELIMITED_EXTENSIONS: &[&str] = &["csv", "txt"];

const NAME_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Returns the statement files matching `pattern`, sorted and without duplicates.
///
/// - A directory yields every statement file directly inside it.
/// - A name containing `*`, `?` or `[` is matched as a wildcard pattern.
/// - Any other name is matched exactly, ignoring case.
pub fn collect_files(pattern: &str) -> Vec<PathBuf> {
    let base = expand_home(pattern);
    if base.is_dir() {
        return list_dir(&base)
            .into_iter()
            .filter(|p| has_extension(p, STATEMENT_EXTENSIONS))
            .collect();
    }

    let parent = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(name) = base.file_name().map(|n| n.to_string_lossy().to_string()) else {
        warn!("The file pattern '{pattern}' has no file name");
        return Vec::new();
    };
    if !parent.is_dir() {
        warn!(
            "The directory '{}' for file pattern '{pattern}' does not exist",
            parent.display()
        );
        return Vec::new();
    }

    let matcher = match Pattern::new(&name) {
        Ok(m) => m,
        Err(e) => {
            warn!("Invalid file pattern '{pattern}': {e}");
            return Vec::new();
        }
    };

    let hits: BTreeSet<PathBuf> = list_dir(&parent)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| matcher.matches_with(&n.to_string_lossy(), NAME_MATCH))
                .unwrap_or(false)
        })
        .filter(|p| has_extension(p, STATEMENT_EXTENSIONS))
        .collect();
    debug!("Pattern '{pattern}' matched {} file(s)", hits.len());
    hits.into_iter().collect()
}

/// Collects the files for every pattern, in pattern order, without duplicates.
pub fn collect_all<S: AsRef<str>>(patterns: &[S]) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for pattern in patterns {
        for path in collect_files(pattern.as_ref()) {
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    out
}

/// Returns true if `path` has one of `extensions`, ignoring case.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .map(|e| extensions.contains(&e.as_str()))
        .unwrap_or(false)
}

/// Replaces a leading `~` with the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unable to list directory {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, "Date\n").unwrap();
        p
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_exact_name_ignores_case() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "Export.CSV");
        let pattern = dir.path().join("export.csv");
        let found = collect_files(&pattern.display().to_string());
        assert_eq!(names(&found), vec!["Export.CSV"]);
    }

    #[test]
    fn test_wildcard() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "Chase_2024_01.csv");
        touch(dir.path(), "chase_2024_02.CSV");
        touch(dir.path(), "amex_2024_01.csv");
        touch(dir.path(), "chase_notes.pdf");
        let pattern = dir.path().join("chase_*");
        let found = collect_files(&pattern.display().to_string());
        assert_eq!(names(&found), vec!["Chase_2024_01.csv", "chase_2024_02.CSV"]);
    }

    #[test]
    fn test_character_class() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a1.csv");
        touch(dir.path(), "a2.csv");
        touch(dir.path(), "a3.csv");
        let pattern = dir.path().join("a[12].csv");
        let found = collect_files(&pattern.display().to_string());
        assert_eq!(names(&found), vec!["a1.csv", "a2.csv"]);
        let pattern = dir.path().join("a[!12].csv");
        let found = collect_files(&pattern.display().to_string());
        assert_eq!(names(&found), vec!["a3.csv"]);
    }

    #[test]
    fn test_directory_lists_statement_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.txt");
        touch(dir.path(), "a.qfx");
        touch(dir.path(), "c.xlsx");
        let found = collect_files(&dir.path().display().to_string());
        assert_eq!(names(&found), vec!["a.qfx", "b.txt"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.csv");
        let pattern = dir.path().join("a[.csv");
        assert!(collect_files(&pattern.display().to_string()).is_empty());
    }

    #[test]
    fn test_missing_directory() {
        let found = collect_files("/definitely/not/here/*.csv");
        assert!(found.is_empty());
    }

    #[test]
    fn test_collect_all_dedupes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.csv");
        let p1 = dir.path().join("a.csv").display().to_string();
        let p2 = dir.path().join("*.csv").display().to_string();
        let found = collect_all(&[p1, p2]);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("x.CSV"), DELIMITED_EXTENSIONS));
        assert!(!has_extension(Path::new("x.ofx"), DELIMITED_EXTENSIONS));
        assert!(!has_extension(Path::new("x"), DELIMITED_EXTENSIONS));
    }
}
