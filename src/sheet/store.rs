//! Where a workbook is loaded from and saved to.
//!
//! Every insertion call loads the workbook, mutates it in memory and saves it again, so the file
//! on disk is always a complete snapshot as of the last finished call.

use crate::sheet::worksheet::Workbook;
use crate::sheet::xlsx::{read_workbook, write_workbook};
use crate::{utils, Result};
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A source and destination for the ledger workbook.
pub trait WorkbookStore {
    /// Loads the workbook, failing if it is missing, unreadable or corrupt.
    fn load(&self) -> Result<Workbook>;

    /// Saves `workbook`, replacing the previous contents.
    fn save(&self, workbook: &Workbook) -> Result<()>;

    /// A human-readable description of where the workbook lives, for log messages.
    fn describe(&self) -> String;
}

/// A workbook stored as an .xlsx file.
#[derive(Debug, Clone)]
pub struct XlsxStore {
    path: PathBuf,
}

impl XlsxStore {
    /// Validates that `path` names an existing .xlsx file and resolves it to an absolute path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("The workbook does not exist: {}", path.display());
        }
        if !path.is_file() {
            bail!("The workbook path is not a file: {}", path.display());
        }
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "xlsx" => {}
            "xlsm" => bail!(
                "Macro-enabled workbooks are not supported, saving would drop the macros: {}. \
                 Save a copy as .xlsx and point target_workbook at it",
                path.display()
            ),
            _ => bail!("The workbook must be an .xlsx file: {}", path.display()),
        }
        Ok(Self {
            path: utils::canonicalize(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A sibling of the workbook used to stage a save, so a failed write never truncates the
    /// workbook itself.
    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{name}.saving.xlsx"))
    }
}

impl WorkbookStore for XlsxStore {
    fn load(&self) -> Result<Workbook> {
        debug!("Loading workbook {}", self.path.display());
        read_workbook(&self.path)
            .with_context(|| format!("Failed to load workbook {}", self.path.display()))
    }

    fn save(&self, workbook: &Workbook) -> Result<()> {
        let staging = self.staging_path();
        let result = write_workbook(workbook, &staging).and_then(|_| utils::rename(&staging, &self.path));
        if let Err(e) = result {
            if let Err(cleanup) = utils::remove(&staging) {
                warn!("{cleanup:#}");
            }
            return Err(e).with_context(|| format!("Failed to save workbook {}", self.path.display()));
        }
        debug!("Saved workbook {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An in-memory store for tests. Counts saves so tests can assert that a dry run writes nothing.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    workbook: std::cell::RefCell<Workbook>,
    saves: std::cell::Cell<usize>,
}

#[cfg(test)]
impl MemoryStore {
    pub(crate) fn new(workbook: Workbook) -> Self {
        Self {
            workbook: std::cell::RefCell::new(workbook),
            saves: std::cell::Cell::new(0),
        }
    }

    pub(crate) fn workbook(&self) -> Workbook {
        self.workbook.borrow().clone()
    }

    pub(crate) fn saves(&self) -> usize {
        self.saves.get()
    }
}

#[cfg(test)]
impl WorkbookStore for MemoryStore {
    fn load(&self) -> Result<Workbook> {
        Ok(self.workbook.borrow().clone())
    }

    fn save(&self, workbook: &Workbook) -> Result<()> {
        *self.workbook.borrow_mut() = workbook.clone();
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
