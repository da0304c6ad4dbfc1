//! The ledger workbook: an in-memory model of its sheets, cells, formulas and styles, and the
//! store that loads and saves it.

pub mod cell;
pub mod formula;
pub mod store;
pub mod styles;
pub mod worksheet;
pub mod xlsx;

pub use cell::{Cell, CellStyle, CellValue};
pub use formula::{clone_formula, ClonedFormula};
pub use store::{WorkbookStore, XlsxStore};
pub use worksheet::{DefinedName, Workbook, Worksheet};

#[cfg(test)]
pub(crate) use store::MemoryStore;
