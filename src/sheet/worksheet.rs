//! The in-memory workbook the insertion engine mutates between a load and a save.
//!
//! Rows and columns are 1-based, as they are in the spreadsheet itself.

use crate::sheet::cell::{Cell, CellStyle, CellValue};
use crate::sheet::formula::adjust_for_insert;
use crate::Result;
use anyhow::anyhow;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use tracing::trace;

static EMPTY: CellValue = CellValue::Empty;

/// A single worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Worksheet {
    name: String,
    /// `rows[0]` is row 1.
    rows: Vec<BTreeMap<u16, Cell>>,
    col_widths: BTreeMap<u16, f64>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
            col_widths: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The last row that holds any cell, including styled blank cells. May overstate the last row
    /// of actual data.
    pub fn max_row(&self) -> u32 {
        self.rows.len() as u32
    }

    pub fn max_column(&self) -> u16 {
        self.rows
            .iter()
            .filter_map(|r| r.keys().next_back().copied())
            .max()
            .unwrap_or(0)
    }

    pub fn cell(&self, row: u32, col: u16) -> Option<&Cell> {
        if row == 0 {
            return None;
        }
        self.rows.get(row as usize - 1)?.get(&col)
    }

    pub fn value(&self, row: u32, col: u16) -> &CellValue {
        self.cell(row, col).map(Cell::value).unwrap_or(&EMPTY)
    }

    pub fn formula(&self, row: u32, col: u16) -> Option<&str> {
        self.cell(row, col).and_then(Cell::formula)
    }

    /// The cells of `row`, left to right.
    pub fn row_cells(&self, row: u32) -> impl Iterator<Item = (u16, &Cell)> {
        let cells = if row == 0 {
            None
        } else {
            self.rows.get(row as usize - 1)
        };
        cells.into_iter().flat_map(|r| r.iter().map(|(c, cell)| (*c, cell)))
    }

    fn cell_mut(&mut self, row: u32, col: u16) -> &mut Cell {
        let index = row.max(1) as usize - 1;
        if self.rows.len() <= index {
            self.rows.resize_with(index + 1, BTreeMap::new);
        }
        self.rows[index].entry(col.max(1)).or_default()
    }

    /// Writes a literal value. The cell keeps its style and loses any formula.
    pub fn set_value(&mut self, row: u32, col: u16, value: impl Into<CellValue>) {
        self.cell_mut(row, col).set_value(value.into());
    }

    /// Writes a formula along with the value it is expected to calculate to.
    pub fn set_formula(&mut self, row: u32, col: u16, formula: impl Into<String>, cached: CellValue) {
        self.cell_mut(row, col).set_formula(formula, cached);
    }

    pub fn set_style(&mut self, row: u32, col: u16, style: CellStyle) {
        self.cell_mut(row, col).set_style(style);
    }

    /// Removes the value and formula of a cell, keeping its style.
    pub fn clear(&mut self, row: u32, col: u16) {
        if self.cell(row, col).is_some() {
            self.cell_mut(row, col).set_value(CellValue::Empty);
        }
    }

    pub fn col_widths(&self) -> &BTreeMap<u16, f64> {
        &self.col_widths
    }

    pub fn set_col_width(&mut self, col: u16, width: f64) {
        self.col_widths.insert(col, width);
    }

    /// Inserts an empty row at `at`, moving `at` and everything below it down by one. Formulas are
    /// not adjusted; use [`Workbook::insert_row`] for that.
    pub(crate) fn shift_rows_down(&mut self, at: u32) {
        let index = at.max(1) as usize - 1;
        if index >= self.rows.len() {
            self.rows.resize_with(index + 1, BTreeMap::new);
        } else {
            self.rows.insert(index, BTreeMap::new());
        }
    }

    /// Maps each non-empty header in row 1, trimmed, to its column. The first occurrence of a
    /// duplicated header wins.
    pub fn header_map(&self) -> HashMap<String, u16> {
        let mut map = HashMap::new();
        for (col, cell) in self.row_cells(1) {
            let header = cell.value().to_text().trim().to_string();
            if !header.is_empty() {
                map.entry(header).or_insert(col);
            }
        }
        map
    }

    /// True when any cell of `row` within `cols` holds a formula.
    pub fn row_has_formula(&self, row: u32, cols: RangeInclusive<u16>) -> bool {
        self.row_cells(row)
            .any(|(col, cell)| cols.contains(&col) && cell.has_formula())
    }

    /// Gives every cell of `to` the style of the same column in `from`.
    pub fn copy_row_style(&mut self, from: u32, to: u32) {
        let styles: Vec<(u16, CellStyle)> = self
            .row_cells(from)
            .map(|(col, cell)| (col, cell.style().clone()))
            .collect();
        for (col, style) in styles {
            self.set_style(to, col, style);
        }
    }

    /// The last row, at or above [`Worksheet::max_row`], where any of `cols` is non-empty. Returns
    /// 1 (the header row) when no data row exists.
    pub fn last_data_row(&self, cols: &[u16]) -> u32 {
        let mut row = self.max_row();
        while row >= 2 {
            if cols.iter().any(|c| !self.value(row, *c).is_empty()) {
                return row;
            }
            row -= 1;
        }
        1
    }

    /// Counts rows below the header with at least one non-empty value within `cols`.
    pub fn count_occupied_rows(&self, cols: RangeInclusive<u16>) -> usize {
        (2..=self.max_row())
            .filter(|row| {
                self.row_cells(*row)
                    .any(|(col, cell)| cols.contains(&col) && !cell.value().is_empty())
            })
            .count()
    }

    /// Applies `f` to every formula on this sheet.
    fn rewrite_formulas<F>(&mut self, mut f: F)
    where
        F: FnMut(&str) -> String,
    {
        for row in self.rows.iter_mut() {
            for cell in row.values_mut() {
                if let Some(formula) = cell.formula() {
                    let rewritten = f(formula);
                    if rewritten != formula {
                        let cached = cell.value().clone();
                        cell.set_formula(rewritten, cached);
                    }
                }
            }
        }
    }
}

/// A workbook-level name such as `Accounts` for `Details!$B$2:$B$500`. A sheet-scoped name is
/// written `Sheet!Name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedName {
    name: String,
    formula: String,
}

impl DefinedName {
    pub fn new(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formula: formula.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the name refers to, without a leading `=`.
    pub fn formula(&self) -> &str {
        &self.formula
    }
}

/// An ordered collection of worksheets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
    defined_names: Vec<DefinedName>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sheet(&mut self, sheet: Worksheet) -> &mut Worksheet {
        self.sheets.push(sheet);
        let last = self.sheets.len() - 1;
        &mut self.sheets[last]
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    /// Adds a defined name. A leading `=` on `formula` is dropped. A name that is already defined
    /// is ignored and `false` returned.
    pub fn add_defined_name(&mut self, name: &str, formula: &str) -> bool {
        if self
            .defined_names
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(name))
        {
            return false;
        }
        let formula = formula.trim().trim_start_matches('=');
        self.defined_names.push(DefinedName::new(name, formula));
        true
    }

    pub fn defined_names(&self) -> &[DefinedName] {
        &self.defined_names
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(Worksheet::name).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.name() == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.name() == name)
    }

    pub fn require_sheet(&self, name: &str) -> Result<&Worksheet> {
        self.sheet(name)
            .ok_or_else(|| anyhow!("The workbook has no sheet named '{name}'"))
    }

    pub fn require_sheet_mut(&mut self, name: &str) -> Result<&mut Worksheet> {
        self.sheet_mut(name)
            .ok_or_else(|| anyhow!("The workbook has no sheet named '{name}'"))
    }

    /// Inserts an empty row at `at` on sheet `name` and adjusts every formula in the workbook that
    /// refers to rows of that sheet at or below `at`, the way a spreadsheet application does.
    pub fn insert_row(&mut self, name: &str, at: u32) -> Result<()> {
        let target = self.require_sheet(name)?.name().to_string();
        trace!("Inserting row {at} on '{target}'");
        for sheet in self.sheets.iter_mut() {
            let sheet_name = sheet.name().to_string();
            sheet.rewrite_formulas(|f| adjust_for_insert(f, &sheet_name, &target, at));
        }
        for defined in self.defined_names.iter_mut() {
            defined.formula = adjust_for_insert(&defined.formula, "", &target, at);
        }
        self.require_sheet_mut(name)?.shift_rows_down(at);
        Ok(())
    }
}
