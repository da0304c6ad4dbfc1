//! Converts between .xlsx files and the in-memory [`Workbook`].
//!
//! Cell values and formulas are read with `calamine`, styles and column widths with
//! [`read_layout`], and the whole workbook is written back with `rust_xlsxwriter`. Only what the
//! in-memory model holds survives a round trip: values, formulas with their cached results, basic
//! cell styles, column widths and defined names. Built-in `_xlnm.` names such as print areas are
//! not carried over.

use crate::sheet::cell::{Cell, CellStyle, CellValue};
use crate::sheet::styles::read_layout;
use crate::sheet::worksheet::{Workbook, Worksheet};
use crate::Result;
use anyhow::Context;
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, FormatUnderline, Formula};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, trace, warn};

const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Reads every sheet of the .xlsx file at `path`.
pub fn read_workbook(path: &Path) -> Result<Workbook> {
    let mut xlsx: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Unable to open workbook {}", path.display()))?;
    let names = xlsx.sheet_names().to_vec();
    let (styles, layouts) = read_layout(path, &names)?;

    let mut workbook = Workbook::new();
    for (name, layout) in names.iter().zip(layouts) {
        let mut sheet = Worksheet::new(name);

        let range = xlsx
            .worksheet_range(name)
            .with_context(|| format!("Unable to read sheet '{name}'"))?;
        let (row0, col0) = range.start().unwrap_or((0, 0));
        for (r, c, data) in range.used_cells() {
            let Some((row, col)) = position(row0, col0, r, c) else {
                continue;
            };
            let value = cell_value(data);
            if value != CellValue::Empty {
                sheet.set_value(row, col, value);
            }
        }

        let formulas = xlsx
            .worksheet_formula(name)
            .with_context(|| format!("Unable to read formulas of sheet '{name}'"))?;
        let (row0, col0) = formulas.start().unwrap_or((0, 0));
        for (r, c, formula) in formulas.used_cells() {
            if formula.trim().is_empty() {
                continue;
            }
            let Some((row, col)) = position(row0, col0, r, c) else {
                continue;
            };
            let cached = sheet.value(row, col).clone();
            sheet.set_formula(row, col, formula.as_str(), cached);
        }

        for (row, col, style_id) in layout.cell_styles {
            if let Some(style) = styles.get(style_id) {
                sheet.set_style(row, col, style.clone());
            }
        }
        for (col, width) in layout.col_widths {
            sheet.set_col_width(col, width);
        }

        debug!(
            "Read sheet '{name}' with {} rows and {} columns",
            sheet.max_row(),
            sheet.max_column()
        );
        workbook.add_sheet(sheet);
    }

    for (name, formula) in xlsx.defined_names() {
        if name.is_empty() || name.starts_with("_xlnm.") {
            debug!("Not keeping defined name '{name}'");
            continue;
        }
        if !workbook.add_defined_name(name, formula) {
            warn!("Defined name '{name}' appears more than once, keeping the first");
        }
    }
    Ok(workbook)
}

/// Writes `workbook` to `path` as a new .xlsx file.
pub fn write_workbook(workbook: &Workbook, path: &Path) -> Result<()> {
    let mut out = rust_xlsxwriter::Workbook::new();
    let mut formats: HashMap<CellStyle, Format> = HashMap::new();

    for sheet in workbook.sheets() {
        let ws = out.add_worksheet();
        ws.set_name(sheet.name())
            .with_context(|| format!("Invalid sheet name '{}'", sheet.name()))?;
        for (col, width) in sheet.col_widths() {
            ws.set_column_width(col - 1, stored_width_to_chars(*width))?;
        }
        for row in 1..=sheet.max_row() {
            for (col, cell) in sheet.row_cells(row) {
                write_cell(ws, row - 1, col - 1, cell, &mut formats).with_context(|| {
                    format!("Unable to write cell {row},{col} of '{}'", sheet.name())
                })?;
            }
        }
        trace!("Wrote sheet '{}'", sheet.name());
    }
    for defined in workbook.defined_names() {
        out.define_name(defined.name(), &format!("={}", defined.formula()))
            .with_context(|| format!("Unable to define name '{}'", defined.name()))?;
    }

    out.save(path)
        .with_context(|| format!("Unable to save workbook {}", path.display()))?;
    Ok(())
}

fn position(row0: u32, col0: u32, r: usize, c: usize) -> Option<(u32, u16)> {
    let row = row0.checked_add(u32::try_from(r).ok()?)?.checked_add(1)?;
    let col = col0.checked_add(u32::try_from(c).ok()?)?.checked_add(1)?;
    Some((row, u16::try_from(col).ok()?))
}

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(dt) if dt.time() == NaiveTime::MIN => CellValue::Date(dt.date()),
            Some(dt) => CellValue::DateTime(dt),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::DateTime)
            .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(CellValue::Date))
            .unwrap_or_else(|_| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
    }
}

fn write_cell(
    ws: &mut rust_xlsxwriter::Worksheet,
    row: u32,
    col: u16,
    cell: &Cell,
    formats: &mut HashMap<CellStyle, Format>,
) -> Result<()> {
    let mut style = cell.style().clone();
    if style.num_format.is_none() {
        match cell.value() {
            CellValue::Date(_) => style.num_format = Some(DATE_FORMAT.to_string()),
            CellValue::DateTime(_) => style.num_format = Some(DATETIME_FORMAT.to_string()),
            _ => {}
        }
    }
    let format = formats
        .entry(style.clone())
        .or_insert_with(|| to_format(&style));

    if let Some(formula) = cell.formula() {
        let mut formula = Formula::new(formula);
        if !cell.value().is_empty() {
            formula = formula.set_result(cached_result(cell.value()));
        }
        ws.write_formula_with_format(row, col, formula, format)?;
        return Ok(());
    }

    match cell.value() {
        CellValue::Empty => {
            if !style.is_default() {
                ws.write_blank(row, col, format)?;
            }
        }
        CellValue::Text(s) | CellValue::Error(s) => {
            ws.write_string_with_format(row, col, s, format)?;
        }
        CellValue::Number(n) => {
            ws.write_number_with_format(row, col, *n, format)?;
        }
        CellValue::Bool(b) => {
            ws.write_boolean_with_format(row, col, *b, format)?;
        }
        CellValue::Date(d) => {
            ws.write_number_with_format(row, col, date_serial(*d), format)?;
        }
        CellValue::DateTime(dt) => {
            ws.write_number_with_format(row, col, datetime_serial(*dt), format)?;
        }
    }
    Ok(())
}

/// The text stored as a formula's cached result. Dates are stored as serial numbers, the way the
/// spreadsheet itself stores them.
fn cached_result(value: &CellValue) -> String {
    match value {
        CellValue::Date(d) => date_serial(*d).to_string(),
        CellValue::DateTime(dt) => datetime_serial(*dt).to_string(),
        other => other.to_text(),
    }
}

fn to_format(style: &CellStyle) -> Format {
    let mut format = Format::new();
    if let Some(num_format) = &style.num_format {
        format = format.set_num_format(num_format);
    }
    if style.bold {
        format = format.set_bold();
    }
    if style.italic {
        format = format.set_italic();
    }
    if style.underline {
        format = format.set_underline(FormatUnderline::Single);
    }
    if let Some(color) = style.font_color {
        format = format.set_font_color(Color::RGB(color));
    }
    if let Some(color) = style.fill_color {
        format = format.set_background_color(Color::RGB(color));
    }
    if style.border {
        format = format.set_border(FormatBorder::Thin);
    }
    let align = match style.h_align.as_deref() {
        Some("left") => Some(FormatAlign::Left),
        Some("center") => Some(FormatAlign::Center),
        Some("right") => Some(FormatAlign::Right),
        Some("fill") => Some(FormatAlign::Fill),
        Some("justify") => Some(FormatAlign::Justify),
        Some("centerContinuous") | Some("distributed") => Some(FormatAlign::CenterAcross),
        _ => None,
    };
    if let Some(align) = align {
        format = format.set_align(align);
    }
    format
}

/// Days since 1899-12-30, the 1900 date system's day zero for all dates after February 1900.
fn date_serial(date: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default();
    (date - epoch).num_days() as f64
}

fn datetime_serial(dt: NaiveDateTime) -> f64 {
    let seconds = dt.time().signed_duration_since(NaiveTime::MIN).num_seconds();
    date_serial(dt.date()) + seconds as f64 / 86_400.0
}

/// Widths in the file include cell padding that `rust_xlsxwriter` adds back when writing.
fn stored_width_to_chars(width: f64) -> f64 {
    const PADDING: f64 = 5.0 / 7.0;
    if width > 1.0 + PADDING {
        width - PADDING
    } else {
        width
    }
}
