//! Reads the parts of an .xlsx package that the value reader does not: cell styles (from
//! `xl/styles.xml`), which cells use them, and column widths.

use crate::sheet::cell::CellStyle;
use crate::sheet::formula::parse_a1;
use crate::Result;
use anyhow::Context;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

/// The style references and column widths of one worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetLayout {
    /// `(row, col, style index)`, 1-based, for cells with a non-default style.
    pub cell_styles: Vec<(u32, u16, usize)>,
    pub col_widths: BTreeMap<u16, f64>,
}

/// The style table of a workbook plus the layout of each requested sheet, in request order.
pub fn read_layout(path: &Path, sheet_names: &[String]) -> Result<(Vec<CellStyle>, Vec<SheetLayout>)> {
    let file = File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("{} is not an .xlsx package", path.display()))?;

    let styles = match read_part(&mut archive, "xl/styles.xml") {
        Some(xml) => parse_styles_xml(&xml),
        None => Vec::new(),
    };
    let workbook_xml = read_part(&mut archive, "xl/workbook.xml").unwrap_or_default();
    let rels_xml = read_part(&mut archive, "xl/_rels/workbook.xml.rels").unwrap_or_default();
    let paths = worksheet_paths(&workbook_xml, &rels_xml);

    let layouts = sheet_names
        .iter()
        .map(|name| {
            let Some(part) = paths.get(name) else {
                debug!("No worksheet part found for '{name}'");
                return SheetLayout::default();
            };
            read_part(&mut archive, part)
                .map(|xml| parse_sheet_layout(&xml))
                .unwrap_or_default()
        })
        .collect();
    Ok((styles, layouts))
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut content = String::new();
    match file.read_to_string(&mut content) {
        Ok(_) => Some(content),
        Err(e) => {
            warn!("Unable to read '{name}' from the workbook: {e}");
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Font {
    bold: bool,
    italic: bool,
    underline: bool,
    color: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct Xf {
    num_fmt_id: u16,
    font_id: usize,
    fill_id: usize,
    border_id: usize,
    h_align: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    NumFmts,
    Fonts,
    Fills,
    Borders,
    CellStyleXfs,
    CellXfs,
}

struct StylesParser {
    section: Section,
    num_fmts: HashMap<u16, String>,
    fonts: Vec<Font>,
    fills: Vec<Option<u32>>,
    borders: Vec<bool>,
    xfs: Vec<Xf>,
    font: Font,
    fill: Option<u32>,
    border: bool,
    xf: Xf,
}

impl StylesParser {
    fn new() -> Self {
        Self {
            section: Section::Other,
            num_fmts: HashMap::new(),
            fonts: Vec::new(),
            fills: Vec::new(),
            borders: Vec::new(),
            xfs: Vec::new(),
            font: Font::default(),
            fill: None,
            border: false,
            xf: Xf::default(),
        }
    }

    fn open(&mut self, e: &BytesStart, empty: bool) {
        let name = e.name();
        match (self.section, name.as_ref()) {
            (_, b"numFmts") => self.section = Section::NumFmts,
            (_, b"fonts") => self.section = Section::Fonts,
            (_, b"fills") => self.section = Section::Fills,
            (_, b"borders") => self.section = Section::Borders,
            (_, b"cellStyleXfs") => self.section = Section::CellStyleXfs,
            (_, b"cellXfs") => self.section = Section::CellXfs,
            (Section::NumFmts, b"numFmt") => {
                let id = attr(e, b"numFmtId").and_then(|s| s.parse().ok());
                if let (Some(id), Some(code)) = (id, attr(e, b"formatCode")) {
                    self.num_fmts.insert(id, code);
                }
            }
            (Section::Fonts, b"font") => {
                self.font = Font::default();
                if empty {
                    self.fonts.push(Font::default());
                }
            }
            (Section::Fonts, b"b") => self.font.bold = is_on(e),
            (Section::Fonts, b"i") => self.font.italic = is_on(e),
            (Section::Fonts, b"u") => {
                self.font.underline = attr(e, b"val").map(|v| v != "none").unwrap_or(true)
            }
            (Section::Fonts, b"color") => self.font.color = rgb(e),
            (Section::Fills, b"fill") => {
                self.fill = None;
                if empty {
                    self.fills.push(None);
                }
            }
            (Section::Fills, b"fgColor") => self.fill = rgb(e),
            (Section::Borders, b"border") => {
                self.border = false;
                if empty {
                    self.borders.push(false);
                }
            }
            (Section::Borders, b"left" | b"right" | b"top" | b"bottom") => {
                if attr(e, b"style").map(|s| s != "none").unwrap_or(false) {
                    self.border = true;
                }
            }
            (Section::CellXfs, b"xf") => {
                self.xf = Xf {
                    num_fmt_id: attr(e, b"numFmtId").and_then(|s| s.parse().ok()).unwrap_or(0),
                    font_id: attr(e, b"fontId").and_then(|s| s.parse().ok()).unwrap_or(0),
                    fill_id: attr(e, b"fillId").and_then(|s| s.parse().ok()).unwrap_or(0),
                    border_id: attr(e, b"borderId").and_then(|s| s.parse().ok()).unwrap_or(0),
                    h_align: None,
                };
                if empty {
                    self.xfs.push(self.xf.clone());
                }
            }
            (Section::CellXfs, b"alignment") => self.xf.h_align = attr(e, b"horizontal"),
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match (self.section, name) {
            (_, b"numFmts" | b"fonts" | b"fills" | b"borders" | b"cellStyleXfs" | b"cellXfs") => {
                self.section = Section::Other
            }
            (Section::Fonts, b"font") => self.fonts.push(std::mem::take(&mut self.font)),
            (Section::Fills, b"fill") => self.fills.push(self.fill.take()),
            (Section::Borders, b"border") => {
                self.borders.push(self.border);
                self.border = false;
            }
            (Section::CellXfs, b"xf") => self.xfs.push(std::mem::take(&mut self.xf)),
            _ => {}
        }
    }

    fn finish(self) -> Vec<CellStyle> {
        self.xfs
            .iter()
            .map(|xf| {
                let font = self.fonts.get(xf.font_id).cloned().unwrap_or_default();
                let num_format = match xf.num_fmt_id {
                    0 => None,
                    id => self
                        .num_fmts
                        .get(&id)
                        .cloned()
                        .or_else(|| builtin_num_format(id).map(str::to_string)),
                };
                CellStyle {
                    num_format,
                    bold: font.bold,
                    italic: font.italic,
                    underline: font.underline,
                    font_color: font.color,
                    fill_color: self.fills.get(xf.fill_id).copied().flatten(),
                    border: self.borders.get(xf.border_id).copied().unwrap_or(false),
                    h_align: xf.h_align.clone().filter(|a| a != "general"),
                }
            })
            .collect()
    }
}

/// Parses `xl/styles.xml` into one [`CellStyle`] per `cellXfs` entry, indexed like the `s`
/// attribute of worksheet cells. Theme and indexed colors are not resolved.
pub fn parse_styles_xml(xml: &str) -> Vec<CellStyle> {
    let mut parser = StylesParser::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => parser.open(e, false),
            Ok(Event::Empty(ref e)) => parser.open(e, true),
            Ok(Event::End(ref e)) => parser.close(e.name().as_ref()),
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("Stopped reading styles at a malformed element: {e}");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    parser.finish()
}

/// Parses a worksheet part for styled cells and column widths.
pub fn parse_sheet_layout(xml: &str) -> SheetLayout {
    let mut layout = SheetLayout::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"c" => {
                    let style = attr(e, b"s").and_then(|s| s.parse::<usize>().ok());
                    let position = attr(e, b"r").and_then(|r| parse_a1(&r));
                    if let (Some(style), Some((row, col))) = (style, position) {
                        if style > 0 {
                            layout.cell_styles.push((row, col, style));
                        }
                    }
                }
                b"col" => {
                    let min = attr(e, b"min").and_then(|s| s.parse::<u16>().ok());
                    let max = attr(e, b"max").and_then(|s| s.parse::<u16>().ok());
                    let width = attr(e, b"width").and_then(|s| s.parse::<f64>().ok());
                    if let (Some(min), Some(max), Some(width)) = (min, max, width) {
                        // a single <col> may cover every column of the sheet
                        for col in min..=max.min(min.saturating_add(255)) {
                            layout.col_widths.insert(col, width);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("Stopped reading a worksheet layout at a malformed element: {e}");
                break;
            }
            _ => {}
        }
        buf.clear();
    }
    layout
}

/// Maps sheet names to their worksheet part inside the package, e.g. `xl/worksheets/sheet1.xml`.
fn worksheet_paths(workbook_xml: &str, rels_xml: &str) -> HashMap<String, String> {
    let mut sheets: Vec<(String, String)> = Vec::new();
    for_each_element(workbook_xml, b"sheet", |e| {
        if let (Some(name), Some(rid)) = (attr(e, b"name"), attr(e, b"r:id")) {
            sheets.push((name, rid));
        }
    });
    let mut targets: HashMap<String, String> = HashMap::new();
    for_each_element(rels_xml, b"Relationship", |e| {
        if let (Some(id), Some(target)) = (attr(e, b"Id"), attr(e, b"Target")) {
            targets.insert(id, target);
        }
    });
    sheets
        .into_iter()
        .filter_map(|(name, rid)| {
            let target = targets.get(&rid)?;
            let part = match target.strip_prefix('/') {
                Some(absolute) => absolute.to_string(),
                None => format!("xl/{target}"),
            };
            Some((name, part))
        })
        .collect()
}

fn for_each_element<F>(xml: &str, element: &[u8], mut f: F)
where
    F: FnMut(&BytesStart),
{
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.name().as_ref() == element => {
                f(e)
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
}

/// An attribute value with the predefined XML entities unescaped.
fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| unescape_xml(&String::from_utf8_lossy(&a.value)))
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// `<b/>` is on, `<b val="0"/>` is off.
fn is_on(e: &BytesStart) -> bool {
    attr(e, b"val")
        .map(|v| !matches!(v.as_str(), "0" | "false"))
        .unwrap_or(true)
}

/// An `rgb="AARRGGBB"` color as `0xRRGGBB`.
fn rgb(e: &BytesStart) -> Option<u32> {
    let hex = attr(e, b"rgb")?;
    let hex = hex.trim();
    let rgb = if hex.len() == 8 { &hex[2..] } else { hex };
    if rgb.len() != 6 {
        return None;
    }
    u32::from_str_radix(rgb, 16).ok()
}

/// Number formats every spreadsheet application knows by id.
fn builtin_num_format(id: u16) -> Option<&'static str> {
    let code = match id {
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        12 => "# ?/?",
        13 => "# ??/??",
        14 => "mm-dd-yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        37 => "#,##0 ;(#,##0)",
        38 => "#,##0 ;[Red](#,##0)",
        39 => "#,##0.00;(#,##0.00)",
        40 => "#,##0.00;[Red](#,##0.00)",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        48 => "##0.0E+0",
        49 => "@",
        _ => return None,
    };
    Some(code)
}
