//! Minimal single-sheet SpreadsheetML writer for report exports.
//!
//! Only what the certificate list needs: inline strings, numbers, a fixed style
//! table, merged ranges, column widths and row heights.

use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

/// Index into the `cellXfs` table written by `styles_xml`; entry 0 is the default style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStyle {
    Body = 1,
    Header = 2,
    Info = 3,
    Title = 4,
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    cells: BTreeMap<u32, BTreeMap<u32, (CellValue, CellStyle)>>,
    merges: Vec<String>,
    col_widths: BTreeMap<u32, f64>,
    row_heights: BTreeMap<u32, f64>,
}

impl Sheet {
    pub fn new(name: &str) -> Self {
        Sheet {
            name: name.to_string(),
            cells: BTreeMap::new(),
            merges: Vec::new(),
            col_widths: BTreeMap::new(),
            row_heights: BTreeMap::new(),
        }
    }

    /// 1-based row and column.
    pub fn set(&mut self, row: u32, col: u32, value: impl Into<CellValue>, style: CellStyle) {
        self.cells
            .entry(row)
            .or_default()
            .insert(col, (value.into(), style));
    }

    /// Styles a cell without giving it a value (borders on merged edges).
    pub fn style_only(&mut self, row: u32, col: u32, style: CellStyle) {
        self.set(row, col, "", style);
    }

    pub fn merge(&mut self, range: &str) {
        self.merges.push(range.to_string());
    }

    pub fn col_width(&mut self, col: u32, width: f64) {
        self.col_widths.insert(col, width);
    }

    pub fn row_height(&mut self, row: u32, height: f64) {
        self.row_heights.insert(row, height);
    }

    pub fn row_count(&self) -> u32 {
        self.cells.keys().next_back().copied().unwrap_or(0)
    }
}

/// 1 -> "A", 27 -> "AA".
pub fn column_letter(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        out.push((b'A' + rem as u8) as char);
        col = (col - 1) / 26;
    }
    out.iter().rev().collect()
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {}
            c => out.push(c),
        }
    }
    out
}

fn sheet_xml(sheet: &Sheet) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
    );
    if !sheet.col_widths.is_empty() {
        xml.push_str("<cols>");
        for (col, width) in &sheet.col_widths {
            xml.push_str(&format!(
                "<col min=\"{col}\" max=\"{col}\" width=\"{width}\" customWidth=\"1\"/>"
            ));
        }
        xml.push_str("</cols>");
    }
    xml.push_str("<sheetData>");
    let mut rows: Vec<u32> = sheet.cells.keys().copied().collect();
    for r in sheet.row_heights.keys() {
        if !sheet.cells.contains_key(r) {
            rows.push(*r);
        }
    }
    rows.sort_unstable();
    for r in rows {
        match sheet.row_heights.get(&r) {
            Some(h) => xml.push_str(&format!("<row r=\"{r}\" ht=\"{h}\" customHeight=\"1\">")),
            None => xml.push_str(&format!("<row r=\"{r}\">")),
        }
        if let Some(cells) = sheet.cells.get(&r) {
            for (c, (value, style)) in cells {
                let reference = format!("{}{}", column_letter(*c), r);
                let s = *style as u32;
                match value {
                    CellValue::Number(n) => {
                        xml.push_str(&format!("<c r=\"{reference}\" s=\"{s}\"><v>{n}</v></c>"))
                    }
                    CellValue::Text(t) if t.is_empty() => {
                        xml.push_str(&format!("<c r=\"{reference}\" s=\"{s}\"/>"))
                    }
                    CellValue::Text(t) => xml.push_str(&format!(
                        "<c r=\"{reference}\" s=\"{s}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                        xml_escape(t)
                    )),
                }
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData>");
    if !sheet.merges.is_empty() {
        xml.push_str(&format!("<mergeCells count=\"{}\">", sheet.merges.len()));
        for m in &sheet.merges {
            xml.push_str(&format!("<mergeCell ref=\"{}\"/>", xml_escape(m)));
        }
        xml.push_str("</mergeCells>");
    }
    xml.push_str("</worksheet>");
    xml
}

fn styles_xml() -> &'static str {
    concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
        "<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
        "<fonts count=\"2\">",
        "<font><sz val=\"11\"/><name val=\"Calibri\"/></font>",
        "<font><b/><sz val=\"12\"/><name val=\"Calibri\"/></font>",
        "</fonts>",
        "<fills count=\"5\">",
        "<fill><patternFill patternType=\"none\"/></fill>",
        "<fill><patternFill patternType=\"gray125\"/></fill>",
        "<fill><patternFill patternType=\"solid\"><fgColor rgb=\"FFFFFF00\"/></patternFill></fill>",
        "<fill><patternFill patternType=\"solid\"><fgColor rgb=\"FFE6E6FA\"/></patternFill></fill>",
        "<fill><patternFill patternType=\"solid\"><fgColor rgb=\"FF00FFFF\"/></patternFill></fill>",
        "</fills>",
        "<borders count=\"3\">",
        "<border><left/><right/><top/><bottom/><diagonal/></border>",
        "<border><left style=\"thin\"/><right style=\"thin\"/><top style=\"thin\"/><bottom style=\"thin\"/><diagonal/></border>",
        "<border><left style=\"thick\"/><right style=\"thick\"/><top style=\"thick\"/><bottom style=\"thick\"/><diagonal/></border>",
        "</borders>",
        "<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>",
        "<cellXfs count=\"5\">",
        "<xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>",
        "<xf numFmtId=\"0\" fontId=\"1\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyFont=\"1\" applyBorder=\"1\" applyAlignment=\"1\"><alignment horizontal=\"center\" vertical=\"center\"/></xf>",
        "<xf numFmtId=\"0\" fontId=\"1\" fillId=\"2\" borderId=\"1\" xfId=\"0\" applyFont=\"1\" applyFill=\"1\" applyBorder=\"1\" applyAlignment=\"1\"><alignment horizontal=\"center\" vertical=\"center\" wrapText=\"1\"/></xf>",
        "<xf numFmtId=\"0\" fontId=\"1\" fillId=\"3\" borderId=\"2\" xfId=\"0\" applyFont=\"1\" applyFill=\"1\" applyBorder=\"1\" applyAlignment=\"1\"><alignment vertical=\"center\"/></xf>",
        "<xf numFmtId=\"0\" fontId=\"1\" fillId=\"4\" borderId=\"2\" xfId=\"0\" applyFont=\"1\" applyFill=\"1\" applyBorder=\"1\" applyAlignment=\"1\"><alignment horizontal=\"center\" vertical=\"center\"/></xf>",
        "</cellXfs>",
        "<cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>",
        "</styleSheet>"
    )
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
        xml_escape(sheet_name)
    )
}

const CONTENT_TYPES: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">",
    "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>",
    "<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
    "<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>",
    "<Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
    "<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>",
    "</Types>"
);

const ROOT_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>",
    "</Relationships>"
);

const WORKBOOK_RELS: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
    "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet1.xml\"/>",
    "<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/>",
    "</Relationships>"
);

pub fn write_workbook(out_path: &Path, sheet: &Sheet) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, String); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml(&sheet.name)),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/styles.xml", styles_xml().to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(sheet)),
    ];
    for (name, body) in parts.iter() {
        zip.start_file(*name, opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write entry {}", name))?;
    }
    zip.finish().context("failed to finalize workbook")?;
    Ok(())
}
