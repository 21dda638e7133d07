//! Record export: CSV, XLSX and Markdown.
//!
//! Both tabular formats share one column layout. The seven base columns
//! are always present; the three analysis columns appear when any record
//! carries analysis, and `Relevanzgrund` when any carries a search reason.
//! Question/answer rows are numbered with a running counter that skips
//! notes, so `#` differs from the record id once notes are present.
//!
//! The XLSX writer emits a minimal SpreadsheetML package (one sheet,
//! inline strings) with `zip` and `quick-xml`. Notes span the whole row as
//! a merged `Anmerkung: …` cell.

use std::fmt;
use std::io::{Cursor, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use regex::Regex;
use zip::write::SimpleFileOptions;

use crate::models::{KeyInsights, ParsedEntry};

const BASE_HEADERS: [&str; 7] = [
    "#",
    "Fundstelle",
    "Fragesteller",
    "Frage",
    "Zeuge",
    "Antwort",
    "Anmerkung",
];
const ANALYSIS_HEADERS: [&str; 3] = ["Kernaussage", "Zugeordnete Kategorie(n)", "Begründung"];
const SEARCH_HEADER: &str = "Relevanzgrund";
const NOTE_COLUMN: usize = 6;
const SHEET_NAME: &str = "Protocol Timeline";

/// Which optional column groups an export carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    analysis: bool,
    search: bool,
}

impl Layout {
    fn for_entries(entries: &[ParsedEntry]) -> Self {
        Self {
            analysis: entries.iter().any(|e| e.has_analysis()),
            search: entries.iter().any(|e| e.search_reason.is_some()),
        }
    }

    fn headers(&self) -> Vec<&'static str> {
        let mut headers = BASE_HEADERS.to_vec();
        if self.analysis {
            headers.extend(ANALYSIS_HEADERS);
        }
        if self.search {
            headers.push(SEARCH_HEADER);
        }
        headers
    }
}

enum Cell {
    Number(i64),
    Text(String),
    Empty,
}

impl Cell {
    fn text(value: &Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Cell::Text(v.clone()),
            _ => Cell::Empty,
        }
    }

    fn as_csv(&self) -> String {
        match self {
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }
}

enum Row {
    Note(String),
    Record(Vec<Cell>),
}

fn rows(entries: &[ParsedEntry], layout: Layout) -> Vec<Row> {
    let mut counter = 0;
    entries
        .iter()
        .map(|entry| {
            if let Some(note) = entry.note.as_deref().filter(|n| !n.is_empty()) {
                return Row::Note(note.to_string());
            }
            counter += 1;
            let mut cells = vec![
                Cell::Number(counter),
                Cell::Text(entry.source_reference.clone()),
                Cell::text(&entry.questioner),
                Cell::text(&entry.question),
                Cell::text(&entry.witness),
                Cell::text(&entry.answer),
                Cell::Empty,
            ];
            if layout.analysis {
                cells.push(Cell::text(&entry.kernaussage));
                cells.push(Cell::text(&entry.zugeordnete_kategorien));
                cells.push(Cell::text(&entry.begruendung));
            }
            if layout.search {
                cells.push(Cell::text(&entry.search_reason));
            }
            Row::Record(cells)
        })
        .collect()
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render records as BOM-prefixed, comma-separated text.
pub fn to_csv(entries: &[ParsedEntry]) -> String {
    let layout = Layout::for_entries(entries);
    let headers = layout.headers();
    let mut lines = vec![headers.join(",")];
    for row in rows(entries, layout) {
        let fields: Vec<String> = match row {
            Row::Note(note) => (0..headers.len())
                .map(|i| if i == NOTE_COLUMN { escape_csv(&note) } else { String::new() })
                .collect(),
            Row::Record(cells) => cells.iter().map(|c| escape_csv(&c.as_csv())).collect(),
        };
        lines.push(fields.join(","));
    }
    format!("\u{FEFF}{}", lines.join("\n"))
}

/// Spreadsheet column name for a 0-based index (0 → A, 26 → AA).
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

const HEADER_STYLE: &str = "1";
const NOTE_STYLE: &str = "2";
const BOLD_STYLE: &str = "3";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn text_cell(w: &mut XmlWriter, reference: &str, text: &str, style: Option<&str>) -> Result<()> {
    let mut cell = BytesStart::new("c");
    cell.push_attribute(("r", reference));
    cell.push_attribute(("t", "inlineStr"));
    if let Some(style) = style {
        cell.push_attribute(("s", style));
    }
    w.write_event(Event::Start(cell))?;
    w.write_event(Event::Start(BytesStart::new("is")))?;
    let mut t = BytesStart::new("t");
    t.push_attribute(("xml:space", "preserve"));
    w.write_event(Event::Start(t))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new("t")))?;
    w.write_event(Event::End(BytesEnd::new("is")))?;
    w.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

fn number_cell(w: &mut XmlWriter, reference: &str, value: i64) -> Result<()> {
    let mut cell = BytesStart::new("c");
    cell.push_attribute(("r", reference));
    w.write_event(Event::Start(cell))?;
    w.write_event(Event::Start(BytesStart::new("v")))?;
    w.write_event(Event::Text(BytesText::new(&value.to_string())))?;
    w.write_event(Event::End(BytesEnd::new("v")))?;
    w.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

fn column_width(header: &str) -> u32 {
    match header {
        "#" => 5,
        "Fundstelle" => 15,
        "Fragesteller" | "Zeuge" => 25,
        "Frage" | "Antwort" | "Kernaussage" | "Begründung" => 60,
        "Anmerkung" => 20,
        "Zugeordnete Kategorie(n)" => 30,
        _ => 40,
    }
}

fn sheet_xml(entries: &[ParsedEntry]) -> Result<Vec<u8>> {
    let layout = Layout::for_entries(entries);
    let headers = layout.headers();
    let last_column = column_name(headers.len() - 1);

    let mut w = Writer::new(Cursor::new(Vec::new()));
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    let mut root = BytesStart::new("worksheet");
    root.push_attribute((
        "xmlns",
        "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
    ));
    w.write_event(Event::Start(root))?;

    w.write_event(Event::Start(BytesStart::new("cols")))?;
    for (i, header) in headers.iter().enumerate() {
        let index = (i + 1).to_string();
        let width = column_width(header).to_string();
        let mut col = BytesStart::new("col");
        col.push_attribute(("min", index.as_str()));
        col.push_attribute(("max", index.as_str()));
        col.push_attribute(("width", width.as_str()));
        col.push_attribute(("customWidth", "1"));
        w.write_event(Event::Empty(col))?;
    }
    w.write_event(Event::End(BytesEnd::new("cols")))?;

    w.write_event(Event::Start(BytesStart::new("sheetData")))?;
    let mut merges = Vec::new();
    let all_rows = std::iter::once(None).chain(rows(entries, layout).into_iter().map(Some));
    for (r, row) in all_rows.enumerate() {
        let row_number = (r + 1).to_string();
        let mut row_start = BytesStart::new("row");
        row_start.push_attribute(("r", row_number.as_str()));
        w.write_event(Event::Start(row_start))?;
        match row {
            None => {
                for (c, header) in headers.iter().enumerate() {
                    let reference = format!("{}{}", column_name(c), row_number);
                    text_cell(&mut w, &reference, header, Some(HEADER_STYLE))?;
                }
            }
            Some(Row::Note(note)) => {
                let reference = format!("A{}", row_number);
                text_cell(
                    &mut w,
                    &reference,
                    &format!("Anmerkung: {}", note),
                    Some(NOTE_STYLE),
                )?;
                merges.push(format!("A{0}:{1}{0}", row_number, last_column));
            }
            Some(Row::Record(cells)) => {
                for (c, cell) in cells.iter().enumerate() {
                    let reference = format!("{}{}", column_name(c), row_number);
                    let style = matches!(headers[c], "Fragesteller" | "Zeuge").then_some(BOLD_STYLE);
                    match cell {
                        Cell::Number(n) => number_cell(&mut w, &reference, *n)?,
                        Cell::Text(s) => text_cell(&mut w, &reference, s, style)?,
                        Cell::Empty => {}
                    }
                }
            }
        }
        w.write_event(Event::End(BytesEnd::new("row")))?;
    }
    w.write_event(Event::End(BytesEnd::new("sheetData")))?;

    if !merges.is_empty() {
        let count = merges.len().to_string();
        let mut merge_cells = BytesStart::new("mergeCells");
        merge_cells.push_attribute(("count", count.as_str()));
        w.write_event(Event::Start(merge_cells))?;
        for range in &merges {
            let mut merge = BytesStart::new("mergeCell");
            merge.push_attribute(("ref", range.as_str()));
            w.write_event(Event::Empty(merge))?;
        }
        w.write_event(Event::End(BytesEnd::new("mergeCells")))?;
    }

    w.write_event(Event::End(BytesEnd::new("worksheet")))?;
    Ok(w.into_inner().into_inner())
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

// Fonts: regular, bold, italic. Cell formats: default, header, note, bold.
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="3"><font><sz val="11"/><name val="Inter"/></font><font><b/><sz val="11"/><name val="Inter"/></font><font><i/><sz val="11"/><name val="Inter"/></font></fonts><fills count="3"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill><fill><patternFill patternType="solid"><fgColor rgb="FFECE0DF"/></patternFill></fill></fills><borders count="1"><border/></borders><cellStyleXfs count="1"><xf/></cellStyleXfs><cellXfs count="4"><xf applyAlignment="1"><alignment vertical="top" wrapText="1"/></xf><xf fontId="1" fillId="2" applyFont="1" applyFill="1" applyAlignment="1"><alignment vertical="top" wrapText="1"/></xf><xf fontId="2" applyFont="1" applyAlignment="1"><alignment horizontal="left" vertical="top"/></xf><xf fontId="1" applyFont="1" applyAlignment="1"><alignment vertical="top" wrapText="1"/></xf></cellXfs></styleSheet>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        SHEET_NAME
    )
}

/// Render records as an `.xlsx` workbook.
pub fn to_xlsx(entries: &[ParsedEntry]) -> Result<Vec<u8>> {
    let sheet = sheet_xml(entries)?;
    let workbook = workbook_xml();
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let parts: [(&str, &[u8]); 6] = [
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
        ("xl/styles.xml", STYLES.as_bytes()),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, bytes) in parts {
        zip.start_file(name, options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn render(self, entries: &[ParsedEntry]) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Csv => Ok(to_csv(entries).into_bytes()),
            ExportFormat::Xlsx => to_xlsx(entries),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(format!("unknown export format '{}': use csv or xlsx", other)),
        }
    }
}

/// Pipeline step named in export filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStep {
    Parsed,
    Analyzed,
    Insights,
    Filtered,
    Search,
}

impl fmt::Display for ExportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportStep::Parsed => "parsed",
            ExportStep::Analyzed => "analyzed",
            ExportStep::Insights => "insights",
            ExportStep::Filtered => "filtered",
            ExportStep::Search => "search",
        })
    }
}

static PROTOCOL_IN_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)WP(\d+)").expect("valid protocol pattern"));

/// Protocol number of a dataset, read from its first record's source
/// reference; `"XX"` when there is none.
pub fn protocol_number(entries: &[ParsedEntry]) -> String {
    entries
        .first()
        .and_then(|e| PROTOCOL_IN_REFERENCE.captures(&e.source_reference))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "XX".to_string())
}

/// `wp<protocol>-<step>-YYYY-MM-DD-HH-MM-SS`, with everything but ASCII
/// letters and digits removed from the protocol label.
pub fn export_filename(protocol: &str, step: ExportStep, now: DateTime<Local>) -> String {
    let sanitized: String = protocol.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!(
        "wp{}-{}-{}",
        sanitized,
        step,
        now.format("%Y-%m-%d-%H-%M-%S")
    )
}

/// Render and write `entries` to `path`.
pub fn write_export(entries: &[ParsedEntry], format: ExportFormat, path: &Path) -> Result<()> {
    let bytes = format.render(entries)?;
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write export: {}", path.display()))?;
    Ok(())
}

pub fn write_insights_markdown(insights: &KeyInsights, path: &Path) -> Result<()> {
    std::fs::write(path, insights.to_markdown())
        .with_context(|| format!("Failed to write insights: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn sample() -> Vec<ParsedEntry> {
        vec![
            ParsedEntry::exchange(
                1,
                "WP20/1",
                Some("Abg. X".into()),
                Some("Wie, bitte?".into()),
                Some("Y".into()),
                Some("Er sagte \"nein\".".into()),
            ),
            ParsedEntry::note(2, "WP20/1", "Vors.: Unterbrechung".into()),
            ParsedEntry::exchange(3, "WP20/2", None, None, Some("Y".into()), Some("Ja".into())),
        ]
    }

    #[test]
    fn csv_numbers_exchanges_and_places_notes() {
        let csv = to_csv(&sample());
        assert!(csv.starts_with('\u{FEFF}'));
        let lines: Vec<&str> = csv.trim_start_matches('\u{FEFF}').lines().collect();
        assert_eq!(
            lines,
            vec![
                "#,Fundstelle,Fragesteller,Frage,Zeuge,Antwort,Anmerkung",
                "1,WP20/1,Abg. X,\"Wie, bitte?\",Y,\"Er sagte \"\"nein\"\".\",",
                ",,,,,,Vors.: Unterbrechung",
                "2,WP20/2,,,Y,Ja,",
            ]
        );
    }

    #[test]
    fn csv_adds_optional_columns() {
        let mut entries = sample();
        entries[0].kernaussage = Some("K".into());
        entries[2].search_reason = Some("passt".into());
        let csv = to_csv(&entries);
        let lines: Vec<&str> = csv.trim_start_matches('\u{FEFF}').lines().collect();
        assert_eq!(
            lines[0],
            "#,Fundstelle,Fragesteller,Frage,Zeuge,Antwort,Anmerkung,Kernaussage,Zugeordnete Kategorie(n),Begründung,Relevanzgrund"
        );
        assert_eq!(lines[2], ",,,,,,Vors.: Unterbrechung,,,,");
        assert_eq!(lines[3], "2,WP20/2,,,Y,Ja,,,,,passt");
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(10), "K");
        assert_eq!(column_name(26), "AA");
    }

    #[test]
    fn xlsx_contains_sheet_and_merged_note() {
        let bytes = to_xlsx(&sample()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut workbook = String::new();
        archive
            .by_name("xl/workbook.xml")
            .unwrap()
            .read_to_string(&mut workbook)
            .unwrap();
        assert!(workbook.contains("name=\"Protocol Timeline\""));

        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        assert!(sheet.contains("Anmerkung: Vors.: Unterbrechung"));
        assert!(sheet.contains("<mergeCell ref=\"A3:G3\"/>"));
        assert!(sheet.contains("<c r=\"A4\"><v>2</v></c>"));
        assert!(sheet.contains("Er sagte &quot;nein&quot;."));
    }

    #[test]
    fn filenames_are_sanitized_and_timestamped() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 9, 7, 1).unwrap();
        assert_eq!(
            export_filename("20 / a", ExportStep::Parsed, now),
            "wp20a-parsed-2024-03-05-09-07-01"
        );
    }

    #[test]
    fn protocol_number_from_first_record() {
        assert_eq!(protocol_number(&sample()), "20");
        assert_eq!(protocol_number(&[]), "XX");
    }

    #[test]
    fn export_format_parses() {
        assert_eq!("XLSX".parse::<ExportFormat>(), Ok(ExportFormat::Xlsx));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
