//! CSV import of previously exported or hand-edited records.
//!
//! The delimiter is guessed from the header line (`,`, `;` or tab).
//! Headers are matched trimmed and case-insensitively against German and
//! JSON-style aliases, so both `Fragesteller` and `questioner` work.
//! Missing core columns produce a warning, not an error.
//!
//! Records are numbered `1..=n` in row order. The `#` column of an export
//! counts question/answer rows only, so it is not an id.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::models::ParsedEntry;

const REQUIRED_HEADERS: [&str; 5] = ["#", "Fragesteller", "Frage", "Zeuge", "Antwort"];
const DELIMITERS: [char; 3] = [',', ';', '\t'];

const SOURCE_REFERENCE: &[&str] = &["Fundstelle", "sourceReference"];
const QUESTIONER: &[&str] = &["Fragesteller", "questioner"];
const QUESTION: &[&str] = &["Frage", "question"];
const WITNESS: &[&str] = &["Zeuge", "witness"];
const ANSWER: &[&str] = &["Antwort", "answer"];
const NOTE: &[&str] = &["Anmerkung", "note"];
const KERNAUSSAGE: &[&str] = &["Kernaussage", "kernaussage"];
const KATEGORIEN: &[&str] = &["Zugeordnete Kategorie(n)", "zugeordneteKategorien"];
const BEGRUENDUNG: &[&str] = &["Begründung", "begruendung"];
const FRAKTION: &[&str] = &["Fraktion"];
const SEARCH_REASON: &[&str] = &["Relevanzgrund", "searchReason"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvImport {
    pub entries: Vec<ParsedEntry>,
    pub warnings: Vec<String>,
}

/// Pick the candidate delimiter occurring most often outside quotes in the
/// first line.
fn guess_delimiter(text: &str) -> char {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => quoted = !quoted,
            '\n' if !quoted => break,
            _ if !quoted => {
                if let Some(i) = DELIMITERS.iter().position(|d| *d == c) {
                    counts[i] += 1;
                }
            }
            _ => {}
        }
    }
    let (best, count) = counts
        .iter()
        .enumerate()
        .max_by_key(|(i, n)| (**n, std::cmp::Reverse(*i)))
        .map(|(i, n)| (i, *n))
        .unwrap_or((0, 0));
    if count == 0 {
        ','
    } else {
        DELIMITERS[best]
    }
}

/// Split `text` into rows of fields (RFC 4180 quoting, `\n` or `\r\n`).
fn read_rows(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            c if c == delimiter => row.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if quoted {
        bail!("CSV parsing failed: unterminated quoted field");
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    Ok(rows)
}

/// Parse CSV text into records.
pub fn parse_csv(text: &str) -> Result<CsvImport> {
    let text = text.trim_start_matches('\u{FEFF}');
    let mut rows = read_rows(text, guess_delimiter(text))?.into_iter();
    let headers: Vec<String> = match rows.next() {
        Some(h) => h.iter().map(|h| h.trim().to_lowercase()).collect(),
        None => Vec::new(),
    };
    let rows: Vec<Vec<String>> = rows.collect();
    if rows.is_empty() {
        bail!("Die CSV-Datei ist leer oder konnte nicht verarbeitet werden.");
    }

    let mut warnings = Vec::new();
    let missing: Vec<&str> = REQUIRED_HEADERS
        .iter()
        .copied()
        .filter(|req| !headers.contains(&req.to_lowercase()))
        .collect();
    if !missing.is_empty() {
        warnings.push(format!("Fehlende Spalten: {}.", missing.join(", ")));
    }

    let columns: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .rev()
        .map(|(i, h)| (h.as_str(), i))
        .collect();

    let entries = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let id = i as i64 + 1;
            let value = |aliases: &[&str]| -> Option<String> {
                aliases.iter().find_map(|alias| {
                    columns
                        .get(alias.to_lowercase().as_str())
                        .and_then(|&c| row.get(c))
                        .filter(|v| !v.trim().is_empty())
                        .cloned()
                })
            };
            let source_reference = value(SOURCE_REFERENCE).unwrap_or_default();
            if let Some(note) = value(NOTE) {
                return ParsedEntry::note(id, &source_reference, note);
            }
            ParsedEntry {
                kernaussage: value(KERNAUSSAGE),
                zugeordnete_kategorien: value(KATEGORIEN),
                begruendung: value(BEGRUENDUNG),
                fraktion: value(FRAKTION),
                search_reason: value(SEARCH_REASON),
                ..ParsedEntry::exchange(
                    id,
                    &source_reference,
                    value(QUESTIONER),
                    value(QUESTION),
                    value(WITNESS),
                    value(ANSWER),
                )
            }
        })
        .collect();

    Ok(CsvImport { entries, warnings })
}

pub fn import_csv(path: &Path) -> Result<CsvImport> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read CSV: {}", path.display()))?;
    parse_csv(&String::from_utf8_lossy(&bytes))
}
