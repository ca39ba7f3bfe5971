//! # XLSX Workbook Parsing
//!
//! A minimal OOXML reader for the tabular ingestion path: an `.xlsx` file is
//! a ZIP of XML parts, and we only need the shared-string table and each
//! worksheet's cell values. Rows and columns are preserved so that the first
//! row can serve as the header list and every later row maps cells back to
//! their headers by column index.

use super::{table::Table, IngestError};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use std::path::Path;

/// Maximum decompressed bytes to read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

type Archive = zip::ZipArchive<Cursor<Vec<u8>>>;

fn wb_err(e: impl std::fmt::Display) -> IngestError {
    IngestError::Workbook(e.to_string())
}

/// Reads every worksheet of a workbook into a `Table`, in sheet order.
pub(super) fn read_workbook(path: &Path) -> Result<Vec<Table>, IngestError> {
    let bytes = std::fs::read(path)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(wb_err)?;

    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_entries = ordered_worksheet_entries(&archive);

    let mut tables = Vec::new();
    for entry in sheet_entries {
        let xml = read_zip_entry(&mut archive, &entry)?;
        let name = entry
            .trim_start_matches("xl/worksheets/")
            .trim_end_matches(".xml")
            .to_string();
        if let Some(table) = parse_sheet(&xml, &shared_strings, name)? {
            tables.push(table);
        }
    }
    Ok(tables)
}

fn read_zip_entry(archive: &mut Archive, name: &str) -> Result<Vec<u8>, IngestError> {
    let entry = archive.by_name(name).map_err(wb_err)?;
    let mut buf = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

/// Worksheet part names in numeric sheet order (`sheet1.xml`, `sheet2.xml`, ...).
fn ordered_worksheet_entries(archive: &Archive) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Parses `xl/sharedStrings.xml`. A workbook without shared strings yields
/// an empty table. Rich-text runs inside one `<si>` are concatenated.
fn read_shared_strings(archive: &mut Archive) -> Result<Vec<String>, IngestError> {
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml")?;

    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                current.push_str(t.unescape().map_err(wb_err)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(wb_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// The kind of value a `<c>` element holds, from its `t` attribute.
#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    SharedString,
    InlineString,
    Raw,
}

/// Parses one worksheet into a `Table`. Returns `None` for a sheet with no
/// rows at all (no headers means nothing to ingest).
fn parse_sheet(
    xml: &[u8],
    shared_strings: &[String],
    name: String,
) -> Result<Option<Table>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    // Sparse rows first: (column index, text) pairs per row.
    let mut rows: Vec<Vec<(usize, String)>> = Vec::new();
    let mut current_row: Vec<(usize, String)> = Vec::new();
    let mut in_row = false;

    let mut cell_col = 0usize;
    let mut cell_kind = CellKind::Raw;
    let mut in_v = false;
    let mut in_inline_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    current_row.clear();
                }
                b"c" if in_row => {
                    // Without an `r` reference, the cell follows its
                    // predecessor.
                    let mut col = current_row.last().map(|(c, _)| c + 1).unwrap_or(0);
                    cell_kind = CellKind::Raw;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                if let Some(c) =
                                    column_index(String::from_utf8_lossy(&attr.value).as_ref())
                                {
                                    col = c;
                                }
                            }
                            b"t" => {
                                cell_kind = match attr.value.as_ref() {
                                    b"s" => CellKind::SharedString,
                                    b"inlineStr" => CellKind::InlineString,
                                    _ => CellKind::Raw,
                                };
                            }
                            _ => {}
                        }
                    }
                    cell_col = col;
                }
                b"v" => in_v = true,
                b"t" if cell_kind == CellKind::InlineString => in_inline_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_v || in_inline_t => {
                let text = t.unescape().map_err(wb_err)?.into_owned();
                let value = if in_v && cell_kind == CellKind::SharedString {
                    text.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    text
                };
                if !value.is_empty() {
                    current_row.push((cell_col, value));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"row" => {
                    in_row = false;
                    rows.push(std::mem::take(&mut current_row));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(wb_err(e)),
            _ => {}
        }
        buf.clear();
    }

    if rows.is_empty() {
        return Ok(None);
    }

    let width = rows
        .iter()
        .flat_map(|r| r.iter().map(|(c, _)| c + 1))
        .max()
        .unwrap_or(0);
    if width == 0 {
        return Ok(None);
    }

    let mut headers = vec![String::new(); width];
    for (col, value) in &rows[0] {
        headers[*col] = value.clone();
    }

    let data_rows: Vec<Vec<Option<String>>> = rows[1..]
        .iter()
        .map(|sparse| {
            let mut dense: Vec<Option<String>> = vec![None; width];
            for (col, value) in sparse {
                if !value.trim().is_empty() {
                    dense[*col] = Some(value.clone());
                }
            }
            dense
        })
        .collect();

    Ok(Some(Table {
        name,
        headers,
        rows: data_rows,
    }))
}

/// Converts the column letters of an `A1`-style reference to a 0-based index.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_index_handles_multi_letter_refs() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z10"), Some(25));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("BC12"), Some(54));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn sheet_rows_align_cells_to_headers() {
        let xml = br#"<?xml version="1.0"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheetData>
    <row r="1">
      <c r="A1" t="inlineStr"><is><t>Name</t></is></c>
      <c r="B1" t="inlineStr"><is><t>Value</t></is></c>
    </row>
    <row r="2">
      <c r="B2"><v>42</v></c>
    </row>
  </sheetData>
</worksheet>"#;
        let table = parse_sheet(xml, &[], "sheet1".to_string())
            .unwrap()
            .unwrap();
        assert_eq!(table.headers, vec!["Name", "Value"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0], vec![None, Some("42".to_string())]);
    }

    #[test]
    fn shared_string_cells_resolve_through_the_table() {
        let shared = vec!["Culvert".to_string(), "Good".to_string()];
        let xml = br#"<worksheet><sheetData>
    <row r="1"><c r="A1" t="s"><v>0</v></c></row>
    <row r="2"><c r="A2" t="s"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let table = parse_sheet(xml, &shared, "sheet1".to_string())
            .unwrap()
            .unwrap();
        assert_eq!(table.headers, vec!["Culvert"]);
        assert_eq!(table.rows[0], vec![Some("Good".to_string())]);
    }
}
