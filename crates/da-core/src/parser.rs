//! CSV parser for 2DA table files
//!
//! The first record is the header; every following record is a data row that
//! must have exactly as many fields as the header. The first column is the
//! identity column and has to hold an integer row id.

use crate::error::{Error, ParseError, Result};
use crate::table::{CellValue, Column, Row, Table};
use log::warn;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const UTF8_BOM: &str = "\u{feff}";

/// Parse a CSV file into a Table
pub fn parse_csv<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_bytes(&bytes, path)
}

/// Parse CSV from a string (useful for testing)
pub fn parse_csv_str(content: &str, source_name: &str) -> Result<Table> {
    parse_bytes(content.as_bytes(), Path::new(source_name))
}

/// Parse raw file bytes into a Table, attributing errors to `source`
pub fn parse_bytes(bytes: &[u8], source: &Path) -> Result<Table> {
    let (text, _) = decode_text(bytes, source);
    let (columns, rows) = parse_text(strip_bom(&text)).map_err(|e| Error::Parse {
        path: source.to_path_buf(),
        source: e,
    })?;

    Ok(Table {
        columns,
        rows,
        source_path: source.to_path_buf(),
    })
}

/// Text encoding a file was read with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextEncoding {
    Utf8,
    Windows1252,
}

/// Decode file bytes as UTF-8, falling back to Windows-1252
pub(crate) fn decode_text<'a>(bytes: &'a [u8], source: &Path) -> (Cow<'a, str>, TextEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (Cow::Borrowed(s), TextEncoding::Utf8),
        Err(_) => {
            warn!(
                "{} is not valid UTF-8, decoding as Windows-1252",
                source.display()
            );
            // Every byte maps to a char, so the text encodes back unchanged
            let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
            (decoded, TextEncoding::Windows1252)
        }
    }
}

pub(crate) fn strip_bom(text: &str) -> &str {
    text.strip_prefix(UTF8_BOM).unwrap_or(text)
}

/// Build a CSV reader with the settings shared by parsing and patch export
pub(crate) fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        // Field counts are checked by hand so mismatches get a typed error
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn parse_text(text: &str) -> std::result::Result<(Vec<Column>, Vec<Row>), ParseError> {
    let mut reader = csv_reader(text);
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record?,
        None => return Err(ParseError::NoColumns),
    };

    let columns: Vec<Column> = header
        .iter()
        .enumerate()
        .map(|(i, name)| Column::new(name.trim().to_string(), i))
        .collect();

    if columns.is_empty() || columns.iter().all(|c| c.name.is_empty()) {
        return Err(ParseError::NoColumns);
    }

    let mut rows = Vec::new();
    let mut seen_ids = HashSet::new();

    for (row_idx, result) in records.enumerate() {
        let record = result?;
        let row_number = row_idx + 1;

        if record.len() != columns.len() {
            return Err(ParseError::ColumnCountMismatch {
                row: row_number,
                expected: columns.len(),
                actual: record.len(),
            });
        }

        let cells: Vec<CellValue> = record.iter().map(CellValue::parse).collect();

        let id = match cells.first() {
            Some(CellValue::Integer(id)) => *id,
            _ => {
                return Err(ParseError::InvalidRowId {
                    row: row_number,
                    value: record.get(0).unwrap_or_default().to_string(),
                })
            }
        };

        if !seen_ids.insert(id) {
            return Err(ParseError::DuplicateRowId {
                row: row_number,
                id,
            });
        }

        rows.push(Row::new(id, cells));
    }

    Ok((columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse_err(csv: &str) -> ParseError {
        match parse_csv_str(csv, "test.csv") {
            Err(Error::Parse { source, .. }) => source,
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_csv() {
        let csv = "ID,Name,Value\n1,foo,100\n2,bar,200\n";
        let table = parse_csv_str(csv, "test.csv").unwrap();

        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.columns[0].name, "ID");
        assert_eq!(table.columns[1].name, "Name");
        assert_eq!(table.columns[2].name, "Value");

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].id, 1);
        assert_eq!(table.rows[1].id, 2);
        assert_eq!(table.source_path, PathBuf::from("test.csv"));
    }

    #[test]
    fn test_parse_with_empty_cells() {
        let csv = "ID,Name,Value\n1,,100\n2,bar,\n";
        let table = parse_csv_str(csv, "test.csv").unwrap();

        assert_eq!(table.rows[0].cells[1], CellValue::Empty);
        assert_eq!(table.rows[1].cells[2], CellValue::Empty);
    }

    #[test]
    fn test_parse_hex_column_names() {
        let csv = "ID,0xABCD,0x1234\n1,10,20\n";
        let table = parse_csv_str(csv, "test.csv").unwrap();

        assert_eq!(table.columns[1].name, "0xABCD");
        assert_eq!(table.find_column("0x1234").map(|c| c.index), Some(2));
        assert!(table.find_column("0xabcd").is_none());
        assert_eq!(
            table.find_row(1).map(|r| r.cells[2].clone()),
            Some(CellValue::Integer(20))
        );
    }

    #[test]
    fn test_parse_with_floats() {
        let csv = "ID,Value\n1,3.14\n2,-2.5\n";
        let table = parse_csv_str(csv, "test.csv").unwrap();

        assert_eq!(table.rows[0].cells[1], CellValue::Float(3.14));
        assert_eq!(table.rows[1].cells[1], CellValue::Float(-2.5));
    }

    #[test]
    fn test_parse_quoted_fields() {
        let csv = "ID,Label\n1,\"a, b\"\n2,\"say \"\"hi\"\"\"\n3,\"two\nlines\"\n";
        let table = parse_csv_str(csv, "test.csv").unwrap();

        assert_eq!(table.rows[0].cells[1], CellValue::String("a, b".into()));
        assert_eq!(
            table.rows[1].cells[1],
            CellValue::String("say \"hi\"".into())
        );
        assert_eq!(
            table.rows[2].cells[1],
            CellValue::String("two\nlines".into())
        );
    }

    #[test]
    fn test_parse_strips_bom_and_crlf() {
        let csv = "\u{feff}ID,Name\r\n1,foo\r\n";
        let table = parse_csv_str(csv, "test.csv").unwrap();

        assert_eq!(table.columns[0].name, "ID");
        assert_eq!(table.rows[0].cells[1], CellValue::String("foo".into()));
    }

    #[test]
    fn test_parse_windows_1252_fallback() {
        // "caf\xe9" is "café" in Windows-1252 and invalid UTF-8
        let bytes = b"ID,Name\n1,caf\xe9\n";
        let table = parse_bytes(bytes, Path::new("latin.csv")).unwrap();

        assert_eq!(table.rows[0].cells[1], CellValue::String("café".into()));
    }

    #[test]
    fn test_parse_column_count_mismatch() {
        match parse_err("ID,Name,Value\n1,foo,100\n2,bar\n") {
            ParseError::ColumnCountMismatch {
                row,
                expected,
                actual,
            } => {
                assert_eq!(row, 2);
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_parse_non_integer_id() {
        match parse_err("Name,Value\nfoo,100\n") {
            ParseError::InvalidRowId { row, value } => {
                assert_eq!(row, 1);
                assert_eq!(value, "foo");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_id() {
        assert!(matches!(
            parse_err("ID,Value\n,100\n"),
            ParseError::InvalidRowId { row: 1, .. }
        ));
    }

    #[test]
    fn test_parse_duplicate_id() {
        assert!(matches!(
            parse_err("ID,Value\n1,a\n1,b\n"),
            ParseError::DuplicateRowId { row: 2, id: 1 }
        ));
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(matches!(parse_err(""), ParseError::NoColumns));
    }

    #[test]
    fn test_parse_header_only() {
        let table = parse_csv_str("ID,Name\n", "test.csv").unwrap();
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_parse_missing_file() {
        let err = parse_csv("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
