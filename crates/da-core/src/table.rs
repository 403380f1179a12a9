//! Core table types for representing 2DA data

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A parsed table from a single CSV file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Column definitions, in header order
    pub columns: Vec<Column>,
    /// Row data, in file order
    pub rows: Vec<Row>,
    /// Source file path
    pub source_path: PathBuf,
}

impl Table {
    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Find a row by ID
    pub fn find_row(&self, id: i64) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }
}

/// A header field and its position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name (e.g., "ID" or "0xC4FDA9ED")
    pub name: String,
    /// Column index (0-based)
    pub index: usize,
}

impl Column {
    /// Create a new column
    pub fn new(name: String, index: usize) -> Self {
        Self { name, index }
    }
}

/// One data line of a CSV file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    /// Row ID, taken from the identity (first) column
    pub id: i64,
    /// Cell values for each column
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a new row
    pub fn new(id: i64, cells: Vec<CellValue>) -> Self {
        Self { id, cells }
    }
}

/// A cell value with type detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Empty/null cell
    Empty,
}

impl CellValue {
    /// Classify raw cell text.
    ///
    /// Whitespace-only text is `Empty`, text matching the integer grammar is
    /// `Integer`, text matching the decimal/exponent grammar is `Float` and
    /// everything else is kept as a `String`.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();

        if trimmed.is_empty() {
            return CellValue::Empty;
        }

        if is_integer_literal(trimmed) {
            if let Ok(i) = trimmed.parse::<i64>() {
                return CellValue::Integer(i);
            }
        }

        // Rust's float parser also accepts "inf" and "NaN", which we treat as text
        if is_float_literal(trimmed) {
            if let Ok(f) = trimmed.parse::<f64>() {
                return CellValue::Float(f);
            }
        }

        CellValue::String(trimmed.to_string())
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Name of the variant, for display and diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Integer(_) => "integer",
            CellValue::Float(_) => "float",
            CellValue::String(_) => "string",
            CellValue::Empty => "empty",
        }
    }

    /// Convert to a display string
    pub fn to_string_value(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(fl) => write!(f, "{}", fl),
            CellValue::String(s) => write!(f, "{}", s),
            CellValue::Empty => Ok(()),
        }
    }
}

fn strip_sign(s: &str) -> &str {
    s.strip_prefix(['+', '-']).unwrap_or(s)
}

fn is_integer_literal(s: &str) -> bool {
    let digits = strip_sign(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_float_literal(s: &str) -> bool {
    let body = strip_sign(s);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return false;
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return false;
    }

    match exponent {
        Some(exp) => is_integer_literal(exp),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cell_value_parse_integer() {
        assert_eq!(CellValue::parse("42"), CellValue::Integer(42));
        assert_eq!(CellValue::parse("-123"), CellValue::Integer(-123));
        assert_eq!(CellValue::parse("+7"), CellValue::Integer(7));
        assert_eq!(CellValue::parse("0"), CellValue::Integer(0));
        assert_eq!(CellValue::parse(" 12 "), CellValue::Integer(12));
    }

    #[test]
    fn test_cell_value_parse_float() {
        assert_eq!(CellValue::parse("3.14"), CellValue::Float(3.14));
        assert_eq!(CellValue::parse("-2.5"), CellValue::Float(-2.5));
        assert_eq!(CellValue::parse(".5"), CellValue::Float(0.5));
        assert_eq!(CellValue::parse("1e3"), CellValue::Float(1000.0));
        assert_eq!(CellValue::parse("-2.5E-1"), CellValue::Float(-0.25));
    }

    #[test]
    fn test_cell_value_out_of_range_integer_is_float() {
        assert_eq!(
            CellValue::parse("99999999999999999999"),
            CellValue::Float(99999999999999999999.0)
        );
    }

    #[test]
    fn test_cell_value_parse_string() {
        assert_eq!(
            CellValue::parse("hello"),
            CellValue::String("hello".to_string())
        );
        assert_eq!(
            CellValue::parse("0xABCD"),
            CellValue::String("0xABCD".to_string())
        );
        assert_eq!(CellValue::parse("inf"), CellValue::String("inf".to_string()));
        assert_eq!(CellValue::parse("NaN"), CellValue::String("NaN".to_string()));
        assert_eq!(CellValue::parse("1e"), CellValue::String("1e".to_string()));
        assert_eq!(CellValue::parse("."), CellValue::String(".".to_string()));
        assert_eq!(CellValue::parse("-"), CellValue::String("-".to_string()));
    }

    #[test]
    fn test_cell_value_parse_empty() {
        assert_eq!(CellValue::parse(""), CellValue::Empty);
        assert_eq!(CellValue::parse("   "), CellValue::Empty);
    }

    #[test]
    fn test_cell_value_is_empty() {
        assert!(CellValue::Empty.is_empty());
        assert!(!CellValue::Integer(0).is_empty());
        assert!(!CellValue::String("".to_string()).is_empty());
    }

    proptest! {
        #[test]
        fn integers_classify_as_integer(n in any::<i64>()) {
            prop_assert_eq!(CellValue::parse(&n.to_string()), CellValue::Integer(n));
        }

        #[test]
        fn classification_is_stable(s in ".*") {
            prop_assert_eq!(CellValue::parse(&s), CellValue::parse(&s));
        }

        #[test]
        fn alphabetic_text_is_string(s in "[a-zA-Z_][a-zA-Z0-9_]*") {
            let value = CellValue::parse(&s);
            prop_assert!(matches!(value, CellValue::String(_)));
        }
    }
}
