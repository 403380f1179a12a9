//! Merge engine for combining family tables with provenance tracking
//!
//! The base file seeds the table. Variants are then folded in alphabetically
//! by suffix: unseen columns are appended, unseen rows are appended, and for
//! rows that already exist a non-empty variant cell overrides the current
//! value while an empty one leaves it alone. Every cell remembers the file
//! that supplied its current value.

use crate::error::{Error, Result};
use crate::parser::parse_csv;
use crate::scanner::{Family, ScanResult};
use crate::table::{CellValue, Table};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A merged table with provenance information for each cell
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTable {
    /// Family name
    pub family_name: String,
    /// Column definitions (union of all source columns)
    pub columns: Vec<ResolvedColumn>,
    /// Rows with provenance, in first-appearance order
    pub rows: Vec<ResolvedRow>,
    /// Files that contributed to this table, in merge order
    pub sources: Vec<PathBuf>,
    #[serde(skip)]
    row_index: HashMap<i64, usize>,
}

impl ResolvedTable {
    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&ResolvedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Find a row by ID
    pub fn find_row(&self, id: i64) -> Option<&ResolvedRow> {
        self.row_position(id).map(|idx| &self.rows[idx])
    }

    /// Position of a row id in [`ResolvedTable::rows`]
    pub fn row_position(&self, id: i64) -> Option<usize> {
        self.row_index.get(&id).copied()
    }

    /// Row id at a row position
    pub fn row_id(&self, row_idx: usize) -> Option<i64> {
        self.rows.get(row_idx).map(|r| r.id)
    }

    /// Value and provenance at a row/column position
    pub fn cell(&self, row_idx: usize, col_idx: usize) -> Option<&ResolvedCell> {
        self.rows.get(row_idx).and_then(|r| r.cells.get(col_idx))
    }

    /// Value and provenance addressed by row id and column name
    pub fn cell_by_id(&self, id: i64, column: &str) -> Result<&ResolvedCell> {
        let col = self
            .find_column(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;
        let row = self.find_row(id).ok_or(Error::UnknownRow(id))?;
        Ok(&row.cells[col.index])
    }

    /// Row positions whose `column` value contains `pattern`, ignoring case
    pub fn filter_rows(&self, column: &str, pattern: &str) -> Result<Vec<usize>> {
        let col = self
            .find_column(column)
            .ok_or_else(|| Error::UnknownColumn(column.to_string()))?;
        let pattern = pattern.to_lowercase();

        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.cells[col.index]
                    .value
                    .to_string_value()
                    .to_lowercase()
                    .contains(&pattern)
            })
            .map(|(idx, _)| idx)
            .collect())
    }

    /// Write the merged view (values only) as CSV
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);
        let to_io = |e: csv::Error| Error::Io(e.into());

        csv_writer
            .write_record(self.columns.iter().map(|c| c.name.as_str()))
            .map_err(to_io)?;
        for row in &self.rows {
            csv_writer
                .write_record(row.cells.iter().map(|c| c.value.to_string_value()))
                .map_err(to_io)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

/// A column of the resolved table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedColumn {
    /// Column name
    pub name: String,
    /// Position in the resolved table
    pub index: usize,
    /// File that first contributed this column
    pub introduced_by: PathBuf,
}

/// A row in the resolved table
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedRow {
    /// Row ID
    pub id: i64,
    /// File that first contributed this row
    pub introduced_by: PathBuf,
    /// Cells with provenance
    pub cells: Vec<ResolvedCell>,
}

/// A cell with its value and source file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCell {
    /// The cell value
    pub value: CellValue,
    /// The file that provided this value
    pub source: PathBuf,
}

impl ResolvedCell {
    fn new(value: CellValue, source: PathBuf) -> Self {
        Self { value, source }
    }
}

/// Merge the named family of a scan
pub fn merge(scan: &ScanResult, family_name: &str) -> Result<ResolvedTable> {
    merge_family(scan.family(family_name)?)
}

/// Merge a family of tables into a single resolved table
pub fn merge_family(family: &Family) -> Result<ResolvedTable> {
    let base = family
        .base_file()
        .ok_or_else(|| Error::MissingBase(family.name.clone()))?;

    let mut tables = vec![parse_csv(&base.path)?];
    for variant in family.variants() {
        tables.push(parse_csv(&variant.path)?);
    }

    merge_tables(&family.name, tables)
}

/// Merge already-parsed tables: the first is the base, the rest are folded
/// in the order given
pub fn merge_tables(family_name: &str, tables: Vec<Table>) -> Result<ResolvedTable> {
    let mut tables = tables.into_iter();
    let base = tables
        .next()
        .ok_or_else(|| Error::MissingBase(family_name.to_string()))?;

    let mut merged = Merge::seed(family_name, base);
    for variant in tables {
        merged.fold(variant);
    }

    debug!(
        "merged family '{}': {} columns, {} rows from {} files",
        family_name,
        merged.table.columns.len(),
        merged.table.rows.len(),
        merged.table.sources.len()
    );

    Ok(merged.table)
}

struct Merge {
    table: ResolvedTable,
    base_path: PathBuf,
}

impl Merge {
    fn seed(family_name: &str, base: Table) -> Self {
        let path = base.source_path;
        let columns = base
            .columns
            .into_iter()
            .map(|c| ResolvedColumn {
                name: c.name,
                index: c.index,
                introduced_by: path.clone(),
            })
            .collect();

        let mut row_index = HashMap::with_capacity(base.rows.len());
        let rows = base
            .rows
            .into_iter()
            .enumerate()
            .map(|(pos, row)| {
                row_index.insert(row.id, pos);
                ResolvedRow {
                    id: row.id,
                    introduced_by: path.clone(),
                    cells: row
                        .cells
                        .into_iter()
                        .map(|value| ResolvedCell::new(value, path.clone()))
                        .collect(),
                }
            })
            .collect();

        Self {
            table: ResolvedTable {
                family_name: family_name.to_string(),
                columns,
                rows,
                sources: vec![path.clone()],
                row_index,
            },
            base_path: path,
        }
    }

    fn fold(&mut self, variant: Table) {
        let path = variant.source_path;
        debug!("folding {} into '{}'", path.display(), self.table.family_name);

        // Variant column position -> resolved column position
        let mapping: Vec<usize> = variant
            .columns
            .iter()
            .map(|c| self.column_or_insert(&c.name, &path))
            .collect();

        for row in variant.rows {
            match self.table.row_position(row.id) {
                Some(pos) => {
                    let existing = &mut self.table.rows[pos].cells;
                    for (value, &target) in row.cells.into_iter().zip(&mapping) {
                        if !value.is_empty() {
                            existing[target] = ResolvedCell::new(value, path.clone());
                        }
                    }
                }
                None => self.insert_row(row.id, row.cells, &mapping, &path),
            }
        }

        self.table.sources.push(path);
    }

    fn column_or_insert(&mut self, name: &str, path: &Path) -> usize {
        if let Some(col) = self.table.find_column(name) {
            return col.index;
        }

        let index = self.table.columns.len();
        self.table.columns.push(ResolvedColumn {
            name: name.to_string(),
            index,
            introduced_by: path.to_path_buf(),
        });
        // Existing rows keep the provenance of the file that introduced them
        for row in &mut self.table.rows {
            let origin = row.introduced_by.clone();
            row.cells.push(ResolvedCell::new(CellValue::Empty, origin));
        }
        index
    }

    fn insert_row(&mut self, id: i64, values: Vec<CellValue>, mapping: &[usize], path: &Path) {
        let mut cells: Vec<ResolvedCell> = self
            .table
            .columns
            .iter()
            .map(|_| ResolvedCell::new(CellValue::Empty, self.base_path.clone()))
            .collect();
        for (value, &target) in values.into_iter().zip(mapping) {
            cells[target] = ResolvedCell::new(value, path.to_path_buf());
        }

        self.table.row_index.insert(id, self.table.rows.len());
        self.table.rows.push(ResolvedRow {
            id,
            introduced_by: path.to_path_buf(),
            cells,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_csv_str;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn merge_strs(files: &[(&str, &str)]) -> ResolvedTable {
        let tables = files
            .iter()
            .map(|(name, csv)| parse_csv_str(csv, name).unwrap())
            .collect();
        merge_tables("test", tables).unwrap()
    }

    #[test]
    fn test_merge_single_table() {
        let result = merge_strs(&[("base.csv", "ID,Name,Value\n1,foo,100\n2,bar,200\n")]);

        assert_eq!(result.columns.len(), 3);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].id, 1);
        assert_eq!(result.rows[1].id, 2);
        assert_eq!(result.sources, vec![PathBuf::from("base.csv")]);
    }

    #[test]
    fn test_merge_override_cells() {
        let result = merge_strs(&[
            ("base.csv", "ID,Name,Value\n1,foo,100\n2,bar,200\n"),
            ("overlay.csv", "ID,Name,Value\n1,FOO,999\n"),
        ]);

        // Row 1 should be overridden
        let row1 = result.find_row(1).unwrap();
        assert_eq!(row1.cells[1].value, CellValue::String("FOO".to_string()));
        assert_eq!(row1.cells[2].value, CellValue::Integer(999));

        // Row 2 should be unchanged
        let row2 = result.find_row(2).unwrap();
        assert_eq!(row2.cells[1].value, CellValue::String("bar".to_string()));
        assert_eq!(row2.cells[1].source, PathBuf::from("base.csv"));
    }

    #[test]
    fn test_merge_keeps_first_appearance_order() {
        let result = merge_strs(&[
            ("base.csv", "ID,Name\n5,e\n1,a\n"),
            ("a.csv", "ID,Name\n3,c\n1,A\n"),
            ("b.csv", "ID,Name\n2,b\n"),
        ]);

        let ids: Vec<i64> = result.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 1, 3, 2]);
        assert_eq!(result.row_position(3), Some(2));
    }

    #[test]
    fn test_merge_column_union() {
        let result = merge_strs(&[
            ("base.csv", "ID,Name\n1,foo\n"),
            ("overlay.csv", "ID,Extra\n1,bonus\n2,new\n"),
        ]);

        assert_eq!(result.column_names(), vec!["ID", "Name", "Extra"]);
        let extra = result.find_column("Extra").unwrap();
        assert_eq!(extra.introduced_by, PathBuf::from("overlay.csv"));

        // Row 1 got the new column from the overlay
        let row1 = result.find_row(1).unwrap();
        assert_eq!(row1.cells[2].value, CellValue::String("bonus".into()));
        assert_eq!(row1.cells[2].source, PathBuf::from("overlay.csv"));

        // Row 2 is new; columns the overlay lacks are empty with base provenance
        let row2 = result.find_row(2).unwrap();
        assert_eq!(row2.introduced_by, PathBuf::from("overlay.csv"));
        assert_eq!(row2.cells[1].value, CellValue::Empty);
        assert_eq!(row2.cells[1].source, PathBuf::from("base.csv"));
        assert_eq!(row2.cells[0].source, PathBuf::from("overlay.csv"));
    }

    #[test]
    fn test_new_column_keeps_row_origin_provenance() {
        let result = merge_strs(&[
            ("base.csv", "ID,Name\n1,foo\n"),
            ("a.csv", "ID,Name\n2,bar\n"),
            ("b.csv", "ID,Extra\n3,x\n"),
        ]);

        // Rows predating "Extra" point at whichever file introduced them
        let extra = result.find_column("Extra").unwrap().index;
        assert_eq!(result.rows[0].cells[extra].source, PathBuf::from("base.csv"));
        assert_eq!(result.rows[1].cells[extra].source, PathBuf::from("a.csv"));
        assert_eq!(result.rows[0].cells[extra].value, CellValue::Empty);
    }

    #[test]
    fn test_provenance_tracking() {
        let result = merge_strs(&[
            ("base.csv", "ID,Value\n1,100\n"),
            ("overlay.csv", "ID,Value\n1,200\n"),
        ]);

        // Value should come from overlay
        let row = result.find_row(1).unwrap();
        assert_eq!(row.cells[1].source, PathBuf::from("overlay.csv"));
    }

    #[test]
    fn test_empty_cells_dont_override() {
        let result = merge_strs(&[
            ("base.csv", "ID,Value\n1,100\n"),
            ("overlay.csv", "ID,Value\n1,\n"),
        ]);

        // Empty cell should not override base value
        let row = result.find_row(1).unwrap();
        assert_eq!(row.cells[1].value, CellValue::Integer(100));
        assert_eq!(row.cells[1].source, PathBuf::from("base.csv"));
    }

    #[test]
    fn test_later_variant_wins() {
        let result = merge_strs(&[
            ("base.csv", "ID,Value\n1,100\n"),
            ("a.csv", "ID,Value\n1,200\n"),
            ("b.csv", "ID,Value\n1,300\n"),
        ]);

        let cell = result.cell_by_id(1, "Value").unwrap();
        assert_eq!(cell.value, CellValue::Integer(300));
        assert_eq!(cell.source, PathBuf::from("b.csv"));
    }

    #[test]
    fn test_achievements_scenario() {
        let result = merge_strs(&[
            ("achievements.csv", "id,name,points\n0,A,10\n"),
            ("achievements_ep1.csv", "id,name,points\n0,,20\n1,B,5\n"),
        ]);

        assert_eq!(result.column_names(), vec!["id", "name", "points"]);

        let name = result.cell_by_id(0, "name").unwrap();
        assert_eq!(name.value, CellValue::String("A".into()));
        assert_eq!(name.source, PathBuf::from("achievements.csv"));

        let points = result.cell_by_id(0, "points").unwrap();
        assert_eq!(points.value, CellValue::Integer(20));
        assert_eq!(points.source, PathBuf::from("achievements_ep1.csv"));

        for column in ["name", "points"] {
            let cell = result.cell_by_id(1, column).unwrap();
            assert_eq!(cell.source, PathBuf::from("achievements_ep1.csv"));
        }
        assert_eq!(
            result.cell_by_id(1, "name").unwrap().value,
            CellValue::String("B".into())
        );
        assert_eq!(result.cell_by_id(1, "points").unwrap().value, CellValue::Integer(5));
    }

    #[test]
    fn test_cell_lookup_errors() {
        let result = merge_strs(&[("base.csv", "ID,Value\n1,100\n")]);

        assert!(matches!(result.cell_by_id(9, "Value"), Err(Error::UnknownRow(9))));
        assert!(matches!(
            result.cell_by_id(1, "Nope"),
            Err(Error::UnknownColumn(_))
        ));
        assert!(result.cell(5, 0).is_none());
        assert_eq!(result.row_id(0), Some(1));
        assert_eq!(result.row_id(1), None);
    }

    #[test]
    fn test_filter_rows() {
        let result = merge_strs(&[("base.csv", "ID,Name\n1,Sword\n2,Shield\n3,Bow\n")]);

        assert_eq!(result.filter_rows("Name", "s").unwrap(), vec![0, 1]);
        assert_eq!(result.filter_rows("Name", "BOW").unwrap(), vec![2]);
        assert!(result.filter_rows("Missing", "x").is_err());
    }

    #[test]
    fn test_write_csv() {
        let result = merge_strs(&[
            ("base.csv", "ID,Name\n1,\"a,b\"\n"),
            ("overlay.csv", "ID,Name\n2,c\n"),
        ]);

        let mut out = Vec::new();
        result.write_csv(&mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "ID,Name\n1,\"a,b\"\n2,c\n"
        );
    }

    #[test]
    fn test_merge_without_base_fails() {
        let family = Family {
            name: "orphan".to_string(),
            members: vec![crate::scanner::FamilyMember {
                path: PathBuf::from("orphan_kcc.csv"),
                suffix: Some("kcc".to_string()),
            }],
        };

        assert!(matches!(merge_family(&family), Err(Error::MissingBase(_))));
    }

    fn cell_text() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[a-z]{1,4}", "[0-9]{1,3}"]
    }

    proptest! {
        #[test]
        fn override_law_holds(
            base_cells in proptest::collection::vec(cell_text(), 4),
            variant_cells in proptest::collection::vec(cell_text(), 4),
        ) {
            let base = format!("ID,A,B,C,D\n0,{}\n", base_cells.join(","));
            let variant = format!("ID,A,B,C,D\n0,{}\n", variant_cells.join(","));
            let result = merge_strs(&[("base.csv", &base), ("var.csv", &variant)]);

            prop_assert!(result.column_count() >= 5);
            for (i, (b, v)) in base_cells.iter().zip(&variant_cells).enumerate() {
                let cell = &result.rows[0].cells[i + 1];
                if v.is_empty() {
                    prop_assert_eq!(&cell.value, &CellValue::parse(b));
                    prop_assert_eq!(&cell.source, &PathBuf::from("base.csv"));
                } else {
                    prop_assert_eq!(&cell.value, &CellValue::parse(v));
                    prop_assert_eq!(&cell.source, &PathBuf::from("var.csv"));
                }
            }
        }
    }
}
