//! Patch and export functionality for editing 2DA tables
//!
//! This module provides:
//! - The patch file format (JSON) for storing edits against a merged family
//! - Validation of a patch against the family's resolved table
//! - Export that rewrites only the source files owning the edited cells,
//!   writing modified copies to an output directory
//!
//! The owning file of an edit is the provenance of the edited cell before the
//! patch is applied. Originals are never modified.

use crate::error::{Error, ParseError, Result};
use crate::fsutil::{parent_dir_or_dot, StagedWrites};
use crate::history::{HistoryEntry, HistoryFile};
use crate::merger::{merge_family, ResolvedTable};
use crate::parser::{csv_reader, decode_text, strip_bom, TextEncoding};
use crate::scanner::{Family, ScanResult};
use crate::table::CellValue;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A single edit to a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edit {
    /// Row ID (must match a row in the table)
    pub row_id: i64,
    /// Column name
    pub column: String,
    /// New value as a string
    pub value: String,
}

impl Edit {
    /// Create a new edit
    pub fn new(row_id: i64, column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            row_id,
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A patch file containing multiple edits for a family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchFile {
    /// Family name this patch applies to
    pub family: String,
    /// List of edits, applied in order
    pub edits: Vec<Edit>,
}

impl PatchFile {
    /// Create a new empty patch file
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            edits: Vec::new(),
        }
    }

    /// Add an edit to the patch
    pub fn add_edit(&mut self, edit: Edit) {
        self.edits.push(edit);
    }

    /// Parse a patch from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::Json)
    }

    /// Serialize the patch as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a patch file from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save the patch file to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Edits with repeated cells collapsed; the last occurrence of a
    /// `(row_id, column)` pair wins, ordered by first occurrence
    pub fn collapsed_edits(&self) -> Vec<Edit> {
        let mut collapsed: Vec<Edit> = Vec::with_capacity(self.edits.len());
        let mut positions: HashMap<(i64, &str), usize> = HashMap::new();

        for edit in &self.edits {
            match positions.get(&(edit.row_id, edit.column.as_str())) {
                Some(&pos) => collapsed[pos].value = edit.value.clone(),
                None => {
                    positions.insert((edit.row_id, edit.column.as_str()), collapsed.len());
                    collapsed.push(edit.clone());
                }
            }
        }
        collapsed
    }
}

/// JSON skeleton of an empty patch for `family`
pub fn create_patch_template(family: &str) -> Result<String> {
    PatchFile::new(family).to_json()
}

/// A batch file containing multiple patch operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFile {
    /// Root directories to scan
    pub roots: Vec<PathBuf>,
    /// Output directory for exports
    pub output_dir: PathBuf,
    /// List of patch files to apply
    pub patches: Vec<PathBuf>,
    /// History file to record applied patches in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

impl BatchFile {
    /// Load a batch file from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save the batch file to JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply every patch against one scan of the roots.
    ///
    /// Each patch is all-or-nothing; a failing patch is reported and the
    /// remaining patches still run.
    pub fn run(&self) -> Result<Vec<BatchOutcome>> {
        let scan = crate::scanner::scan_directory(&self.roots)?;

        Ok(self
            .patches
            .iter()
            .map(|patch_path| {
                let result = PatchFile::load(patch_path).and_then(|patch| {
                    let options = ApplyOptions {
                        history_path: self.history_file.as_deref(),
                        patch_file: Some(patch_path),
                    };
                    apply(&scan, &patch, &self.output_dir, &options)
                });
                BatchOutcome {
                    patch: patch_path.clone(),
                    result,
                }
            })
            .collect())
    }
}

/// Result of one patch of a batch run
#[derive(Debug)]
pub struct BatchOutcome {
    /// Patch file as listed in the batch
    pub patch: PathBuf,
    /// What applying that patch produced
    pub result: Result<PatchResult>,
}

/// A reason a patch cannot be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    /// The patch is not valid JSON or does not match the patch schema
    #[error("malformed patch: {message}")]
    Malformed { message: String },

    /// The scan has no family with this name
    #[error("family '{family}' not found")]
    UnknownFamily { family: String },

    /// The family exists but could not be merged
    #[error("family '{family}' could not be merged: {reason}")]
    FamilyUnusable { family: String, reason: String },

    /// An edit references a row id the merged table does not have
    #[error("edit {index}: row id {row_id} not found")]
    UnknownRow { index: usize, row_id: i64 },

    /// An edit references a column the merged table does not have
    #[error("edit {index}: column '{column}' not found")]
    UnknownColumn { index: usize, column: String },

    /// An edit targets the row id column
    #[error("edit {index}: row id column '{column}' cannot be edited")]
    IdentityColumn { index: usize, column: String },
}

/// Validate patch JSON against a scan. An empty list means the patch is valid.
pub fn validate_patch(scan: &ScanResult, patch_json: &str) -> Vec<ValidationError> {
    match serde_json::from_str::<PatchFile>(patch_json) {
        Ok(patch) => validate(scan, &patch),
        Err(e) => vec![ValidationError::Malformed {
            message: e.to_string(),
        }],
    }
}

/// Validate a parsed patch against a scan
pub fn validate(scan: &ScanResult, patch: &PatchFile) -> Vec<ValidationError> {
    match resolve_family(scan, patch) {
        Ok((_, table)) => validate_against(&table, patch),
        Err(errors) => errors,
    }
}

/// Check every edit of a patch against an already merged table.
///
/// Edits to the first column are rejected: it holds the row ids, and
/// rewriting one would break the row identity of the exported file.
pub fn validate_against(table: &ResolvedTable, patch: &PatchFile) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let identity = table.columns.first().map(|c| c.name.as_str());

    for (index, edit) in patch.edits.iter().enumerate() {
        if table.find_row(edit.row_id).is_none() {
            errors.push(ValidationError::UnknownRow {
                index,
                row_id: edit.row_id,
            });
        }
        if table.find_column(&edit.column).is_none() {
            errors.push(ValidationError::UnknownColumn {
                index,
                column: edit.column.clone(),
            });
        } else if identity == Some(edit.column.as_str()) {
            errors.push(ValidationError::IdentityColumn {
                index,
                column: edit.column.clone(),
            });
        }
    }

    errors
}

fn resolve_family<'a>(
    scan: &'a ScanResult,
    patch: &PatchFile,
) -> std::result::Result<(&'a Family, ResolvedTable), Vec<ValidationError>> {
    let family = scan.find_family(&patch.family).ok_or_else(|| {
        vec![ValidationError::UnknownFamily {
            family: patch.family.clone(),
        }]
    })?;

    let table = merge_family(family).map_err(|e| {
        vec![ValidationError::FamilyUnusable {
            family: patch.family.clone(),
            reason: e.to_string(),
        }]
    })?;

    Ok((family, table))
}

/// Edits of one patch grouped by the file that owns each edited cell
#[derive(Debug, Clone)]
pub struct PatchPlan {
    /// Family name
    pub family: String,
    /// Owning file -> collapsed edits for that file, in patch order
    pub edits_by_source: BTreeMap<PathBuf, Vec<Edit>>,
}

impl PatchPlan {
    /// Number of distinct cells the plan changes
    pub fn edit_count(&self) -> usize {
        self.edits_by_source.values().map(Vec::len).sum()
    }

    /// Current value of each planned cell, for previews
    pub fn current_value<'t>(
        &self,
        table: &'t ResolvedTable,
        edit: &Edit,
    ) -> Option<&'t CellValue> {
        table
            .cell_by_id(edit.row_id, &edit.column)
            .ok()
            .map(|cell| &cell.value)
    }
}

/// Work out which file owns each edit of a validated patch
pub fn plan_patch(family: &Family, table: &ResolvedTable, patch: &PatchFile) -> Result<PatchPlan> {
    let base = family
        .base_file()
        .ok_or_else(|| Error::MissingBase(family.name.clone()))?;
    let mut edits_by_source: BTreeMap<PathBuf, Vec<Edit>> = BTreeMap::new();

    for edit in patch.collapsed_edits() {
        let cell = table.cell_by_id(edit.row_id, &edit.column)?;
        // Provenance outside the family cannot be written back; use the base
        let owner = if family.contains(&cell.source) {
            cell.source.clone()
        } else {
            base.path.clone()
        };
        edits_by_source.entry(owner).or_default().push(edit);
    }

    Ok(PatchPlan {
        family: family.name.clone(),
        edits_by_source,
    })
}

/// Options for [`apply`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions<'a> {
    /// History file to append an entry to on success
    pub history_path: Option<&'a Path>,
    /// Patch file the edits came from, recorded in history
    pub patch_file: Option<&'a Path>,
}

/// Result of applying a patch
#[derive(Debug, Clone)]
pub struct PatchResult {
    /// Family name
    pub family: String,
    /// Number of distinct cells changed
    pub edits_applied: usize,
    /// Files written to the output directory
    pub exported: Vec<PathBuf>,
}

/// Validate and apply patch JSON, writing modified copies to `output_dir`
pub fn apply_patch(
    scan: &ScanResult,
    patch_json: &str,
    output_dir: &Path,
    history_path: Option<&Path>,
) -> Result<PatchResult> {
    let patch: PatchFile = serde_json::from_str(patch_json).map_err(|e| {
        Error::Validation(vec![ValidationError::Malformed {
            message: e.to_string(),
        }])
    })?;

    let options = ApplyOptions {
        history_path,
        patch_file: None,
    };
    apply(scan, &patch, output_dir, &options)
}

/// Validate and apply a parsed patch.
///
/// Nothing is written unless validation passes and every owning file has been
/// read and rewritten in memory. Output files are staged as temp files in
/// `output_dir` and renamed into place together.
pub fn apply(
    scan: &ScanResult,
    patch: &PatchFile,
    output_dir: &Path,
    options: &ApplyOptions<'_>,
) -> Result<PatchResult> {
    let (family, table) = resolve_family(scan, patch).map_err(Error::Validation)?;
    let errors = validate_against(&table, patch);
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    let plan = plan_patch(family, &table, patch)?;
    let rendered = render_plan(&plan, output_dir)?;
    ensure_not_source(scan, rendered.iter().map(|(dest, _)| dest.as_path()))?;

    // Fail on an unreadable history file before any output appears
    let history = match options.history_path {
        Some(path) => Some((path, HistoryFile::load(path)?)),
        None => None,
    };

    let exported: Vec<PathBuf> = rendered.iter().map(|(dest, _)| dest.clone()).collect();
    let mut staged = StagedWrites::new();
    for (dest, bytes) in rendered {
        staged.stage(dest, &bytes)?;
    }

    // The history rewrite is staged with the outputs so that any write
    // failure happens before the first rename
    if let Some((path, mut history)) = history {
        history.append(HistoryEntry::new(
            &patch.family,
            patch.edits.len(),
            options.patch_file.map(Path::to_path_buf),
            exported.clone(),
        ));
        staged.stage(path.to_path_buf(), history.to_json()?.as_bytes())?;
        debug!("staged history update for {}", path.display());
    }

    staged.commit()?;
    info!(
        "applied {} edits to '{}', wrote {} files to {}",
        plan.edit_count(),
        patch.family,
        exported.len(),
        output_dir.display()
    );

    Ok(PatchResult {
        family: patch.family.clone(),
        edits_applied: plan.edit_count(),
        exported,
    })
}

/// Fail if any destination resolves to a scanned family member
fn ensure_not_source<'a>(
    scan: &ScanResult,
    dests: impl IntoIterator<Item = &'a Path>,
) -> Result<()> {
    let sources: HashSet<PathBuf> = scan
        .families
        .iter()
        .flat_map(|f| &f.members)
        .filter_map(|m| fs::canonicalize(&m.path).ok())
        .collect();

    for dest in dests {
        // The destination may not exist yet; resolve its directory instead
        let resolved = fs::canonicalize(dest).ok().or_else(|| {
            let dir = fs::canonicalize(parent_dir_or_dot(dest)).ok()?;
            dest.file_name().map(|name| dir.join(name))
        });
        if resolved.is_some_and(|r| sources.contains(&r)) {
            return Err(Error::OutputIsSource {
                path: dest.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Rewrite every owning file in memory, keyed by output path
fn render_plan(plan: &PatchPlan, output_dir: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut claimed: HashMap<&std::ffi::OsStr, &Path> = HashMap::new();
    let mut rendered = Vec::with_capacity(plan.edits_by_source.len());

    for (source, edits) in &plan.edits_by_source {
        let file_name = source.file_name().ok_or_else(|| Error::FileRead {
            path: source.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
        })?;
        if let Some(first) = claimed.insert(file_name, source) {
            return Err(Error::OutputCollision {
                file_name: file_name.to_string_lossy().into_owned(),
                first: first.to_path_buf(),
                second: source.clone(),
            });
        }

        let original = fs::read(source).map_err(|e| Error::FileRead {
            path: source.clone(),
            source: e,
        })?;
        debug!("rewriting {} with {} edits", source.display(), edits.len());
        rendered.push((
            output_dir.join(file_name),
            render_with_edits(&original, source, edits)?,
        ));
    }

    Ok(rendered)
}

/// Apply edits to the raw CSV text of one file.
///
/// Untouched fields keep their text. A column the file lacks is appended to
/// its header, and a row id the file lacks is appended as a new row. A file
/// read as Windows-1252 is written back in Windows-1252.
pub fn render_with_edits(original: &[u8], source: &Path, edits: &[Edit]) -> Result<Vec<u8>> {
    let parse_err = |e: ParseError| Error::Parse {
        path: source.to_path_buf(),
        source: e,
    };

    let (text, encoding) = decode_text(original, source);
    if encoding == TextEncoding::Windows1252 {
        if let Some(edit) = edits.iter().find(|e| !encodes_as_1252(&e.value)) {
            return Err(Error::Unencodable {
                path: source.to_path_buf(),
                value: edit.value.clone(),
            });
        }
    }
    let body = strip_bom(&text);
    let had_bom = body.len() != text.len();
    let crlf = body.contains("\r\n");

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in csv_reader(body).records() {
        let record = record.map_err(|e| parse_err(e.into()))?;
        records.push(record.iter().map(str::to_string).collect());
    }
    if records.is_empty() {
        return Err(parse_err(ParseError::NoColumns));
    }
    let mut header = records.remove(0);
    let mut rows = records;

    let mut row_positions: HashMap<i64, usize> = HashMap::new();
    for (pos, row) in rows.iter().enumerate() {
        if let Some(CellValue::Integer(id)) = row.first().map(|f| CellValue::parse(f)) {
            row_positions.entry(id).or_insert(pos);
        }
    }

    for edit in edits {
        let col = match header.iter().position(|h| h.trim() == edit.column) {
            Some(col) => col,
            None => {
                header.push(edit.column.clone());
                for row in &mut rows {
                    row.push(String::new());
                }
                header.len() - 1
            }
        };

        let pos = match row_positions.get(&edit.row_id) {
            Some(&pos) => pos,
            None => {
                let mut row = vec![String::new(); header.len()];
                row[0] = edit.row_id.to_string();
                rows.push(row);
                row_positions.insert(edit.row_id, rows.len() - 1);
                rows.len() - 1
            }
        };

        let row = &mut rows[pos];
        if row.len() <= col {
            row.resize(col + 1, String::new());
        }
        row[col] = edit.value.clone();
    }

    let terminator = if crlf {
        csv::Terminator::CRLF
    } else {
        csv::Terminator::Any(b'\n')
    };
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(terminator)
        .from_writer(Vec::new());

    let to_io = |e: csv::Error| Error::Io(e.into());
    writer.write_record(&header).map_err(to_io)?;
    for row in &rows {
        writer.write_record(row).map_err(to_io)?;
    }
    let body = writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    if encoding == TextEncoding::Windows1252 {
        let utf8 = String::from_utf8(body)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        let (encoded, _, unmappable) = encoding_rs::WINDOWS_1252.encode(&utf8);
        let encoded = encoded.into_owned();
        if unmappable {
            return Err(Error::Unencodable {
                path: source.to_path_buf(),
                value: utf8,
            });
        }
        return Ok(encoded);
    }

    let mut out = Vec::with_capacity(body.len() + 3);
    if had_bom {
        out.extend_from_slice("\u{feff}".as_bytes());
    }
    out.extend_from_slice(&body);
    Ok(out)
}

fn encodes_as_1252(value: &str) -> bool {
    let (_, _, unmappable) = encoding_rs::WINDOWS_1252.encode(value);
    !unmappable
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render(csv: &str, edits: &[Edit]) -> String {
        let out = render_with_edits(csv.as_bytes(), Path::new("t.csv"), edits).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_edit_creation() {
        let edit = Edit::new(42, "Name", "NewValue");
        assert_eq!(edit.row_id, 42);
        assert_eq!(edit.column, "Name");
        assert_eq!(edit.value, "NewValue");
    }

    #[test]
    fn test_patch_file_serialization() {
        let mut patch = PatchFile::new("test_family");
        patch.add_edit(Edit::new(1, "Col1", "Value1"));
        patch.add_edit(Edit::new(2, "Col2", "Value2"));

        let json = patch.to_json().unwrap();
        let loaded = PatchFile::from_json(&json).unwrap();

        assert_eq!(loaded.family, "test_family");
        assert_eq!(loaded.edits.len(), 2);
        assert_eq!(loaded.edits[0].row_id, 1);
        assert_eq!(loaded.edits[1].column, "Col2");
    }

    #[test]
    fn test_patch_template_is_empty() {
        let template = create_patch_template("achievements").unwrap();
        let patch = PatchFile::from_json(&template).unwrap();

        assert_eq!(patch, PatchFile::new("achievements"));
    }

    #[test]
    fn test_patch_schema_is_strict() {
        assert!(PatchFile::from_json(r#"{"family":"a"}"#).is_err());
        assert!(PatchFile::from_json(
            r#"{"family":"a","edits":[{"row_id":"1","column":"c","value":"v"}]}"#
        )
        .is_err());
        assert!(PatchFile::from_json(
            r#"{"family":"a","edits":[{"row_id":1,"column":"c","value":"v","x":1}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_collapsed_edits_last_wins() {
        let mut patch = PatchFile::new("f");
        patch.add_edit(Edit::new(1, "A", "first"));
        patch.add_edit(Edit::new(2, "A", "other"));
        patch.add_edit(Edit::new(1, "A", "last"));

        assert_eq!(
            patch.collapsed_edits(),
            vec![Edit::new(1, "A", "last"), Edit::new(2, "A", "other")]
        );
    }

    #[test]
    fn test_render_rewrites_only_edited_cell() {
        let out = render(
            "id,name,points\n0,\"A\",10\n1,\"x, y\",2.50\n",
            &[Edit::new(0, "points", "999")],
        );

        assert_eq!(out, "id,name,points\n0,A,999\n1,\"x, y\",2.50\n");
    }

    #[test]
    fn test_render_quotes_new_values() {
        let out = render("id,name\n0,a\n", &[Edit::new(0, "name", "say \"hi\", ok")]);

        assert_eq!(out, "id,name\n0,\"say \"\"hi\"\", ok\"\n");
    }

    #[test]
    fn test_render_appends_missing_row_and_column() {
        let out = render(
            "id,name\n0,a\n",
            &[Edit::new(0, "extra", "e"), Edit::new(7, "name", "g")],
        );

        assert_eq!(out, "id,name,extra\n0,a,e\n7,g,\n");
    }

    #[test]
    fn test_render_preserves_crlf_and_bom() {
        let out = render("\u{feff}id,name\r\n0,a\r\n", &[Edit::new(0, "name", "b")]);

        assert_eq!(out, "\u{feff}id,name\r\n0,b\r\n");
    }

    #[test]
    fn test_render_keeps_windows_1252() {
        let original = b"id,name,points\n0,caf\xe9,10\n";
        let out = render_with_edits(
            original,
            Path::new("t.csv"),
            &[Edit::new(1, "name", "na\u{ef}ve")],
        )
        .unwrap();

        assert_eq!(out, b"id,name,points\n0,caf\xe9,10\n1,na\xefve,\n".to_vec());
    }

    #[test]
    fn test_render_rejects_value_outside_windows_1252() {
        let original = b"id,name\n0,caf\xe9\n";
        let edits = [Edit::new(0, "name", "\u{65e5}")];
        let result = render_with_edits(original, Path::new("t.csv"), &edits);

        assert!(matches!(result, Err(Error::Unencodable { value, .. }) if value == "\u{65e5}"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::UnknownRow {
            index: 0,
            row_id: 99,
        };
        assert_eq!(err.to_string(), "edit 0: row id 99 not found");
    }

    #[test]
    fn test_batch_file_history_is_optional() {
        let batch: BatchFile =
            serde_json::from_str(r#"{"roots":["r"],"output_dir":"o","patches":["p.json"]}"#)
                .unwrap();
        assert!(batch.history_file.is_none());
    }
}
