//! da-core: Core library for parsing, merging and patching Dragon Age 2DA tables
//!
//! This library provides functionality to:
//! - Scan directories for CSV files (exported from 2DA format)
//! - Parse CSV files into structured tables
//! - Group files into "families" based on naming conventions
//! - Merge family members with per-cell provenance tracking
//! - Validate and apply patches (edits), exporting modified copies of the
//!   source files that own the edited cells
//! - Keep an append-only history of applied patches
//!
//! Every operation is synchronous and returns owned values; nothing is shared
//! between calls.

pub mod error;
pub mod fsutil;
pub mod history;
pub mod merger;
pub mod parser;
pub mod patch;
pub mod pending;
pub mod scanner;
pub mod table;

pub use error::{Error, ParseError, Result};
pub use history::{append_entry, restore_entry, HistoryEntry, HistoryFile};
pub use merger::{
    merge, merge_family, merge_tables, ResolvedCell, ResolvedColumn, ResolvedRow, ResolvedTable,
};
pub use parser::{parse_bytes, parse_csv, parse_csv_str};
pub use patch::{
    apply, apply_patch, create_patch_template, plan_patch, render_with_edits, validate,
    validate_against, validate_patch, ApplyOptions, BatchFile, BatchOutcome, Edit, PatchFile,
    PatchPlan, PatchResult, ValidationError,
};
pub use pending::{PendingEdit, PendingEdits};
pub use scanner::{
    scan, scan_directory, Family, FamilyMember, ScanResult, ScanWarning, KNOWN_SUFFIXES,
};
pub use table::{CellValue, Column, Row, Table};

/// Load the history file at `path`, newest entries first
pub fn load_history<P: AsRef<std::path::Path>>(path: P) -> Result<Vec<HistoryEntry>> {
    let history = HistoryFile::load(path)?;
    Ok(history.newest_first().into_iter().cloned().collect())
}
