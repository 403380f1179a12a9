//! Error types for da-core

use crate::patch::ValidationError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in da-core
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A scan root could not be opened
    #[error("failed to read directory '{path}': {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A table file could not be parsed
    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// No family with this name was found by the scan
    #[error("unknown family '{0}'")]
    FamilyNotFound(String),

    /// The family has variant files but no base file
    #[error("family '{0}' has no base file")]
    MissingBase(String),

    /// Column name is not part of the table
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Row id is not part of the table
    #[error("unknown row id {0}")]
    UnknownRow(i64),

    /// A patch failed validation; nothing was written
    #[error("patch failed validation: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    /// Two owning files would be exported under the same file name
    #[error("files '{first}' and '{second}' would both be exported as '{file_name}'")]
    OutputCollision {
        file_name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// An export would replace one of the scanned original files
    #[error("refusing to overwrite source file '{path}'")]
    OutputIsSource { path: PathBuf },

    /// An edited value has no representation in the owning file's encoding
    #[error("value '{value}' cannot be written to '{path}' as Windows-1252")]
    Unencodable { path: PathBuf, value: String },

    /// Malformed JSON in a patch, batch or history file
    #[error("malformed JSON in '{path}': {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Problems found while turning one CSV file into a [`crate::Table`]
#[derive(Debug, Error)]
pub enum ParseError {
    /// Malformed CSV (bad quoting, unreadable record)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The header row is missing or empty
    #[error("no columns found in header")]
    NoColumns,

    /// A data row does not line up with the header
    #[error("row {row}: expected {expected} fields, found {actual}")]
    ColumnCountMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// The identity column does not hold an integer
    #[error("row {row}: invalid row id '{value}'")]
    InvalidRowId { row: usize, value: String },

    /// The same row id appears twice in one file
    #[error("row {row}: duplicate row id {id}")]
    DuplicateRowId { row: usize, id: i64 },
}
