//! History tracking for applied patches
//!
//! The history file is a JSON array of [`HistoryEntry`] objects. Entries are
//! only ever appended; undo restores original files from the family instead
//! of editing the log.

use crate::error::{Error, Result};
use crate::fsutil::StagedWrites;
use crate::scanner::ScanResult;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A record of a patch that was applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Family that was patched
    pub family: String,
    /// When the patch was applied
    pub timestamp: DateTime<Utc>,
    /// Number of edits in the patch
    pub edit_count: usize,
    /// Patch file the edits were loaded from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_file: Option<PathBuf>,
    /// Files that were written
    pub exported: Vec<PathBuf>,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time
    pub fn new(
        family: impl Into<String>,
        edit_count: usize,
        patch_file: Option<PathBuf>,
        exported: Vec<PathBuf>,
    ) -> Self {
        Self {
            family: family.into(),
            timestamp: Utc::now(),
            edit_count,
            patch_file,
            exported,
        }
    }
}

/// History file containing all applied patches, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryFile {
    entries: Vec<HistoryEntry>,
}

impl HistoryFile {
    /// Create a new empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Load history from a file; a missing file is an empty history
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Serialization {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// The history as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save history to a file, replacing it atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::fsutil::write_atomic(path.as_ref(), self.to_json()?.as_bytes())
    }

    /// Add an entry to the history
    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Entries in the order they were appended
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entries sorted most recent first
    pub fn newest_first(&self) -> Vec<&HistoryEntry> {
        // Reverse first so entries with equal timestamps keep newest-appended first
        let mut entries: Vec<&HistoryEntry> = self.entries.iter().rev().collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Get history for a specific family, in append order
    pub fn for_family(&self, family: &str) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.family == family).collect()
    }

    /// Get the most recent entry for a family
    pub fn latest_for_family(&self, family: &str) -> Option<&HistoryEntry> {
        self.newest_first().into_iter().find(|e| e.family == family)
    }

    /// Get all families that have history, sorted and deduplicated
    pub fn families(&self) -> Vec<&str> {
        let mut families: Vec<&str> = self.entries.iter().map(|e| e.family.as_str()).collect();
        families.sort_unstable();
        families.dedup();
        families
    }

    /// Get total number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no patch has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load a history file and append one entry to it
pub fn append_entry<P: AsRef<Path>>(path: P, entry: HistoryEntry) -> Result<()> {
    let mut history = HistoryFile::load(&path)?;
    history.append(entry);
    history.save(path)
}

/// Undo an applied patch by copying the original family files named in the
/// entry's export list into `output_dir`.
///
/// The history file itself is left untouched.
pub fn restore_entry(
    scan: &ScanResult,
    entry: &HistoryEntry,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let family = scan.family(&entry.family)?;
    let mut staged = StagedWrites::new();

    for exported in &entry.exported {
        let Some(file_name) = exported.file_name() else {
            continue;
        };
        let Some(member) = family
            .members
            .iter()
            .find(|m| m.path.file_name() == Some(file_name))
        else {
            warn!(
                "no original for {} in family '{}'",
                exported.display(),
                entry.family
            );
            continue;
        };

        let original = fs::read(&member.path).map_err(|e| Error::FileRead {
            path: member.path.clone(),
            source: e,
        })?;
        staged.stage(output_dir.join(file_name), &original)?;
    }

    let restored = staged.commit()?;
    info!(
        "restored {} original files of '{}' to {}",
        restored.len(),
        entry.family,
        output_dir.display()
    );
    Ok(restored)
}
