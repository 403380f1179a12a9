//! In-memory edits that have not been applied yet
//!
//! [`PendingEdits`] is an ordered command log over one family's resolved
//! table. Each staged edit remembers the value it replaced so it can be
//! undone, and the log turns into a [`PatchFile`] when the user applies it.

use crate::error::{Error, Result};
use crate::merger::ResolvedTable;
use crate::patch::{Edit, PatchFile};
use crate::table::CellValue;

/// One staged edit and the effective value it replaced
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    /// The staged edit
    pub edit: Edit,
    /// Effective value of the cell before the edit
    pub previous: CellValue,
}

/// Undoable log of edits for a single family
#[derive(Debug, Clone, Default)]
pub struct PendingEdits {
    family: String,
    done: Vec<PendingEdit>,
    undone: Vec<PendingEdit>,
}

impl PendingEdits {
    /// An empty log for `family`
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            done: Vec::new(),
            undone: Vec::new(),
        }
    }

    /// Family the edits belong to
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Stage an edit after checking its row and column against `table`.
    ///
    /// Staging clears the redo stack.
    pub fn stage(&mut self, table: &ResolvedTable, edit: Edit) -> Result<()> {
        if table.family_name != self.family {
            return Err(Error::FamilyNotFound(table.family_name.clone()));
        }
        let previous = self.effective_value(table, edit.row_id, &edit.column)?;

        self.done.push(PendingEdit { edit, previous });
        self.undone.clear();
        Ok(())
    }

    /// Revert the most recent staged edit
    pub fn undo(&mut self) -> Option<&PendingEdit> {
        let entry = self.done.pop()?;
        self.undone.push(entry);
        self.undone.last()
    }

    /// Re-stage the most recently undone edit
    pub fn redo(&mut self) -> Option<&PendingEdit> {
        let entry = self.undone.pop()?;
        self.done.push(entry);
        self.done.last()
    }

    /// Whether there is a staged edit to undo
    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    /// Whether there is an undone edit to redo
    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    /// Staged edits, oldest first
    pub fn edits(&self) -> impl Iterator<Item = &Edit> {
        self.done.iter().map(|p| &p.edit)
    }

    /// Number of staged edits
    pub fn len(&self) -> usize {
        self.done.len()
    }

    /// Whether no edit is staged
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Value of a cell with staged edits laid over the resolved table
    pub fn effective_value(
        &self,
        table: &ResolvedTable,
        row_id: i64,
        column: &str,
    ) -> Result<CellValue> {
        let resolved = table.cell_by_id(row_id, column)?;
        Ok(self
            .done
            .iter()
            .rev()
            .find(|p| p.edit.row_id == row_id && p.edit.column == column)
            .map(|p| CellValue::parse(&p.edit.value))
            .unwrap_or_else(|| resolved.value.clone()))
    }

    /// Build a patch from the staged edits
    pub fn to_patch(&self) -> PatchFile {
        let mut patch = PatchFile::new(self.family.clone());
        for edit in self.edits() {
            patch.add_edit(edit.clone());
        }
        patch
    }

    /// Drop every staged and undone edit
    pub fn clear(&mut self) {
        self.done.clear();
        self.undone.clear();
    }
}
