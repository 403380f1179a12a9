//! Staged and atomic file writes
//!
//! Output is written to a temp file in the destination directory (so the final
//! rename never crosses devices), flushed, and only then renamed into place.
//! Temp files that are never committed are removed when dropped.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub(crate) fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` returns `Some("")` for bare relative file names
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::FileWrite {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `bytes` to a flushed temp file next to `dest`
fn write_temp(dest: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir).map_err(write_err(dir))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err(dest))?;
    tmp.write_all(bytes).map_err(write_err(dest))?;
    tmp.as_file_mut().flush().map_err(write_err(dest))?;
    tmp.as_file().sync_all().map_err(write_err(dest))?;
    Ok(tmp)
}

/// Atomically replace `dest` with `bytes`
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = write_temp(dest, bytes)?;
    tmp.persist(dest).map_err(|e| Error::FileWrite {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// A set of writes that become visible together
#[derive(Debug, Default)]
pub struct StagedWrites {
    staged: Vec<(PathBuf, NamedTempFile)>,
}

impl StagedWrites {
    /// An empty set of writes
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to a temp file that will later replace `dest`
    pub fn stage(&mut self, dest: PathBuf, bytes: &[u8]) -> Result<()> {
        let tmp = write_temp(&dest, bytes)?;
        self.staged.push((dest, tmp));
        Ok(())
    }

    /// Number of staged files
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Rename every staged file into place, in staging order
    pub fn commit(self) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.staged.len());
        for (dest, tmp) in self.staged {
            tmp.persist(&dest).map_err(|e| Error::FileWrite {
                path: dest.clone(),
                source: e.error,
            })?;
            written.push(dest);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/out.json");

        write_atomic(&dest, b"[]").unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"[]");
    }

    #[test]
    fn test_staged_writes_only_appear_on_commit() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");

        let mut staged = StagedWrites::new();
        staged.stage(a.clone(), b"A").unwrap();
        staged.stage(b.clone(), b"B").unwrap();
        assert_eq!(staged.len(), 2);
        assert!(!a.exists());

        let written = staged.commit().unwrap();

        assert_eq!(written, vec![a.clone(), b.clone()]);
        assert_eq!(fs::read(&a).unwrap(), b"A");
        assert_eq!(fs::read(&b).unwrap(), b"B");
    }

    #[test]
    fn test_dropped_stage_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        {
            let mut staged = StagedWrites::new();
            staged.stage(dir.path().join("a.csv"), b"A").unwrap();
        }

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
