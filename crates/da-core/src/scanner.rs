//! Directory scanner for discovering and grouping 2DA CSV files
//!
//! Scanning is recursive and only looks at file names: a file named
//! `<base>_<suffix>.csv` whose suffix is one of [`KNOWN_SUFFIXES`] becomes a
//! variant of the `<base>` family, every other `.csv` file is the base file of
//! the family named after its stem. File contents are parsed later, at merge
//! time.

use crate::error::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Known DLC/variant suffixes - these indicate a variant file
pub const KNOWN_SUFFIXES: &[&str] = &[
    "drk", "ep1", "gib", "kcc", "lel", "mem", "shale", "str", "val", "vala", "toe", "hrm",
    "ibmoobs", "gxa",
];

/// A family of related CSV files that should be merged together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    /// Base name of the family (e.g., "abi_base")
    pub name: String,
    /// Members of this family: the base file first, then variants by suffix
    pub members: Vec<FamilyMember>,
}

impl Family {
    /// Get the base file (no suffix) if it exists
    pub fn base_file(&self) -> Option<&FamilyMember> {
        self.members.iter().find(|m| m.is_base())
    }

    /// Get variant files (with suffix), sorted alphabetically by suffix
    pub fn variants(&self) -> Vec<&FamilyMember> {
        let mut variants: Vec<&FamilyMember> =
            self.members.iter().filter(|m| !m.is_base()).collect();
        variants.sort_by(|a, b| a.suffix.cmp(&b.suffix));
        variants
    }

    /// Check whether a path belongs to this family
    pub fn contains(&self, path: &Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }
}

/// A member of a family (single CSV file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMember {
    /// Full path to the file
    pub path: PathBuf,
    /// Suffix (e.g., "kcc" for "abi_base_kcc.csv"), None for base file
    pub suffix: Option<String>,
}

impl FamilyMember {
    /// Whether this is the family's base file
    pub fn is_base(&self) -> bool {
        self.suffix.is_none()
    }
}

/// Something the scanner skipped instead of failing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Offending path, when known
    pub path: Option<PathBuf>,
    /// Human-readable reason
    pub message: String,
}

/// Result of scanning directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Root directories that were scanned
    pub roots: Vec<PathBuf>,
    /// Discovered families, sorted by name
    pub families: Vec<Family>,
    /// Total number of files grouped into families
    pub total_files: usize,
    /// Entries that were skipped during the scan
    pub warnings: Vec<ScanWarning>,
}

impl ScanResult {
    /// Find a family by name
    pub fn find_family(&self, name: &str) -> Option<&Family> {
        self.families
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.families[idx])
    }

    /// Find a family by name, failing with `FamilyNotFound`
    pub fn family(&self, name: &str) -> Result<&Family> {
        self.find_family(name)
            .ok_or_else(|| Error::FamilyNotFound(name.to_string()))
    }

    /// Get all family names
    pub fn family_names(&self) -> Vec<&str> {
        self.families.iter().map(|f| f.name.as_str()).collect()
    }

    /// Family names with their member counts
    pub fn list_families(&self) -> Vec<(&str, usize)> {
        self.families
            .iter()
            .map(|f| (f.name.as_str(), f.members.len()))
            .collect()
    }

    /// Member files of a family, base first
    pub fn members(&self, name: &str) -> Result<&[FamilyMember]> {
        self.family(name).map(|f| f.members.as_slice())
    }

    /// Family names containing `pattern`, ignoring case
    pub fn search_families(&self, pattern: &str) -> Vec<&str> {
        let pattern = pattern.to_lowercase();
        self.families
            .iter()
            .filter(|f| f.name.to_lowercase().contains(&pattern))
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Scan a single root directory
pub fn scan<P: AsRef<Path>>(root: P) -> Result<ScanResult> {
    scan_directory(&[root])
}

/// Scan one or more directories for CSV files and group them into families
pub fn scan_directory<P: AsRef<Path>>(roots: &[P]) -> Result<ScanResult> {
    let mut file_map: BTreeMap<String, Vec<FamilyMember>> = BTreeMap::new();
    let mut warnings = Vec::new();

    for root in roots {
        let root = root.as_ref();

        // An unreadable root is fatal; unreadable entries below it are not
        fs::read_dir(root).map_err(|e| Error::DirectoryRead {
            path: root.to_path_buf(),
            source: e,
        })?;

        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf);
                    warn!("skipping unreadable entry: {}", e);
                    warnings.push(ScanWarning {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !has_csv_extension(path) {
                continue;
            }

            match path.file_stem().and_then(|s| s.to_str()) {
                Some(file_name) => {
                    let (family_name, suffix) = extract_family_info(file_name);
                    file_map.entry(family_name).or_default().push(FamilyMember {
                        path: path.to_path_buf(),
                        suffix,
                    });
                }
                None => {
                    warn!("skipping {}: file name is not valid UTF-8", path.display());
                    warnings.push(ScanWarning {
                        path: Some(path.to_path_buf()),
                        message: "file name is not valid UTF-8".to_string(),
                    });
                }
            }
        }
    }

    let mut total_files = 0;
    let families: Vec<Family> = file_map
        .into_iter()
        .map(|(name, members)| {
            let members = dedup_members(&name, members, &mut warnings);
            total_files += members.len();
            Family { name, members }
        })
        .collect();

    debug!(
        "scanned {} root(s): {} files in {} families",
        roots.len(),
        total_files,
        families.len()
    );

    Ok(ScanResult {
        roots: roots.iter().map(|r| r.as_ref().to_path_buf()).collect(),
        families,
        total_files,
        warnings,
    })
}

/// Sort members (base first, then variants by suffix) and keep only the
/// first file found for each role
fn dedup_members(
    family: &str,
    mut members: Vec<FamilyMember>,
    warnings: &mut Vec<ScanWarning>,
) -> Vec<FamilyMember> {
    members.sort_by(|a, b| match (&a.suffix, &b.suffix) {
        (None, None) => a.path.cmp(&b.path),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(sa), Some(sb)) => sa.cmp(sb).then_with(|| a.path.cmp(&b.path)),
    });

    let mut kept: Vec<FamilyMember> = Vec::with_capacity(members.len());
    for member in members {
        match kept.iter().find(|k| k.suffix == member.suffix) {
            Some(existing) => {
                let message = format!(
                    "duplicate {} for family '{}', keeping {}",
                    member.suffix.as_deref().unwrap_or("base file"),
                    family,
                    existing.path.display()
                );
                warn!("{}: {}", member.path.display(), message);
                warnings.push(ScanWarning {
                    path: Some(member.path),
                    message,
                });
            }
            None => kept.push(member),
        }
    }
    kept
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Extract family name and optional suffix from a filename
///
/// Examples:
/// - "abi_base" -> ("abi_base", None)
/// - "abi_base_kcc" -> ("abi_base", Some("kcc"))
/// - "achievements_ep1" -> ("achievements", Some("ep1"))
/// - "ai_abilities_cond_str" -> ("ai_abilities_cond", Some("str"))
pub fn extract_family_info(file_name: &str) -> (String, Option<String>) {
    if let Some((base, suffix)) = file_name.rsplit_once('_') {
        let suffix = suffix.to_ascii_lowercase();
        if !base.is_empty() && KNOWN_SUFFIXES.contains(&suffix.as_str()) {
            return (base.to_string(), Some(suffix));
        }
    }

    // No known suffix found - treat as base file
    (file_name.to_string(), None)
}
