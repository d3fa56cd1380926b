//! Traversal & enumerator (C7) - a single `scandir`-like primitive shared by
//! flat and recursive indexing. One pass classifies each child via cached
//! `file_type()` (no extra per-entry `stat`), drops excluded names, then
//! sorts deterministically: files before directories, each group
//! case-insensitive lexicographic. Symlinks are classified but never
//! descended into.

use globset::{Glob, GlobSetBuilder, GlobSet};
use std::path::{Path, PathBuf};

use crate::statadapter::{classify, ItemKind};
use crate::{JozinError, Result};

#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    pub names: std::collections::HashSet<String>,
    pub globs: Vec<String>,
}

impl ExcludeSet {
    fn compiled(&self) -> Result<Option<GlobSet>> {
        if self.globs.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.globs {
            let glob = Glob::new(&pattern.to_lowercase()).map_err(|e| JozinError::ConfigError {
                message: format!("invalid exclusion glob '{}': {}", pattern, e),
            })?;
            builder.add(glob);
        }
        builder
            .build()
            .map(Some)
            .map_err(|e| JozinError::ConfigError {
                message: format!("failed to build exclusion glob set: {}", e),
            })
    }

    fn matches_name(&self, globset: &Option<GlobSet>, name: &str) -> bool {
        if self.names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return true;
        }
        if let Some(gs) = globset {
            return gs.is_match(name.to_lowercase());
        }
        false
    }
}

/// Default names excluded from every traversal, matching common OS/VCS
/// housekeeping directories.
pub fn default_excluded_names() -> std::collections::HashSet<String> {
    [
        "$RECYCLE.BIN",
        "System Volume Information",
        ".DS_Store",
        ".Spotlight-V100",
        ".git",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn default_excluded_globs() -> Vec<String> {
    vec![".Trash-*".to_string()]
}

/// Lists the immediate children of `dir`, classified and filtered, sorted
/// files-first then directories, each group case-insensitive lexicographic
/// (testable property 4).
pub fn list_directory(dir: &Path, excludes: &ExcludeSet) -> Result<Vec<ListedEntry>> {
    let globset = excludes.compiled()?;

    let read_dir = std::fs::read_dir(dir).map_err(|e| JozinError::IoError {
        message: format!("{}: {}", dir.display(), e),
    })?;

    let mut entries = Vec::new();
    for item in read_dir {
        let item = match item {
            Ok(e) => e,
            Err(_) => continue, // a single unreadable entry never aborts the directory
        };
        let name = item.file_name().to_string_lossy().to_string();
        if excludes.matches_name(&globset, &name) {
            continue;
        }
        let path = item.path();
        let kind = match classify(&path) {
            Ok(k) => k,
            Err(_) => continue,
        };
        entries.push(ListedEntry { path, name, kind });
    }

    entries.sort_by(|a, b| {
        let a_is_dir = matches!(a.kind, ItemKind::Directory);
        let b_is_dir = matches!(b.kind, ItemKind::Directory);
        match a_is_dir.cmp(&b_is_dir) {
            std::cmp::Ordering::Equal => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            other => other,
        }
    });

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sorts_files_before_directories_case_insensitive() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Zdir")).unwrap();
        std::fs::create_dir(dir.path().join("adir")).unwrap();
        std::fs::write(dir.path().join("Bfile.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("afile.txt"), b"x").unwrap();

        let entries = list_directory(dir.path(), &ExcludeSet::default()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["afile.txt", "Bfile.txt", "adir", "Zdir"]);
    }

    #[test]
    fn excludes_configured_names_case_insensitively() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        let mut excludes = ExcludeSet::default();
        excludes.names = default_excluded_names();
        let entries = list_directory(dir.path(), &excludes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "keep.txt");
    }

    #[test]
    fn excludes_configured_globs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".Trash-1000")).unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        let excludes = ExcludeSet {
            names: std::collections::HashSet::new(),
            globs: default_excluded_globs(),
        };
        let entries = list_directory(dir.path(), &excludes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "keep.txt");
    }
}
