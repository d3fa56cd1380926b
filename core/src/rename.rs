//! Rename/dedup engine (C9) - groups files within a single directory by
//! content hash, designates one "canonical" member per group, and renames
//! every member to a content-derived storage name. Duplicate members beyond
//! the canonical one are flagged for dedup-cleanup deletion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::hash::IdAlgorithm;
use crate::pathutil::build_storage_path;
use crate::{JozinError, Result};

#[derive(Debug, Clone)]
pub struct RenameCandidate {
    pub path: PathBuf,
    /// Forward-slash path relative to the indexed root - the key used to
    /// locate this candidate's `IndexEntry` in the tree once grouping has
    /// run (spec §4.9: dedup walks the *whole* tree, not one directory).
    pub relative_path: String,
    pub original_name: String,
    pub content_id: String,
    pub extension: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RenamePlan {
    pub canonical: PathBuf,
    pub canonical_relative: String,
    pub canonical_storage_name: String,
    /// Paths renamed to the same canonical storage name, then queued for
    /// dedup-cleanup deletion once the merge stage has recorded them as
    /// duplicates on the canonical entry.
    pub duplicates: Vec<PathBuf>,
    pub duplicate_relatives: Vec<String>,
}

/// Derives the content-addressed storage name: `<content_id><.ext>`, using
/// whichever `id_algorithm` digest was selected for the entry's `id`.
pub fn storage_name(content_id: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", content_id, ext),
        _ => content_id.to_string(),
    }
}

/// Groups `candidates` by content id, across the *entire* tree (spec §4.9:
/// the dedup pass "walks the tree" and runs "after full tree
/// construction", so two files in unrelated subdirectories with identical
/// content must land in the same group). Each group's first member
/// (deterministically, by original name) becomes canonical; the rest are
/// duplicates of it.
pub fn group_by_content(candidates: Vec<RenameCandidate>) -> Vec<RenamePlan> {
    let mut groups: HashMap<String, Vec<RenameCandidate>> = HashMap::new();
    for c in candidates {
        groups.entry(c.content_id.clone()).or_default().push(c);
    }

    let mut plans = Vec::with_capacity(groups.len());
    for (_, mut members) in groups {
        members.sort_by(|a, b| a.original_name.cmp(&b.original_name));
        let canonical = members.remove(0);
        let storage = storage_name(&canonical.content_id, canonical.extension.as_deref());
        plans.push(RenamePlan {
            canonical: canonical.path,
            canonical_relative: canonical.relative_path,
            canonical_storage_name: storage,
            duplicates: members.iter().map(|m| m.path.clone()).collect(),
            duplicate_relatives: members.into_iter().map(|m| m.relative_path).collect(),
        });
    }
    plans
}

/// Renames `from` to the storage-derived target path, colliding safely:
/// if the target already exists and is not `from` itself, the rename is
/// skipped (the existing file already carries that content hash and is
/// assumed identical - same `id` implies same bytes). `dry_run` computes
/// the target without touching the filesystem.
pub fn apply_rename(from: &Path, storage_name: &str, dry_run: bool) -> Result<PathBuf> {
    let target = build_storage_path(from, storage_name);
    if target == from {
        return Ok(target);
    }
    if dry_run {
        return Ok(target);
    }
    if target.exists() {
        return Err(JozinError::ValidationError {
            message: format!(
                "rename target already exists: {} (collision while renaming {})",
                target.display(),
                from.display()
            ),
        });
    }
    std::fs::rename(from, &target).map_err(|e| JozinError::IoError {
        message: format!("rename {} -> {}: {}", from.display(), target.display(), e),
    })?;
    Ok(target)
}

/// Maps a renamed file's id_algorithm id to its two-component storage name,
/// honoring the `id_algorithm` already chosen for the entry.
pub fn storage_name_for(content_id: &str, extension: Option<&str>, _algo: IdAlgorithm) -> String {
    storage_name(content_id, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn storage_name_includes_extension() {
        assert_eq!(storage_name("ABCDEF", Some("jpg")), "ABCDEF.jpg");
        assert_eq!(storage_name("ABCDEF", None), "ABCDEF");
    }

    #[test]
    fn group_by_content_picks_first_original_name_as_canonical() {
        let candidates = vec![
            RenameCandidate {
                path: PathBuf::from("/a/zzz.jpg"),
                relative_path: "zzz.jpg".to_string(),
                original_name: "zzz.jpg".to_string(),
                content_id: "HASH1".to_string(),
                extension: Some("jpg".to_string()),
            },
            RenameCandidate {
                path: PathBuf::from("/a/aaa.jpg"),
                relative_path: "aaa.jpg".to_string(),
                original_name: "aaa.jpg".to_string(),
                content_id: "HASH1".to_string(),
                extension: Some("jpg".to_string()),
            },
        ];
        let plans = group_by_content(candidates);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].canonical, PathBuf::from("/a/aaa.jpg"));
        assert_eq!(plans[0].duplicates, vec![PathBuf::from("/a/zzz.jpg")]);
        assert_eq!(plans[0].duplicate_relatives, vec!["zzz.jpg".to_string()]);
    }

    #[test]
    fn distinct_content_ids_form_distinct_groups() {
        let candidates = vec![
            RenameCandidate {
                path: PathBuf::from("/a/a.jpg"),
                relative_path: "a.jpg".to_string(),
                original_name: "a.jpg".to_string(),
                content_id: "HASH1".to_string(),
                extension: Some("jpg".to_string()),
            },
            RenameCandidate {
                path: PathBuf::from("/a/b.jpg"),
                relative_path: "b.jpg".to_string(),
                original_name: "b.jpg".to_string(),
                content_id: "HASH2".to_string(),
                extension: Some("jpg".to_string()),
            },
        ];
        let plans = group_by_content(candidates);
        assert_eq!(plans.len(), 2);
    }

    #[test]
    fn group_by_content_dedups_across_different_subdirectories() {
        let candidates = vec![
            RenameCandidate {
                path: PathBuf::from("/root/sub1/a.jpg"),
                relative_path: "sub1/a.jpg".to_string(),
                original_name: "a.jpg".to_string(),
                content_id: "HASH1".to_string(),
                extension: Some("jpg".to_string()),
            },
            RenameCandidate {
                path: PathBuf::from("/root/sub2/b.jpg"),
                relative_path: "sub2/b.jpg".to_string(),
                original_name: "b.jpg".to_string(),
                content_id: "HASH1".to_string(),
                extension: Some("jpg".to_string()),
            },
        ];
        let plans = group_by_content(candidates);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].duplicate_relatives.len(), 1);
    }

    #[test]
    fn apply_rename_is_noop_when_already_at_target() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ABCDEF.jpg");
        std::fs::write(&file, b"x").unwrap();
        let result = apply_rename(&file, "ABCDEF.jpg", false).unwrap();
        assert_eq!(result, file);
    }

    #[test]
    fn apply_rename_dry_run_does_not_touch_filesystem() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("original.jpg");
        std::fs::write(&file, b"x").unwrap();
        let target = apply_rename(&file, "ABCDEF.jpg", true).unwrap();
        assert_eq!(target, dir.path().join("ABCDEF.jpg"));
        assert!(file.exists());
        assert!(!target.exists());
    }

    #[test]
    fn apply_rename_moves_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("original.jpg");
        std::fs::write(&file, b"x").unwrap();
        let target = apply_rename(&file, "ABCDEF.jpg", false).unwrap();
        assert!(!file.exists());
        assert!(target.exists());
    }
}
