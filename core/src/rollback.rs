//! Rollback engine (C12) - reconstructs a prior indexing run from whatever
//! it emitted (an aggregate file, or in-place sidecars scattered through
//! the tree) and reverses a rename+merge+delete run: renamed files are
//! restored to their original names, absorbed duplicates are recreated
//! from the canonical file's bytes, and deleted sidecars are reconstructed
//! from the metadata they left behind.
//!
//! Two restore modes mirror the two output modes: `Structured` walks a
//! single aggregate `IndexEntry` tree; `Flat` walks the filesystem looking
//! for in-place sidecars directly. Both converge on the same `RollbackPlan`
//! so `execute` never needs to know which mode produced it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::entry::{EntryType, IndexEntry, MetadataFormat, MetadataOrigin};
use crate::hash::{hash_file, HashAlgorithms, IdAlgorithm};
use crate::pathutil;
use crate::statadapter::TimePoint;
use crate::{JozinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Structured,
    Flat,
}

#[derive(Debug, Clone)]
pub struct RollbackAction {
    pub current_path: PathBuf,
    pub original_name: String,
    pub expected_id: String,
    pub id_algorithm: IdAlgorithm,
    pub modified: TimePoint,
    pub accessed: TimePoint,
}

/// Recreates an absorbed duplicate by copying bytes from the single
/// canonical content file the dedup pass kept (spec §4.9/§4.12).
#[derive(Debug, Clone)]
pub struct DuplicateRestoreAction {
    pub canonical_current_path: PathBuf,
    pub target_relative: String,
}

/// Reconstructs a sidecar file the merge/delete stage consumed, decoding
/// `content` back into bytes according to `format` (spec §4.12).
#[derive(Debug, Clone)]
pub struct SidecarRestoreAction {
    pub target_relative: String,
    pub format: MetadataFormat,
    pub content: serde_json::Value,
    pub modified: Option<TimePoint>,
    pub accessed: Option<TimePoint>,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackPlan {
    pub actions: Vec<RollbackAction>,
    pub duplicate_restores: Vec<DuplicateRestoreAction>,
    pub sidecar_restores: Vec<SidecarRestoreAction>,
    /// Sessions other than the one being rolled back that were also
    /// observed in the tree - an advisory signal that more than one
    /// indexing run touched this directory since the last rollback.
    pub mixed_sessions: HashSet<String>,
}

/// Supplies the bytes of a previously-emitted index document. Structured
/// mode reads one aggregate file; flat mode reads many in-place sidecars.
/// Pluggable so callers can load from disk, from an in-memory buffer (tests),
/// or from anywhere else `IndexEntry` JSON can come from.
pub trait SourceResolver {
    fn aggregate(&self, path: &Path) -> Result<IndexEntry>;
    fn sidecar(&self, path: &Path) -> Result<IndexEntry>;
}

pub struct FilesystemResolver;

impl SourceResolver for FilesystemResolver {
    fn aggregate(&self, path: &Path) -> Result<IndexEntry> {
        let raw = std::fs::read_to_string(path).map_err(|e| JozinError::IoError {
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn sidecar(&self, path: &Path) -> Result<IndexEntry> {
        self.aggregate(path)
    }
}

/// Loads a prior run's root entry from `source`, either an aggregate file
/// path (`Structured`) or a root directory to walk for in-place sidecars
/// (`Flat`).
pub fn load(resolver: &dyn SourceResolver, source: &Path, mode: RestoreMode) -> Result<IndexEntry> {
    match mode {
        RestoreMode::Structured => resolver.aggregate(source),
        RestoreMode::Flat => {
            let sidecar_path = pathutil::build_sidecar_path(source, true);
            resolver.sidecar(&sidecar_path)
        }
    }
}

/// Walks `root_entry` and builds the full list of actions needed to undo a
/// rename+merge+delete run (spec §4.12): a `restore` for every renamed
/// file, a `duplicate_restore` for every absorbed duplicate, and a
/// `sidecar_restore` for every sidecar the merge/delete stage consumed.
/// Also records every distinct `session_id` seen, so `execute`'s caller can
/// warn when a later, unrelated session already touched the same tree.
pub fn plan(root_entry: &IndexEntry, target_session: Option<&str>) -> RollbackPlan {
    let mut plan = RollbackPlan::default();
    collect(root_entry, Path::new(""), target_session, &mut plan);
    plan
}

fn collect(entry: &IndexEntry, parent_dir: &Path, target_session: Option<&str>, plan: &mut RollbackPlan) {
    if let Some(session) = &entry.session_id {
        if target_session.map(|t| t != session).unwrap_or(false) {
            plan.mixed_sessions.insert(session.clone());
        }
    }

    if entry.entry_type == EntryType::File && entry.name.storage != entry.name.original {
        let current_path = parent_dir.join(&entry.name.storage);
        plan.actions.push(RollbackAction {
            current_path,
            original_name: entry.name.original.clone(),
            expected_id: entry.id.clone(),
            id_algorithm: entry.id_algorithm,
            modified: entry.timestamps.modified.clone(),
            accessed: entry.timestamps.accessed.clone(),
        });
    }

    if let Some(duplicates) = &entry.duplicates {
        let canonical_current_path = parent_dir.join(&entry.name.storage);
        for duplicate_relative in duplicates {
            plan.duplicate_restores.push(DuplicateRestoreAction {
                canonical_current_path: canonical_current_path.clone(),
                target_relative: duplicate_relative.clone(),
            });
        }
    }

    if let Some(metadata) = &entry.metadata {
        for meta in metadata {
            if meta.origin == MetadataOrigin::Sidecar {
                plan.sidecar_restores.push(SidecarRestoreAction {
                    target_relative: meta.source_path.clone(),
                    format: meta.attributes.format,
                    content: meta.content.clone(),
                    modified: meta.provenance.as_ref().map(|p| p.timestamps.modified.clone()),
                    accessed: meta.provenance.as_ref().map(|p| p.timestamps.accessed.clone()),
                });
            }
        }
    }

    if let Some(items) = &entry.items {
        let this_dir = parent_dir.join(&entry.name.storage);
        for child in items {
            collect(child, &this_dir, target_session, plan);
        }
    }
}

/// Executes `plan` against `root`: renames every file in `plan.actions`
/// back to its original name, recreates every absorbed duplicate from its
/// canonical file's bytes, and reconstructs every consumed sidecar from
/// its recorded content. Every rename action is independently verified and
/// guarded:
///
/// - content hash must still match `expected_id` (skip on mismatch - the
///   file was modified since indexing, restoring the name would mislabel it)
/// - the resolved target must stay within `root` (guards against a
///   maliciously crafted `original_name` containing `..` components)
/// - an existing file at the target name blocks the restore rather than
///   silently overwriting
///
/// Restored and reconstructed files have their mtime/atime set from the
/// sidecar-recorded timestamps via the platform's `utime` equivalent;
/// creation time is not touched, since neither this crate's dependency on
/// `filetime` nor any of the platforms it targets exposes a portable way
/// to set it.
pub fn execute(root: &Path, plan: &RollbackPlan, hash_algorithms: HashAlgorithms) -> Result<RollbackReport> {
    let mut report = RollbackReport::default();

    for action in &plan.actions {
        let absolute_current = root.join(&action.current_path);
        if !absolute_current.exists() {
            report.skipped.push(action.current_path.clone());
            continue;
        }

        match verify_content(&absolute_current, &action.expected_id, action.id_algorithm, hash_algorithms) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(path = %absolute_current.display(), "content changed since indexing, skipping rollback");
                report.skipped.push(action.current_path.clone());
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %absolute_current.display(), error = %e, "failed to verify content before rollback");
                report.skipped.push(action.current_path.clone());
                continue;
            }
        }

        let target = match guarded_target(root, &absolute_current, &action.original_name) {
            Some(t) => t,
            None => {
                tracing::warn!(name = %action.original_name, "rejected rollback target outside root");
                report.skipped.push(action.current_path.clone());
                continue;
            }
        };

        if target.exists() {
            report.conflicted.push(action.current_path.clone());
            continue;
        }

        match std::fs::rename(&absolute_current, &target) {
            Ok(()) => {
                apply_times(&target, &action.modified, &action.accessed);
                report.restored.push(action.original_name.clone());
            }
            Err(e) => {
                tracing::warn!(path = %absolute_current.display(), error = %e, "rollback rename failed");
                report.skipped.push(action.current_path.clone());
            }
        }
    }

    for dup in &plan.duplicate_restores {
        let source = root.join(&dup.canonical_current_path);
        let target = root.join(&dup.target_relative);
        if !source.exists() {
            report.skipped.push(dup.target_relative.clone().into());
            continue;
        }
        if target.exists() {
            report.conflicted.push(dup.target_relative.clone().into());
            continue;
        }
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::copy(&source, &target) {
            Ok(_) => report.restored.push(dup.target_relative.clone()),
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "duplicate restore failed");
                report.skipped.push(dup.target_relative.clone().into());
            }
        }
    }

    for sidecar in &plan.sidecar_restores {
        let target = root.join(&sidecar.target_relative);
        if target.exists() {
            report.conflicted.push(sidecar.target_relative.clone().into());
            continue;
        }
        let bytes = match decode_sidecar_content(&sidecar.content, sidecar.format) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "failed to decode sidecar content for restore");
                report.skipped.push(sidecar.target_relative.clone().into());
                continue;
            }
        };
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::write(&target, &bytes) {
            Ok(()) => {
                if let (Some(modified), Some(accessed)) = (&sidecar.modified, &sidecar.accessed) {
                    apply_times(&target, modified, accessed);
                }
                report.restored.push(sidecar.target_relative.clone());
            }
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "sidecar restore failed");
                report.skipped.push(sidecar.target_relative.clone().into());
            }
        }
    }

    Ok(report)
}

/// Turns a `MetadataEntry.content` value back into the bytes it was
/// originally read from, per `format` (spec §4.12 `sidecar_restore`).
fn decode_sidecar_content(content: &serde_json::Value, format: MetadataFormat) -> Result<Vec<u8>> {
    match format {
        MetadataFormat::Json => Ok(serde_json::to_vec_pretty(content)?),
        MetadataFormat::Text => match content.as_str() {
            Some(s) => Ok(s.as_bytes().to_vec()),
            None => Err(JozinError::ValidationError {
                message: "sidecar content is not a text string".to_string(),
            }),
        },
        MetadataFormat::Base64 => {
            use base64::Engine;
            let encoded = content.as_str().ok_or_else(|| JozinError::ValidationError {
                message: "sidecar content is not a base64 string".to_string(),
            })?;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| JozinError::ValidationError {
                    message: format!("invalid base64 sidecar content: {}", e),
                })
        }
        MetadataFormat::Lines => {
            let lines = content.as_array().ok_or_else(|| JozinError::ValidationError {
                message: "sidecar content is not a line array".to_string(),
            })?;
            let joined = lines
                .iter()
                .map(|v| v.as_str().unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\n");
            Ok(joined.into_bytes())
        }
    }
}

/// Sets a restored file's mtime/atime from the recorded `TimePoint`s,
/// tolerating failure (a read-only filesystem, a platform quirk) since a
/// timestamp miss never invalidates the restore itself.
fn apply_times(path: &Path, modified: &TimePoint, accessed: &TimePoint) {
    let mtime = file_time_from_unix_millis(modified.unix);
    let atime = file_time_from_unix_millis(accessed.unix);
    if let Err(e) = filetime::set_file_times(path, atime, mtime) {
        tracing::warn!(path = %path.display(), error = %e, "failed to restore timestamps");
    }
}

fn file_time_from_unix_millis(unix_millis: i64) -> FileTime {
    let seconds = unix_millis.div_euclid(1000);
    let nanos = (unix_millis.rem_euclid(1000) * 1_000_000) as u32;
    FileTime::from_unix_time(seconds, nanos)
}

#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    pub restored: Vec<String>,
    pub skipped: Vec<PathBuf>,
    pub conflicted: Vec<PathBuf>,
}

fn verify_content(path: &Path, expected_id: &str, algo: IdAlgorithm, hash_algorithms: HashAlgorithms) -> Result<bool> {
    let hashes = hash_file(path, hash_algorithms)?;
    let actual = match algo {
        IdAlgorithm::Md5 => hashes.md5,
        IdAlgorithm::Sha256 => hashes.sha256,
    };
    Ok(actual == expected_id)
}

/// Resolves `original_name` against `current`'s parent directory, rejecting
/// any result that would escape `root` - a structured sidecar with a
/// tampered or corrupted `original_name` (e.g. containing `../..`) must
/// never be used to write outside the indexed tree.
fn guarded_target(root: &Path, current: &Path, original_name: &str) -> Option<PathBuf> {
    if original_name.contains('/') || original_name.contains('\\') || original_name == ".." {
        return None;
    }
    let parent = current.parent()?;
    let target = parent.join(original_name);
    let root_resolved = pathutil::resolve(root);
    let parent_resolved = pathutil::resolve(parent);
    if parent_resolved != root_resolved && !parent_resolved.starts_with(&root_resolved) {
        return None;
    }
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{
        AttributesInfo, FileSystemInfo, MetadataAttributes, MetadataEntry, NameObject, SidecarParent, SizeInfo,
    };
    use tempfile::tempdir;

    fn time_point() -> TimePoint {
        TimePoint { iso: "2026-01-01T00:00:00Z".to_string(), unix: 0 }
    }

    fn file_entry(original: &str, storage: &str, id: &str) -> IndexEntry {
        IndexEntry {
            schema_version: 1,
            id: id.to_string(),
            id_algorithm: IdAlgorithm::Sha256,
            entry_type: EntryType::File,
            name: NameObject { original: original.to_string(), storage: storage.to_string() },
            extension: None,
            size: SizeInfo { bytes: 0, text: "0 B".to_string() },
            hashes: None,
            file_system: FileSystemInfo { path: storage.to_string(), parent: String::new(), is_symlink: false },
            timestamps: crate::entry::TimestampsInfo { created: time_point(), modified: time_point(), accessed: time_point() },
            attributes: AttributesInfo { hidden: false, readonly: false },
            items: None,
            metadata: None,
            mime_type: None,
            duplicates: None,
            session_id: Some("session-a".to_string()),
            indexed_at: time_point(),
        }
    }

    #[test]
    fn plan_collects_only_renamed_files() {
        let root = IndexEntry {
            items: Some(vec![
                file_entry("a.jpg", "HASH1.jpg", "HASH1"),
                file_entry("b.jpg", "b.jpg", "HASH2"),
            ]),
            ..file_entry("root", "root", "ROOTID")
        };
        let plan = plan(&root, None);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].original_name, "a.jpg");
    }

    #[test]
    fn plan_collects_duplicate_restores() {
        let mut canonical = file_entry("a.jpg", "HASH1.jpg", "HASH1");
        canonical.duplicates = Some(vec!["sub/b.jpg".to_string()]);
        let root = IndexEntry { items: Some(vec![canonical]), ..file_entry("root", "root", "ROOTID") };
        let plan = plan(&root, None);
        assert_eq!(plan.duplicate_restores.len(), 1);
        assert_eq!(plan.duplicate_restores[0].target_relative, "sub/b.jpg");
        assert_eq!(plan.duplicate_restores[0].canonical_current_path, PathBuf::from("HASH1.jpg"));
    }

    #[test]
    fn plan_collects_sidecar_restores_for_sidecar_origin_only() {
        let mut item = file_entry("a.jpg", "a.jpg", "HASH1");
        item.metadata = Some(vec![MetadataEntry {
            id: "META1".to_string(),
            origin: MetadataOrigin::Sidecar,
            name: NameObject { original: "a.jpg_meta2.json".to_string(), storage: "a.jpg_meta2.json".to_string() },
            hashes: None,
            attributes: MetadataAttributes {
                kind: "sidecar".to_string(),
                format: MetadataFormat::Json,
                transforms: Vec::new(),
                source_media_type: None,
            },
            source_path: "a.jpg_meta2.json".to_string(),
            sidecar_type: "json_metadata".to_string(),
            parent: SidecarParent { kind: "item".to_string(), name: Some("a.jpg".to_string()) },
            content: serde_json::json!({"k": "v"}),
            provenance: None,
        }]);
        let root = IndexEntry { items: Some(vec![item]), ..file_entry("root", "root", "ROOTID") };
        let plan = plan(&root, None);
        assert_eq!(plan.sidecar_restores.len(), 1);
        assert_eq!(plan.sidecar_restores[0].target_relative, "a.jpg_meta2.json");
    }

    #[test]
    fn execute_restores_original_name_when_content_matches() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("HASH1.jpg"), b"hello").unwrap();
        let hashes = hash_file(&dir.path().join("HASH1.jpg"), HashAlgorithms::default()).unwrap();

        let action = RollbackAction {
            current_path: PathBuf::from("HASH1.jpg"),
            original_name: "a.jpg".to_string(),
            expected_id: hashes.sha256.clone(),
            id_algorithm: IdAlgorithm::Sha256,
            modified: time_point(),
            accessed: time_point(),
        };
        let plan = RollbackPlan { actions: vec![action], ..RollbackPlan::default() };
        let report = execute(dir.path(), &plan, HashAlgorithms::default()).unwrap();
        assert_eq!(report.restored, vec!["a.jpg".to_string()]);
        assert!(dir.path().join("a.jpg").exists());
    }

    #[test]
    fn execute_skips_when_content_hash_mismatches() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("HASH1.jpg"), b"changed").unwrap();
        let action = RollbackAction {
            current_path: PathBuf::from("HASH1.jpg"),
            original_name: "a.jpg".to_string(),
            expected_id: "DOES-NOT-MATCH".to_string(),
            id_algorithm: IdAlgorithm::Sha256,
            modified: time_point(),
            accessed: time_point(),
        };
        let plan = RollbackPlan { actions: vec![action], ..RollbackPlan::default() };
        let report = execute(dir.path(), &plan, HashAlgorithms::default()).unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn execute_recreates_duplicate_from_canonical_bytes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("HASH1.jpg"), b"hello").unwrap();
        let plan = RollbackPlan {
            duplicate_restores: vec![DuplicateRestoreAction {
                canonical_current_path: PathBuf::from("HASH1.jpg"),
                target_relative: "sub/b.jpg".to_string(),
            }],
            ..RollbackPlan::default()
        };
        let report = execute(dir.path(), &plan, HashAlgorithms::default()).unwrap();
        assert_eq!(report.restored, vec!["sub/b.jpg".to_string()]);
        assert_eq!(std::fs::read(dir.path().join("sub/b.jpg")).unwrap(), b"hello");
    }

    #[test]
    fn execute_reconstructs_json_sidecar_from_content() {
        let dir = tempdir().unwrap();
        let plan = RollbackPlan {
            sidecar_restores: vec![SidecarRestoreAction {
                target_relative: "a.jpg_meta2.json".to_string(),
                format: MetadataFormat::Json,
                content: serde_json::json!({"k": "v"}),
                modified: None,
                accessed: None,
            }],
            ..RollbackPlan::default()
        };
        let report = execute(dir.path(), &plan, HashAlgorithms::default()).unwrap();
        assert_eq!(report.restored, vec!["a.jpg_meta2.json".to_string()]);
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("a.jpg_meta2.json")).unwrap()).unwrap();
        assert_eq!(written, serde_json::json!({"k": "v"}));
    }

    #[test]
    fn guarded_target_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let current = dir.path().join("HASH1.jpg");
        std::fs::write(&current, b"x").unwrap();
        assert!(guarded_target(dir.path(), &current, "../../etc/passwd").is_none());
        assert!(guarded_target(dir.path(), &current, "a.jpg").is_some());
    }
}
