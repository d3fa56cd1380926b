//! Entry builder (C8) - the `IndexEntry`/`MetadataEntry` data model (spec
//! §3) and the functions that populate it from a listed filesystem item.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::hash::{self, HashAlgorithms, HashSet, IdAlgorithm};
use crate::statadapter::{self, ItemKind, StatData, TimePoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

/// A file or directory's name, always present and never null even when the
/// content-hash is unavailable (e.g. a denied file), unlike `hashes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameObject {
    pub original: String,
    pub storage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeInfo {
    pub bytes: u64,
    /// Decimal-SI human text, e.g. "4.2 MB" (never binary/KiB units).
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemInfo {
    pub path: String,
    pub parent: String,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampsInfo {
    pub created: TimePoint,
    pub modified: TimePoint,
    pub accessed: TimePoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributesInfo {
    pub hidden: bool,
    pub readonly: bool,
}

/// Where a `MetadataEntry`'s content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataOrigin {
    Sidecar,
    Exif,
}

/// How a `MetadataEntry.content` payload can be turned back into the
/// original bytes it was read from (spec §4.12 `sidecar_restore`):
/// `json` pretty-prints, `text` writes the string as-is, `base64` decodes,
/// `lines` joins with `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
    Json,
    Text,
    Base64,
    Lines,
}

/// Identifies the sidecar that contributed a parent-relative metadata
/// entry, or marks it orphaned when no sibling item claimed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarParent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Describes a `MetadataEntry`'s payload shape: what kind of metadata it
/// is, how to read `content` back into bytes, and (for EXIF) which media
/// type it was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataAttributes {
    #[serde(rename = "type")]
    pub kind: String,
    pub format: MetadataFormat,
    pub transforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_media_type: Option<String>,
}

/// Filesystem provenance for a sidecar-origin `MetadataEntry` - present
/// only when `origin == Sidecar`, since EXIF-origin metadata has no
/// backing file of its own to restore (spec §3: "for reversal").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataProvenance {
    pub file_system: FileSystemInfo,
    pub size: SizeInfo,
    pub timestamps: TimestampsInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub id: String,
    pub origin: MetadataOrigin,
    pub name: NameObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<HashSet>,
    pub attributes: MetadataAttributes,
    pub source_path: String,
    pub sidecar_type: String,
    pub parent: SidecarParent,
    pub content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<MetadataProvenance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub schema_version: u32,
    pub id: String,
    pub id_algorithm: IdAlgorithm,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub name: NameObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub size: SizeInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<HashSet>,
    pub file_system: FileSystemInfo,
    pub timestamps: TimestampsInfo,
    pub attributes: AttributesInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<IndexEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<MetadataEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub indexed_at: TimePoint,
}

/// Shared, read-only configuration threaded through every entry build,
/// avoiding a long parameter list on every builder call.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub schema_version: u32,
    pub id_algorithm: IdAlgorithm,
    pub hash_algorithms: HashAlgorithms,
    pub session_id: Option<String>,
    pub indexed_at: TimePoint,
}

/// Formats `bytes` as decimal-SI text (1000-based, not 1024), e.g.
/// `1500000` -> `"1.5 MB"`. Spec §3 requires SI, not binary, units.
pub fn format_size_si(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit_index = 0;
    while value >= 1000.0 && unit_index < UNITS.len() - 1 {
        value /= 1000.0;
        unit_index += 1;
    }
    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit_index])
    }
}

fn attributes_from_stat(name: &str, stat: &StatData) -> AttributesInfo {
    let hidden = name.starts_with('.');
    AttributesInfo { hidden, readonly: stat.readonly }
}

/// Builds a file `IndexEntry`: computes the content hash set, derives the
/// `id` from whichever algorithm is configured as `id_algorithm`, and fills
/// in every structural field. `storage_name` is the post-rename name when
/// the rename/dedup stage has already run, otherwise equal to `original`.
///
/// Never fails: a denied or vanished file degrades rather than aborting
/// the run (spec §4.8's degradation rule, §7's per-item boundary) - a
/// failed `lstat` falls back to a zeroed `StatData`, a failed read leaves
/// `hashes` null. The returned `bool` is `true` when either happened, so
/// the caller can fold it into the run's overall `PartialFailure` status.
pub fn build_file_entry(
    ctx: &BuildContext,
    path: &Path,
    original_name: &str,
    storage_name: &str,
    relative_path: &str,
    parent_relative: &str,
    kind: ItemKind,
    extension: Option<String>,
) -> (IndexEntry, bool) {
    let is_symlink = kind == ItemKind::Symlink;

    let (stat, stat_degraded) = match statadapter::read_stat(path) {
        Ok(s) => (s, false),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to stat item, degrading entry");
            (statadapter::degraded_stat(), true)
        }
    };

    // A symlink's own name, not its target's bytes, is what identifies it
    // (invariant I3): hashing the name never touches the filesystem, so it
    // can't fail the way reading a regular file's content can.
    let (hashes, hash_degraded) = if is_symlink {
        (Some(hash::hash_name(original_name, ctx.hash_algorithms)), false)
    } else {
        match hash::hash_file(path, ctx.hash_algorithms) {
            Ok(h) => (Some(h), false),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to hash item, degrading entry");
                (None, true)
            }
        }
    };

    let id = match (&hashes, ctx.id_algorithm) {
        (Some(h), IdAlgorithm::Md5) => h.md5.clone(),
        (Some(h), IdAlgorithm::Sha256) => h.sha256.clone(),
        (None, algo) => hash::digest_name_single(original_name, algo),
    };

    let entry = IndexEntry {
        schema_version: ctx.schema_version,
        id,
        id_algorithm: ctx.id_algorithm,
        entry_type: EntryType::File,
        name: NameObject {
            original: original_name.to_string(),
            storage: storage_name.to_string(),
        },
        extension,
        size: SizeInfo {
            bytes: stat.size,
            text: format_size_si(stat.size),
        },
        hashes,
        file_system: FileSystemInfo {
            path: relative_path.to_string(),
            parent: parent_relative.to_string(),
            is_symlink,
        },
        timestamps: TimestampsInfo {
            created: stat.created,
            modified: stat.modified,
            accessed: stat.accessed,
        },
        attributes: attributes_from_stat(original_name, &stat),
        items: None,
        metadata: None,
        mime_type: None,
        duplicates: None,
        session_id: ctx.session_id.clone(),
        indexed_at: ctx.indexed_at.clone(),
    };
    (entry, stat_degraded || hash_degraded)
}

/// Builds a directory `IndexEntry`. `items` holds the already-built children
/// (possibly empty when traversal is non-recursive: the subdirectory is
/// still identified and stat'd, just not descended into). Directory names
/// have no `extension`, and directory `id` always derives from the
/// two-layer name hash, never file content (invariant I7/I8).
///
/// Like `build_file_entry`, never fails: a failed `lstat` degrades to a
/// zeroed `StatData` rather than aborting. The returned `bool` flags this.
pub fn build_directory_entry(
    ctx: &BuildContext,
    path: &Path,
    original_name: &str,
    relative_path: &str,
    parent_relative: &str,
    parent_name_for_hash: Option<&str>,
    items: Vec<IndexEntry>,
) -> (IndexEntry, bool) {
    let (stat, degraded) = match statadapter::read_stat(path) {
        Ok(s) => (s, false),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to stat directory, degrading entry");
            (statadapter::degraded_stat(), true)
        }
    };
    let id = compute_directory_id(original_name, parent_name_for_hash, ctx.id_algorithm);

    let entry = IndexEntry {
        schema_version: ctx.schema_version,
        id,
        id_algorithm: ctx.id_algorithm,
        entry_type: EntryType::Directory,
        name: NameObject {
            original: original_name.to_string(),
            storage: original_name.to_string(),
        },
        extension: None,
        size: SizeInfo {
            bytes: 0,
            text: format_size_si(0),
        },
        hashes: None,
        file_system: FileSystemInfo {
            path: relative_path.to_string(),
            parent: parent_relative.to_string(),
            is_symlink: false,
        },
        timestamps: TimestampsInfo {
            created: stat.created,
            modified: stat.modified,
            accessed: stat.accessed,
        },
        attributes: attributes_from_stat(original_name, &stat),
        items: Some(items),
        metadata: None,
        mime_type: None,
        duplicates: None,
        session_id: ctx.session_id.clone(),
        indexed_at: ctx.indexed_at.clone(),
    };
    (entry, degraded)
}

/// A directory's `id` is `hash(hash(name) + hash(parent_name))`: the
/// two-layer identity hash (spec §3 invariant I8). The root directory has
/// no parent name, so its inner hash uses the empty-string digest.
pub fn compute_directory_id(name: &str, parent_name: Option<&str>, algo: IdAlgorithm) -> String {
    let name_digest = hash::digest_name_single(name, algo);
    let parent_digest = match parent_name {
        Some(p) => hash::digest_name_single(p, algo),
        None => hash::digest_bytes_single(&[], algo),
    };
    let combined = format!("{}{}", name_digest, parent_digest);
    hash::digest_bytes_single(combined.as_bytes(), algo)
}
