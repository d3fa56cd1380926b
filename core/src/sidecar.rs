//! Sidecar classifier/reader (C5) - identifies "sidecar" files (files that
//! describe another file or directory rather than content of their own),
//! resolves them to a parent item, and reads their content into a
//! `MetadataEntry`.
//!
//! Classification is ordered: the first pattern that matches wins, so more
//! specific patterns (e.g. `hash`) are listed ahead of generic catch-alls
//! (`generic_metadata`).

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::entry::{
    BuildContext, FileSystemInfo, MetadataAttributes, MetadataEntry, MetadataFormat,
    MetadataOrigin, MetadataProvenance, NameObject, SidecarParent, SizeInfo, TimestampsInfo,
};
use crate::extension::ExtensionGroup;
use crate::hash::{self, IdAlgorithm};
use crate::pathutil;
use crate::statadapter;
use crate::{JozinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidecarKind {
    Description,
    DesktopIni,
    GenericMetadata,
    Hash,
    JsonMetadata,
    Link,
    Screenshot,
    Subtitles,
    Thumbnail,
    Torrent,
}

impl SidecarKind {
    fn as_str(self) -> &'static str {
        match self {
            SidecarKind::Description => "description",
            SidecarKind::DesktopIni => "desktop_ini",
            SidecarKind::GenericMetadata => "generic_metadata",
            SidecarKind::Hash => "hash",
            SidecarKind::JsonMetadata => "json_metadata",
            SidecarKind::Link => "link",
            SidecarKind::Screenshot => "screenshot",
            SidecarKind::Subtitles => "subtitles",
            SidecarKind::Thumbnail => "thumbnail",
            SidecarKind::Torrent => "torrent",
        }
    }
}

struct Pattern {
    kind: SidecarKind,
    regex: Regex,
}

/// A compiled, ordered list of sidecar-type patterns. Built once and shared
/// read-only for the duration of an invocation.
pub struct SidecarClassifier {
    patterns: Vec<Pattern>,
}

impl SidecarClassifier {
    pub fn new() -> Result<Self> {
        let specs: &[(SidecarKind, &str)] = &[
            (SidecarKind::Hash, r"(?i)^.+\.(md5|sha1|sha256|sha512)$"),
            (SidecarKind::Torrent, r"(?i)^.+\.torrent$"),
            (SidecarKind::DesktopIni, r"(?i)^desktop\.ini$"),
            (SidecarKind::Link, r"(?i)^.+\.(url|lnk|webloc)$"),
            (SidecarKind::Subtitles, r"(?i)^.+\.(srt|vtt|ass|ssa|sub)$"),
            (SidecarKind::Thumbnail, r"(?i)^\._?.+_(thumb|thumbnail)\.(jpg|jpeg|png)$"),
            (SidecarKind::Screenshot, r"(?i)^.+_screenshot(_\d+)?\.(jpg|jpeg|png)$"),
            (SidecarKind::Description, r"(?i)^.+\.(nfo|txt)$"),
            (SidecarKind::JsonMetadata, r"(?i)^.+_meta2?\.json$"),
            (SidecarKind::GenericMetadata, r"(?i)^.+\.(xml|yaml|yml)$"),
        ];
        let mut patterns = Vec::with_capacity(specs.len());
        for (kind, pattern) in specs {
            let regex = Regex::new(pattern).map_err(|e| JozinError::ConfigError {
                message: format!("invalid sidecar pattern for {}: {}", kind.as_str(), e),
            })?;
            patterns.push(Pattern { kind: *kind, regex });
        }
        Ok(SidecarClassifier { patterns })
    }

    /// Returns the first matching sidecar kind for `name`, in pattern order.
    pub fn classify(&self, name: &str) -> Option<SidecarKind> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(name))
            .map(|p| p.kind)
    }
}

/// Strips a sidecar-specific suffix from `name`, returning the stem that is
/// expected to match a sibling item's name (stem or full name). Returns
/// `None` when the kind has no well-defined parent-name derivation (e.g. a
/// folder-level `desktop.ini`).
pub fn candidate_parent_stem(name: &str, kind: SidecarKind) -> Option<String> {
    match kind {
        SidecarKind::DesktopIni => None,
        SidecarKind::JsonMetadata => name
            .strip_suffix("_directorymeta2.json")
            .or_else(|| name.strip_suffix("_meta2.json"))
            .map(String::from),
        SidecarKind::Thumbnail => Some(
            Regex::new(r"(?i)_(thumb|thumbnail)\.(jpg|jpeg|png)$")
                .unwrap()
                .replace(name, "")
                .to_string(),
        ),
        SidecarKind::Screenshot => Some(
            Regex::new(r"(?i)_screenshot(_\d+)?\.(jpg|jpeg|png)$")
                .unwrap()
                .replace(name, "")
                .to_string(),
        ),
        _ => Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string()),
    }
}

/// Resolves a sidecar to its parent sibling by stem match, breaking ties
/// between multiple same-stem candidates by preferring a non-`Other`
/// extension group (an image or video over a stray text file, say).
pub fn resolve_parent(
    stem: &str,
    siblings: &[(String, Option<ExtensionGroup>)],
) -> Option<String> {
    let mut candidates: Vec<&(String, Option<ExtensionGroup>)> = siblings
        .iter()
        .filter(|(name, _)| {
            Path::new(name)
                .file_stem()
                .map(|s| s.eq_ignore_ascii_case(stem))
                .unwrap_or(false)
        })
        .collect();

    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by_key(|(_, group)| matches!(group, Some(ExtensionGroup::Other) | None));
    Some(candidates[0].0.clone())
}

/// Reads a sidecar's content according to its kind's expected format and
/// produces a `MetadataEntry`. `parent_name` is `None` for an orphaned
/// sidecar (no sibling claimed it).
///
/// `attributes.format` is chosen so `content` can always be turned back
/// into the original bytes (spec §4.12 `sidecar_restore`): a successful
/// JSON parse is tagged `json`, otherwise the raw text is kept and tagged
/// `text`; a content-hash sidecar is `lines`; a thumbnail/screenshot/
/// torrent payload is a bare base64 string tagged `base64`.
pub fn read_sidecar(
    ctx: &BuildContext,
    path: &Path,
    source_relative: &str,
    kind: SidecarKind,
    parent_name: Option<&str>,
) -> Result<MetadataEntry> {
    let (content, format) = match kind {
        SidecarKind::JsonMetadata | SidecarKind::GenericMetadata | SidecarKind::DesktopIni => {
            read_as_json_or_text(path)?
        }
        SidecarKind::Hash => (read_as_text_lines(path)?, MetadataFormat::Lines),
        SidecarKind::Link => (read_as_text(path)?, MetadataFormat::Text),
        SidecarKind::Description => (read_as_text(path)?, MetadataFormat::Text),
        SidecarKind::Subtitles => (read_as_text(path)?, MetadataFormat::Text),
        SidecarKind::Thumbnail | SidecarKind::Screenshot | SidecarKind::Torrent => {
            (read_as_base64(path)?, MetadataFormat::Base64)
        }
    };

    let parent = match parent_name {
        Some(name) => SidecarParent {
            kind: "item".to_string(),
            name: Some(name.to_string()),
        },
        None => SidecarParent {
            kind: "orphan".to_string(),
            name: None,
        },
    };

    let original_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let raw = std::fs::read(path).map_err(io_err(path))?;
    let hashes = hash::hash_bytes(&raw, ctx.hash_algorithms);
    let id = match ctx.id_algorithm {
        IdAlgorithm::Md5 => hashes.md5.clone(),
        IdAlgorithm::Sha256 => hashes.sha256.clone(),
    };

    let provenance = statadapter::read_stat(path).ok().map(|stat| MetadataProvenance {
        file_system: FileSystemInfo {
            path: source_relative.to_string(),
            parent: pathutil::parent_relative(source_relative),
            is_symlink: false,
        },
        size: SizeInfo {
            bytes: stat.size,
            text: crate::entry::format_size_si(stat.size),
        },
        timestamps: TimestampsInfo {
            created: stat.created,
            modified: stat.modified,
            accessed: stat.accessed,
        },
    });

    Ok(MetadataEntry {
        id,
        origin: MetadataOrigin::Sidecar,
        name: NameObject { original: original_name.clone(), storage: original_name },
        hashes: Some(hashes),
        attributes: MetadataAttributes {
            kind: "sidecar".to_string(),
            format,
            transforms: Vec::new(),
            source_media_type: None,
        },
        source_path: source_relative.to_string(),
        sidecar_type: kind.as_str().to_string(),
        parent,
        content,
        provenance,
    })
}

fn read_as_json_or_text(path: &Path) -> Result<(serde_json::Value, MetadataFormat)> {
    let raw = std::fs::read_to_string(path).map_err(io_err(path))?;
    match serde_json::from_str(&raw) {
        Ok(value) => Ok((value, MetadataFormat::Json)),
        Err(_) => Ok((serde_json::Value::String(raw), MetadataFormat::Text)),
    }
}

fn read_as_text(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).map_err(io_err(path))?;
    Ok(serde_json::Value::String(raw))
}

fn read_as_text_lines(path: &Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).map_err(io_err(path))?;
    let lines: Vec<serde_json::Value> = raw
        .lines()
        .map(|l| serde_json::Value::String(l.to_string()))
        .collect();
    Ok(serde_json::Value::Array(lines))
}

fn read_as_base64(path: &Path) -> Result<serde_json::Value> {
    use base64::Engine;
    let raw = std::fs::read(path).map_err(io_err(path))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    Ok(serde_json::Value::String(encoded))
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> JozinError + '_ {
    move |e| JozinError::IoError {
        message: format!("{}: {}", path.display(), e),
    }
}

/// Builds the deferred-delete manifest path for a sidecar that the
/// merge/delete orchestrator will remove once its content has been folded
/// into the aggregate (C10 drains this list after a successful merge).
pub fn queue_for_delete(queue: &mut Vec<PathBuf>, path: &Path) {
    queue.push(path.to_path_buf());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SidecarClassifier {
        SidecarClassifier::new().unwrap()
    }

    #[test]
    fn classifies_hash_sidecars() {
        let c = classifier();
        assert_eq!(c.classify("archive.zip.sha256"), Some(SidecarKind::Hash));
    }

    #[test]
    fn classifies_json_metadata_over_generic() {
        let c = classifier();
        assert_eq!(
            c.classify("IMG_1234.JPG_meta2.json"),
            Some(SidecarKind::JsonMetadata)
        );
    }

    #[test]
    fn classifies_desktop_ini() {
        let c = classifier();
        assert_eq!(c.classify("desktop.ini"), Some(SidecarKind::DesktopIni));
    }

    #[test]
    fn unrecognized_name_has_no_kind() {
        let c = classifier();
        assert_eq!(c.classify("photo.jpg"), None);
    }

    #[test]
    fn parent_stem_strips_meta_suffix() {
        assert_eq!(
            candidate_parent_stem("IMG_1234.JPG_meta2.json", SidecarKind::JsonMetadata),
            Some("IMG_1234.JPG".to_string())
        );
    }

    #[test]
    fn resolve_parent_prefers_non_other_group() {
        let siblings = vec![
            ("IMG_1234.notes".to_string(), Some(ExtensionGroup::Other)),
            ("IMG_1234.jpg".to_string(), Some(ExtensionGroup::Image)),
        ];
        let resolved = resolve_parent("IMG_1234", &siblings);
        assert_eq!(resolved, Some("IMG_1234.jpg".to_string()));
    }

    #[test]
    fn resolve_parent_none_when_no_sibling_matches() {
        let siblings = vec![("other.jpg".to_string(), Some(ExtensionGroup::Image))];
        assert_eq!(resolve_parent("IMG_1234", &siblings), None);
    }
}
