//! Extension validator & classifier (C4).

use regex::Regex;
use std::collections::HashMap;

use crate::{JozinError, Result};

pub const DEFAULT_VALIDATION_PATTERN: &str = r"^([a-z0-9]{1,2}|[a-z0-9][a-z0-9-]{1,12}[a-z0-9])$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionGroup {
    Archive,
    Audio,
    Font,
    Image,
    Link,
    Subtitles,
    Video,
    Other,
}

/// A compiled validator plus a group lookup table. Built once from config
/// and shared read-only for the duration of an invocation.
pub struct ExtensionClassifier {
    validation: Regex,
    groups: HashMap<String, ExtensionGroup>,
}

impl ExtensionClassifier {
    pub fn new(
        validation_pattern: &str,
        group_map: &HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let validation = Regex::new(validation_pattern).map_err(|e| JozinError::ConfigError {
            message: format!("invalid extension validation pattern: {}", e),
        })?;
        let mut groups = HashMap::new();
        for (group_name, exts) in group_map {
            let group = parse_group_name(group_name);
            for ext in exts {
                groups.insert(ext.to_lowercase(), group);
            }
        }
        Ok(ExtensionClassifier { validation, groups })
    }

    /// Validates a lowercase extension (no leading dot) against the
    /// configured regex.
    pub fn validate(&self, ext_lower: &str) -> bool {
        self.validation.is_match(ext_lower)
    }

    /// Looks up the extension group, defaulting to `Other` when the
    /// extension is not present in the configured map.
    pub fn group_of(&self, ext_lower: &str) -> ExtensionGroup {
        self.groups
            .get(ext_lower)
            .copied()
            .unwrap_or(ExtensionGroup::Other)
    }
}

fn parse_group_name(name: &str) -> ExtensionGroup {
    match name.to_lowercase().as_str() {
        "archive" => ExtensionGroup::Archive,
        "audio" => ExtensionGroup::Audio,
        "font" => ExtensionGroup::Font,
        "image" => ExtensionGroup::Image,
        "link" => ExtensionGroup::Link,
        "subtitles" => ExtensionGroup::Subtitles,
        "video" => ExtensionGroup::Video,
        _ => ExtensionGroup::Other,
    }
}

/// A reasonable default extension-group map, used when the caller's config
/// does not override it.
pub fn default_extension_groups() -> HashMap<String, Vec<String>> {
    let mut m = HashMap::new();
    m.insert(
        "video".to_string(),
        vec![
            "mp4", "mkv", "mov", "avi", "webm", "m4v", "wmv", "flv",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    );
    m.insert(
        "audio".to_string(),
        vec!["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    m.insert(
        "image".to_string(),
        vec![
            "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "heif", "tiff", "tif", "raw",
            "cr2", "nef", "arw", "dng",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    );
    m.insert(
        "archive".to_string(),
        vec!["zip", "tar", "gz", "7z", "rar", "xz", "bz2"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    m.insert(
        "subtitles".to_string(),
        vec!["srt", "vtt", "ass", "ssa", "sub"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    m.insert(
        "font".to_string(),
        vec!["ttf", "otf", "woff", "woff2"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    m.insert(
        "link".to_string(),
        vec!["url", "lnk", "webloc"]
            .into_iter()
            .map(String::from)
            .collect(),
    );
    m
}
