//! Indexing configuration (`IndexConfig`) - every knob that governs a
//! single `index_path` invocation, plus the implication chain that keeps
//! dependent options consistent (spec §6).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::hash::IdAlgorithm;
use crate::{JozinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Single aggregate JSON document written to `output.file`.
    File,
    /// One sidecar JSON per item, written next to the item itself.
    Inplace,
    /// Aggregate JSON written to stdout; no filesystem output.
    Stdout,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub mode: OutputMode,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub root: PathBuf,
    pub recursive: bool,
    pub schema_version: u32,
    pub id_algorithm: IdAlgorithm,
    pub compute_sha512: bool,
    pub validation_pattern: String,
    pub extension_groups: HashMap<String, Vec<String>>,
    pub excluded_names: std::collections::HashSet<String>,
    pub excluded_globs: Vec<String>,
    pub output: OutputConfig,

    /// Extracts EXIF metadata via `exiftool` for non-excluded, non-symlink
    /// items. Implies nothing on its own; `meta_merge` and
    /// `meta_merge_delete` imply it (spec §6 implication chain).
    pub extract_exif: bool,
    pub exif_exclude_extensions: std::collections::HashSet<String>,
    pub exif_exclude_keys: std::collections::HashSet<String>,

    /// Folds discovered sidecars into each item's `metadata` array.
    pub meta_merge: bool,
    /// Folds sidecars in, then deletes the originals once merged. Requires
    /// `output.file` or `output.inplace` (never stdout-only, spec §4.10
    /// safety gate) since a destructive delete needs a durable record of
    /// what was merged.
    pub meta_merge_delete: bool,

    /// Renames files to content-derived canonical names and deduplicates
    /// identical-content siblings. Implies `output.inplace` so the
    /// rename manifest sidecar can be written next to the renamed file.
    pub rename: bool,
    pub dry_run: bool,

    pub session_id: Option<String>,
}

impl IndexConfig {
    /// Applies the spec's fixed implication chain, mutating the config in
    /// place so later stages only ever see the fully-resolved settings.
    pub fn apply_implications(&mut self) {
        if self.meta_merge_delete {
            self.meta_merge = true;
        }
        if self.meta_merge {
            self.extract_exif = true;
        }
        if self.rename {
            self.output.mode = OutputMode::Inplace;
        }
    }

    /// Validates cross-field invariants not already enforced by types.
    /// Must be called after `apply_implications`.
    pub fn validate(&self) -> Result<()> {
        if !self.root.exists() {
            return Err(JozinError::TargetError {
                message: format!("root path does not exist: {}", self.root.display()),
            });
        }
        if self.meta_merge_delete
            && !(self.output.mode == OutputMode::File || self.output.mode == OutputMode::Inplace)
        {
            return Err(JozinError::ConfigError {
                message:
                    "meta_merge_delete requires output.file or output.inplace (destructive deletes need a durable record)"
                        .to_string(),
            });
        }
        if self.output.mode == OutputMode::File && self.output.file.is_none() {
            return Err(JozinError::ConfigError {
                message: "output.file mode requires a file path".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            root: PathBuf::new(),
            recursive: true,
            schema_version: 1,
            id_algorithm: IdAlgorithm::Sha256,
            compute_sha512: false,
            validation_pattern: crate::extension::DEFAULT_VALIDATION_PATTERN.to_string(),
            extension_groups: crate::extension::default_extension_groups(),
            excluded_names: crate::traverse::default_excluded_names(),
            excluded_globs: crate::traverse::default_excluded_globs(),
            output: OutputConfig {
                mode: OutputMode::Stdout,
                file: None,
            },
            extract_exif: false,
            exif_exclude_extensions: std::collections::HashSet::new(),
            exif_exclude_keys: std::collections::HashSet::new(),
            meta_merge: false,
            meta_merge_delete: false,
            rename: false,
            dry_run: false,
            session_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn meta_merge_delete_implies_meta_merge_and_exif() {
        let mut cfg = IndexConfig {
            meta_merge_delete: true,
            ..Default::default()
        };
        cfg.apply_implications();
        assert!(cfg.meta_merge);
        assert!(cfg.extract_exif);
    }

    #[test]
    fn rename_implies_inplace_output() {
        let mut cfg = IndexConfig {
            rename: true,
            ..Default::default()
        };
        cfg.apply_implications();
        assert_eq!(cfg.output.mode, OutputMode::Inplace);
    }

    #[test]
    fn validate_rejects_merge_delete_with_stdout_only() {
        let dir = tempdir().unwrap();
        let mut cfg = IndexConfig {
            root: dir.path().to_path_buf(),
            meta_merge_delete: true,
            ..Default::default()
        };
        cfg.apply_implications();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_merge_delete_with_file_output() {
        let dir = tempdir().unwrap();
        let mut cfg = IndexConfig {
            root: dir.path().to_path_buf(),
            meta_merge_delete: true,
            output: OutputConfig {
                mode: OutputMode::File,
                file: Some(dir.path().join("out.json")),
            },
            ..Default::default()
        };
        cfg.apply_implications();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_root() {
        let cfg = IndexConfig {
            root: PathBuf::from("/does/not/exist/ever"),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
