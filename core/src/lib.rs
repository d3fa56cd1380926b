//! # jozin-core
//!
//! Deterministic, content-addressed filesystem indexing. Given a root
//! directory, produces a JSON tree of `IndexEntry` objects keyed by
//! cryptographic content hash, optionally enriched with EXIF metadata and
//! sidecar-derived metadata, and optionally renamed/deduplicated to
//! content-derived canonical names.
//!
//! ## Architecture
//!
//! - **hash** - multi-algorithm streaming hashing (C1)
//! - **pathutil** - path resolution, sidecar/storage path derivation (C2)
//! - **statadapter** - `lstat`-based symlink-safe attribute reads (C3)
//! - **extension** - extension validation and grouping (C4)
//! - **sidecar** - sidecar classification, parent resolution, reading (C5)
//! - **exif** - `exiftool` subprocess adapter (C6)
//! - **traverse** - single-pass directory enumeration (C7)
//! - **entry** - the `IndexEntry`/`MetadataEntry` data model and builders (C8)
//! - **rename** - content-hash grouping, canonical rename, dedup (C9)
//! - **orchestrator** - the fixed pipeline tying every stage together (C10)
//! - **serialize** - atomic output writes, aggregate/in-place/stdout routing (C11)
//! - **rollback** - reconstructing and undoing a prior run's renames (C12)
//! - **config** - `IndexConfig` and the implication chain between options

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod entry;
pub mod exif;
pub mod extension;
pub mod hash;
pub mod orchestrator;
pub mod pathutil;
pub mod rename;
pub mod rollback;
pub mod serialize;
pub mod sidecar;
pub mod statadapter;
pub mod traverse;

pub use config::IndexConfig;
pub use entry::IndexEntry;
pub use orchestrator::{index_path, IndexStatus};

/// Standard result type for all indexing operations.
pub type Result<T> = std::result::Result<T, JozinError>;

/// Structured error type for all indexing operations.
///
/// Maps to exit codes (spec §6's fixed table: 0 Success, 1
/// PartialFailure, 2 ConfigurationError, 3 TargetError, 4 RuntimeError,
/// 5 Interrupted):
/// - Exit code 2: configuration error (bad flag combination, invalid
///   config file - never starts the run)
/// - Exit code 3: target error (missing/unreadable root path)
/// - Exit code 4: everything else that aborts the whole run - I/O,
///   validation, or internal errors, and the generic user-error catch-all
/// - Exit code 5: interrupted (cancellation during a long-running index)
///
/// A successful-but-degraded run never constructs a `JozinError` at all;
/// its exit code (1, `PartialFailure`) comes from `IndexStatus` at the
/// CLI boundary instead, since per-item failures are captured in the
/// tree, not raised as errors.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JozinError {
    #[serde(rename = "user")]
    UserError { message: String },

    #[serde(rename = "config")]
    ConfigError { message: String },

    #[serde(rename = "target")]
    TargetError { message: String },

    #[serde(rename = "io")]
    IoError { message: String },

    #[serde(rename = "validation")]
    ValidationError { message: String },

    #[serde(rename = "internal")]
    InternalError { message: String },

    #[serde(rename = "interrupted")]
    Interrupted { message: String },
}

impl fmt::Display for JozinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JozinError::UserError { message } => write!(f, "User error: {}", message),
            JozinError::ConfigError { message } => write!(f, "Config error: {}", message),
            JozinError::TargetError { message } => write!(f, "Target error: {}", message),
            JozinError::IoError { message } => write!(f, "I/O error: {}", message),
            JozinError::ValidationError { message } => write!(f, "Validation error: {}", message),
            JozinError::InternalError { message } => write!(f, "Internal error: {}", message),
            JozinError::Interrupted { message } => write!(f, "Interrupted: {}", message),
        }
    }
}

impl std::error::Error for JozinError {}

impl From<std::io::Error> for JozinError {
    fn from(err: std::io::Error) -> Self {
        JozinError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for JozinError {
    fn from(err: serde_json::Error) -> Self {
        JozinError::ValidationError {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<walkdir::Error> for JozinError {
    fn from(err: walkdir::Error) -> Self {
        JozinError::IoError {
            message: format!("directory traversal error: {}", err),
        }
    }
}

impl JozinError {
    /// Returns the process exit code for this error (spec §7).
    pub fn exit_code(&self) -> i32 {
        match self {
            JozinError::ConfigError { .. } => 2,
            JozinError::TargetError { .. } => 3,
            JozinError::UserError { .. }
            | JozinError::IoError { .. }
            | JozinError::ValidationError { .. }
            | JozinError::InternalError { .. } => 4,
            JozinError::Interrupted { .. } => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(JozinError::ConfigError { message: String::new() }.exit_code(), 2);
        assert_eq!(JozinError::TargetError { message: String::new() }.exit_code(), 3);
        assert_eq!(JozinError::UserError { message: String::new() }.exit_code(), 4);
        assert_eq!(JozinError::IoError { message: String::new() }.exit_code(), 4);
        assert_eq!(JozinError::ValidationError { message: String::new() }.exit_code(), 4);
        assert_eq!(JozinError::InternalError { message: String::new() }.exit_code(), 4);
        assert_eq!(JozinError::Interrupted { message: String::new() }.exit_code(), 5);
    }

    #[test]
    fn io_error_converts_via_from() {
        let err: JozinError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.exit_code(), 4);
    }
}
