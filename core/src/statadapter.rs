//! Symlink & stat adapter (C3) - `lstat`-based attribute reads. Never
//! follows symlinks: classification and size both come from the link
//! itself, not whatever it points at.

use std::path::Path;
use std::time::SystemTime;
use time::OffsetDateTime;

use crate::{JozinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// `(iso, unix)` pair; unix is milliseconds, per invariant I6.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimePoint {
    pub iso: String,
    pub unix: i64,
}

impl TimePoint {
    pub fn from_system_time(t: SystemTime) -> Self {
        let odt = OffsetDateTime::from(t);
        let iso = odt
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        let unix = (odt.unix_timestamp_nanos() / 1_000_000) as i64;
        TimePoint { iso, unix }
    }
}

#[derive(Debug, Clone)]
pub struct StatData {
    pub size: u64,
    pub created: TimePoint,
    pub modified: TimePoint,
    pub accessed: TimePoint,
    /// True when the creation time fell back to ctime/mtime because the
    /// platform has no birth-time field.
    pub created_is_fallback: bool,
    /// No write permission for the owner (unix) or the platform readonly
    /// bit (windows/other).
    pub readonly: bool,
}

/// Classifies an entry using `lstat` semantics only (never follows).
pub fn classify(path: &Path) -> Result<ItemKind> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| JozinError::IoError {
        message: format!("{}: {}", path.display(), e),
    })?;
    let ft = meta.file_type();
    Ok(if ft.is_symlink() {
        ItemKind::Symlink
    } else if ft.is_dir() {
        ItemKind::Directory
    } else if ft.is_file() {
        ItemKind::Regular
    } else {
        ItemKind::Other
    })
}

/// Reads `lstat`-derived attributes. Creation time prefers the OS-native
/// birth time; when unavailable, falls back to ctime (unix) or modified
/// time (other platforms) and sets `created_is_fallback` so the caller can
/// log a single debug event per invocation (spec C3).
pub fn read_stat(path: &Path) -> Result<StatData> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| JozinError::IoError {
        message: format!("{}: {}", path.display(), e),
    })?;

    let modified = meta
        .modified()
        .map(TimePoint::from_system_time)
        .unwrap_or_else(|_| TimePoint::from_system_time(SystemTime::UNIX_EPOCH));
    let accessed = meta
        .accessed()
        .map(TimePoint::from_system_time)
        .unwrap_or_else(|_| modified.clone());

    let (created, created_is_fallback) = match meta.created() {
        Ok(t) => (TimePoint::from_system_time(t), false),
        Err(_) => (ctime_fallback(&meta, &modified), true),
    };

    Ok(StatData {
        size: meta.len(),
        created,
        modified,
        accessed,
        created_is_fallback,
        readonly: is_readonly(&meta),
    })
}

/// Stand-in `StatData` for an item whose `lstat` call failed. Size is
/// zeroed and every timestamp falls back to the unix epoch so the entry's
/// non-optional timestamp/size fields still have something to serialize -
/// the degradation rule (spec §4.8) nulls `hashes`, not these.
pub fn degraded_stat() -> StatData {
    let epoch = TimePoint::from_system_time(SystemTime::UNIX_EPOCH);
    StatData {
        size: 0,
        created: epoch.clone(),
        modified: epoch.clone(),
        accessed: epoch,
        created_is_fallback: true,
        readonly: false,
    }
}

#[cfg(unix)]
fn is_readonly(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o200 == 0
}

#[cfg(not(unix))]
fn is_readonly(meta: &std::fs::Metadata) -> bool {
    meta.permissions().readonly()
}

#[cfg(unix)]
fn ctime_fallback(meta: &std::fs::Metadata, modified: &TimePoint) -> TimePoint {
    use std::os::unix::fs::MetadataExt;
    let secs = meta.ctime();
    let nanos = meta.ctime_nsec().max(0) as u32;
    if secs >= 0 {
        if let Ok(odt) = OffsetDateTime::from_unix_timestamp(secs) {
            let odt = odt + time::Duration::nanoseconds(nanos as i64);
            let iso = odt
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default();
            let unix = (odt.unix_timestamp_nanos() / 1_000_000) as i64;
            return TimePoint { iso, unix };
        }
    }
    modified.clone()
}

#[cfg(not(unix))]
fn ctime_fallback(_meta: &std::fs::Metadata, modified: &TimePoint) -> TimePoint {
    modified.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn classify_regular_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hi").unwrap();
        assert_eq!(classify(&file).unwrap(), ItemKind::Regular);
    }

    #[test]
    fn classify_directory() {
        let dir = tempdir().unwrap();
        assert_eq!(classify(dir.path()).unwrap(), ItemKind::Directory);
    }

    #[test]
    #[cfg(unix)]
    fn read_stat_detects_readonly() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let file = dir.path().join("ro.txt");
        std::fs::write(&file, b"hi").unwrap();
        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        perms.set_mode(0o444);
        std::fs::set_permissions(&file, perms).unwrap();
        assert!(read_stat(&file).unwrap().readonly);
    }

    #[test]
    #[cfg(unix)]
    fn classify_symlink_never_follows() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"hi").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert_eq!(classify(&link).unwrap(), ItemKind::Symlink);
    }

    #[test]
    #[cfg(unix)]
    fn classify_dangling_symlink_does_not_error() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("dangling.txt");
        std::os::unix::fs::symlink(dir.path().join("missing"), &link).unwrap();
        assert_eq!(classify(&link).unwrap(), ItemKind::Symlink);
        assert!(read_stat(&link).is_ok());
    }
}
