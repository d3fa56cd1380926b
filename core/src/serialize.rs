//! Serializer/output router (C11) - writes the final `IndexEntry` tree
//! either as a single aggregate document, streamed in-place sidecars, or to
//! stdout. Filesystem writes are always atomic: temp file, fsync, rename
//! into place, so a crash mid-write never leaves a half-written file where
//! a reader expects a complete one.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{OutputConfig, OutputMode};
use crate::entry::IndexEntry;
use crate::pathutil::build_sidecar_path;
use crate::{JozinError, Result};

/// Writes `bytes` to `path` atomically: a sibling temp file is written and
/// fsynced, then renamed over the destination. The rename is atomic on the
/// same filesystem, so concurrent readers never observe a partial file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let mut file = File::create(&temp_path).map_err(|e| JozinError::IoError {
        message: format!("{}: {}", temp_path.display(), e),
    })?;
    file.write_all(bytes).map_err(|e| JozinError::IoError {
        message: format!("{}: {}", temp_path.display(), e),
    })?;
    file.sync_all().map_err(|e| JozinError::IoError {
        message: format!("{}: {}", temp_path.display(), e),
    })?;
    drop(file);

    std::fs::rename(&temp_path, path).map_err(|e| JozinError::IoError {
        message: format!("rename {} -> {}: {}", temp_path.display(), path.display(), e),
    })?;
    Ok(())
}

/// Serializes `entry` (and recursively every child sidecar it owns) and
/// routes the bytes to wherever `output` points: a single aggregate file,
/// one sidecar per item written next to the item, or stdout.
pub fn write_output(entry: &IndexEntry, root: &Path, output: &OutputConfig) -> Result<()> {
    match output.mode {
        OutputMode::File => {
            let path = output.file.as_ref().ok_or_else(|| JozinError::InternalError {
                message: "output.file mode missing a target path".to_string(),
            })?;
            let bytes = serde_json::to_vec_pretty(entry)?;
            atomic_write(path, &bytes)
        }
        OutputMode::Inplace => write_inplace(entry, root, true),
        OutputMode::Stdout => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, entry)?;
            lock.write_all(b"\n").map_err(|e| JozinError::IoError {
                message: e.to_string(),
            })?;
            Ok(())
        }
    }
}

/// Recursively writes one sidecar per item (file or directory), next to
/// the item itself, then descends into any children. Each write is
/// independently atomic; a failure partway through leaves prior siblings
/// with valid sidecars rather than rolling back the whole tree.
///
/// The root of the indexed tree is the one exception: it never gets its
/// own in-place sidecar, since there is no aggregate file in this output
/// mode for it to duplicate and no parent directory listing expects one.
fn write_inplace(entry: &IndexEntry, item_path: &Path, is_root: bool) -> Result<()> {
    if !is_root {
        let is_directory = matches!(entry.entry_type, crate::entry::EntryType::Directory);
        let sidecar_path: PathBuf = build_sidecar_path(item_path, is_directory);
        let bytes = serde_json::to_vec_pretty(entry)?;
        atomic_write(&sidecar_path, &bytes)?;
    }

    if let Some(items) = &entry.items {
        for child in items {
            // The rename stage (if it ran) has already moved the child on
            // disk to its storage name, so the sidecar must be written
            // alongside it there, not at the stale original-name path.
            let child_path = item_path.join(&child.name.storage);
            write_inplace(child, &child_path, false)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.json");
        atomic_write(&target, b"{}").unwrap();
        assert!(target.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.json");
        std::fs::write(&target, b"old").unwrap();
        atomic_write(&target, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn write_inplace_skips_root_sidecar_but_writes_children() {
        use crate::entry::{EntryType, NameObject};

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();

        let child = IndexEntry {
            entry_type: EntryType::File,
            name: NameObject { original: "a.txt".into(), storage: "a.txt".into() },
            ..crate::entry::tests::blank_file_entry()
        };
        let root = IndexEntry {
            entry_type: EntryType::Directory,
            name: NameObject { original: ".".into(), storage: ".".into() },
            items: Some(vec![child]),
            ..crate::entry::tests::blank_directory_entry()
        };

        write_inplace(&root, dir.path(), true).unwrap();

        let sidecars: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with("directorymeta2.json"))
            .collect();
        assert!(sidecars.is_empty(), "root must not get an in-place sidecar");
        assert!(dir.path().join("a.txt_meta2.json").exists());
    }
}
