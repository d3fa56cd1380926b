//! Merge/Delete orchestrator (C10) - the fixed six-stage pipeline that ties
//! every other component together into a single `index_path` call:
//!
//! 1. traverse a directory's immediate children
//! 2. build structural entries (identity, stat, hashes)
//! 3. classify and resolve sidecars against their siblings
//! 4. extract EXIF metadata for eligible files
//! 5. fold sidecar/EXIF metadata into each item (`meta_merge`)
//! 6. once the *whole* tree is built: rename/dedup content-identical files
//!    tree-wide, rename directories to their own content-derived name, then
//!    drain the delete queue
//!
//! Stage 6's deletes only ever run after stages 2-5 have produced entries
//! that already carry whatever those files contributed; nothing is removed
//! before its content is durably recorded. Stage 6's rename/dedup pass only
//! starts once every directory has been visited, since two files that are
//! byte-identical duplicates of each other can live in unrelated
//! subdirectories discovered minutes apart during traversal.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::IndexConfig;
use crate::entry::{self, BuildContext, IndexEntry, MetadataAttributes, MetadataEntry, MetadataFormat, MetadataOrigin, SidecarParent};
use crate::exif::{self, ExifToolHandle, ExiftoolArgs};
use crate::extension::ExtensionClassifier;
use crate::hash::{self, HashAlgorithms};
use crate::pathutil;
use crate::rename::{self, RenameCandidate};
use crate::serialize;
use crate::sidecar::{self, SidecarClassifier};
use crate::statadapter::{ItemKind, TimePoint};
use crate::traverse::{self, ExcludeSet, ListedEntry};
use crate::{JozinError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Completed,
    CompletedWithWarnings,
}

struct Engines {
    extension: ExtensionClassifier,
    sidecar: SidecarClassifier,
    exif: Option<ExifToolHandle>,
    exif_args: ExiftoolArgs,
}

/// A directory queued for its own content-derived rename, collected
/// tree-wide and applied bottom-up once traversal completes (spec §4.9
/// step 1: "for each remaining file entry and directory entry"). Unlike
/// files, directories are never deduplicated against each other - two
/// distinct directories can legitimately share a two-layer-hash id under
/// different parents (e.g. two folders named "photos" whose own parents
/// are both named "2020"), so an id collision here is not a duplicate to
/// collapse, only two independent renames to the same target name.
struct DirRenameCandidate {
    path: PathBuf,
    relative_path: String,
    storage_name: String,
}

/// Runs a complete indexing pass over `config.root`, returning the root
/// `IndexEntry` and a status describing whether anything degraded along
/// the way (a missing `exiftool`, an unreadable sidecar, a failed
/// dedup-cleanup unlink all downgrade to `CompletedWithWarnings` rather
/// than aborting - spec §7's per-item errors never escape as `Err`).
///
/// `progress` is invoked once per listed item as traversal visits it, and
/// `cancel_flag`, when supplied, is checked between items; a set flag
/// aborts the run with `JozinError::Interrupted` (exit code 5) before any
/// output is written and before the delete queue is drained (spec §5: a
/// cancelled run must not destroy anything it hasn't already durably
/// recorded).
pub fn index_path(
    config: &IndexConfig,
    progress: Option<&dyn Fn(&Path)>,
    cancel_flag: Option<&AtomicBool>,
) -> Result<(IndexEntry, IndexStatus)> {
    config.validate()?;

    let engines = Engines {
        extension: ExtensionClassifier::new(&config.validation_pattern, &config.extension_groups)?,
        sidecar: SidecarClassifier::new()?,
        exif: if config.extract_exif { exif::probe() } else { None },
        exif_args: ExiftoolArgs::default(),
    };
    if config.extract_exif && engines.exif.is_none() {
        tracing::warn!("exiftool not found on PATH; EXIF extraction disabled for this run");
    }

    let ctx = BuildContext {
        schema_version: config.schema_version,
        id_algorithm: config.id_algorithm,
        hash_algorithms: HashAlgorithms { sha512: config.compute_sha512 },
        session_id: config.session_id.clone(),
        indexed_at: TimePoint::from_system_time(std::time::SystemTime::now()),
    };

    let excludes = ExcludeSet {
        names: config.excluded_names.clone(),
        globs: config.excluded_globs.clone(),
    };

    let mut delete_queue: Vec<PathBuf> = Vec::new();
    let mut warned = false;
    let mut file_candidates: Vec<RenameCandidate> = Vec::new();
    let mut dir_candidates: Vec<DirRenameCandidate> = Vec::new();

    let root_name = config
        .root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| config.root.display().to_string());

    let mut root_entry = build_directory(
        &config.root,
        &root_name,
        None,
        &config.root,
        config,
        &ctx,
        &engines,
        &excludes,
        &mut delete_queue,
        &mut warned,
        &mut file_candidates,
        &mut dir_candidates,
        progress,
        cancel_flag,
        true,
    )?;

    if config.rename {
        apply_file_renames(&mut root_entry, config, &mut delete_queue, &mut warned, file_candidates);
        apply_directory_renames(&mut root_entry, config, &mut warned, dir_candidates);
    }

    serialize::write_output(&root_entry, &config.root, &config.output)?;

    if config.meta_merge_delete && !config.dry_run {
        drain_delete_queue(&delete_queue, &mut warned);
    }

    let status = if warned {
        IndexStatus::CompletedWithWarnings
    } else {
        IndexStatus::Completed
    };
    Ok((root_entry, status))
}

fn check_cancelled(cancel_flag: Option<&AtomicBool>) -> Result<()> {
    if cancel_flag.map(|f| f.load(Ordering::Relaxed)).unwrap_or(false) {
        return Err(JozinError::Interrupted {
            message: "indexing cancelled".to_string(),
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_directory(
    dir: &Path,
    name: &str,
    parent_name: Option<&str>,
    root: &Path,
    config: &IndexConfig,
    ctx: &BuildContext,
    engines: &Engines,
    excludes: &ExcludeSet,
    delete_queue: &mut Vec<PathBuf>,
    warned: &mut bool,
    file_candidates: &mut Vec<RenameCandidate>,
    dir_candidates: &mut Vec<DirRenameCandidate>,
    progress: Option<&dyn Fn(&Path)>,
    cancel_flag: Option<&AtomicBool>,
    is_root: bool,
) -> Result<IndexEntry> {
    let relative_path = pathutil::relative_of(dir, root);
    let parent_relative = dir
        .parent()
        .map(|p| pathutil::relative_of(p, root))
        .unwrap_or_default();

    let listed = traverse::list_directory(dir, excludes)?;

    let (sidecars, regular): (Vec<ListedEntry>, Vec<ListedEntry>) =
        listed.into_iter().partition(|e| {
            e.kind == ItemKind::Regular && engines.sidecar.classify(&e.name).is_some()
        });

    let sibling_groups: Vec<(String, Option<crate::extension::ExtensionGroup>)> = regular
        .iter()
        .map(|e| {
            let (_, _, ext) = pathutil::extract_components(&e.path);
            let group = ext.as_deref().map(|x| engines.extension.group_of(x));
            (e.name.clone(), group)
        })
        .collect();

    let mut items = Vec::with_capacity(regular.len());
    let mut orphan_metadata: Vec<MetadataEntry> = Vec::new();

    for listed_entry in &regular {
        check_cancelled(cancel_flag)?;
        if let Some(cb) = progress {
            cb(&listed_entry.path);
        }

        match listed_entry.kind {
            ItemKind::Directory => {
                let child = if config.recursive {
                    build_directory(
                        &listed_entry.path,
                        &listed_entry.name,
                        Some(name),
                        root,
                        config,
                        ctx,
                        engines,
                        excludes,
                        delete_queue,
                        warned,
                        file_candidates,
                        dir_candidates,
                        progress,
                        cancel_flag,
                        false,
                    )?
                } else {
                    let (child, degraded) = entry::build_directory_entry(
                        ctx,
                        &listed_entry.path,
                        &listed_entry.name,
                        &pathutil::relative_of(&listed_entry.path, root),
                        &relative_path,
                        Some(name),
                        Vec::new(),
                    );
                    if degraded {
                        *warned = true;
                    }
                    if config.rename {
                        dir_candidates.push(DirRenameCandidate {
                            path: listed_entry.path.clone(),
                            relative_path: pathutil::relative_of(&listed_entry.path, root),
                            storage_name: rename::storage_name(&child.id, None),
                        });
                    }
                    child
                };
                items.push(child);
            }
            ItemKind::Regular | ItemKind::Symlink | ItemKind::Other => {
                let (_, _, extension) = pathutil::extract_components(&listed_entry.path);
                if let Some(ext) = extension.as_deref() {
                    if !engines.extension.validate(ext) {
                        tracing::debug!(ext, "extension failed validation pattern");
                    }
                }

                let file_relative = pathutil::relative_of(&listed_entry.path, root);
                let (mut built_entry, degraded) = entry::build_file_entry(
                    ctx,
                    &listed_entry.path,
                    &listed_entry.name,
                    &listed_entry.name,
                    &file_relative,
                    &relative_path,
                    listed_entry.kind,
                    extension.clone(),
                );
                if degraded {
                    *warned = true;
                }

                if config.extract_exif {
                    if let Some(handle) = &engines.exif {
                        let skip = exif::should_skip(
                            extension.as_deref(),
                            listed_entry.kind,
                            &config.exif_exclude_extensions,
                        );
                        if !skip {
                            if let Some(raw) = exif::extract(handle, &engines.exif_args, &listed_entry.path) {
                                let filtered = exif::filter_keys(raw, &config.exif_exclude_keys);
                                push_metadata(
                                    &mut built_entry,
                                    build_exif_metadata_entry(ctx, &listed_entry.name, extension.as_deref(), filtered),
                                );
                            } else {
                                *warned = true;
                            }
                        }
                    }
                }

                if config.rename {
                    if let Some(hashes) = &built_entry.hashes {
                        file_candidates.push(RenameCandidate {
                            path: listed_entry.path.clone(),
                            relative_path: file_relative,
                            original_name: listed_entry.name.clone(),
                            content_id: match config.id_algorithm {
                                crate::hash::IdAlgorithm::Md5 => hashes.md5.clone(),
                                crate::hash::IdAlgorithm::Sha256 => hashes.sha256.clone(),
                            },
                            extension: extension.clone(),
                        });
                    }
                }

                items.push(built_entry);
            }
        }
    }

    if config.meta_merge {
        for sidecar_entry in &sidecars {
            check_cancelled(cancel_flag)?;
            let kind = match engines.sidecar.classify(&sidecar_entry.name) {
                Some(k) => k,
                None => continue,
            };
            let stem = sidecar::candidate_parent_stem(&sidecar_entry.name, kind);
            let parent_name = stem
                .as_deref()
                .and_then(|s| sidecar::resolve_parent(s, &sibling_groups));

            let source_relative = pathutil::relative_of(&sidecar_entry.path, root);
            match sidecar::read_sidecar(ctx, &sidecar_entry.path, &source_relative, kind, parent_name.as_deref()) {
                Ok(meta_entry) => {
                    if let Some(parent) = &parent_name {
                        if let Some(target) = items.iter_mut().find(|i| i.name.original == *parent) {
                            push_metadata(target, meta_entry);
                        }
                    } else {
                        // Orphan sidecars are retained as their own metadata
                        // entry on the directory itself (no sibling to attach to).
                        orphan_metadata.push(meta_entry);
                    }
                    if config.meta_merge_delete {
                        delete_queue.push(sidecar_entry.path.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %sidecar_entry.path.display(), error = %e, "failed to read sidecar");
                    *warned = true;
                }
            }
        }
    }

    let (mut directory_entry, degraded) =
        entry::build_directory_entry(ctx, dir, name, &relative_path, &parent_relative, parent_name, items);
    if degraded {
        *warned = true;
    }
    if !orphan_metadata.is_empty() {
        directory_entry.metadata = Some(orphan_metadata);
    }

    if config.rename && !is_root {
        dir_candidates.push(DirRenameCandidate {
            path: dir.to_path_buf(),
            relative_path: relative_path.clone(),
            storage_name: rename::storage_name(&directory_entry.id, None),
        });
    }

    Ok(directory_entry)
}

fn build_exif_metadata_entry(
    ctx: &BuildContext,
    item_name: &str,
    extension: Option<&str>,
    content: serde_json::Value,
) -> MetadataEntry {
    let hashes = hash::hash_bytes(content.to_string().as_bytes(), ctx.hash_algorithms);
    let id = match ctx.id_algorithm {
        crate::hash::IdAlgorithm::Md5 => hashes.md5.clone(),
        crate::hash::IdAlgorithm::Sha256 => hashes.sha256.clone(),
    };
    MetadataEntry {
        id,
        origin: MetadataOrigin::Exif,
        name: entry::NameObject {
            original: item_name.to_string(),
            storage: item_name.to_string(),
        },
        hashes: Some(hashes),
        attributes: MetadataAttributes {
            kind: "exif".to_string(),
            format: MetadataFormat::Json,
            transforms: Vec::new(),
            source_media_type: extension.map(|e| e.to_string()),
        },
        source_path: item_name.to_string(),
        sidecar_type: "exif".to_string(),
        parent: SidecarParent {
            kind: "item".to_string(),
            name: Some(item_name.to_string()),
        },
        content,
        // EXIF metadata has no backing sidecar file of its own to reconstruct
        // on rollback - it lives only as long as the item it was extracted from.
        provenance: None,
    }
}

fn push_metadata(entry: &mut IndexEntry, meta: MetadataEntry) {
    entry.metadata.get_or_insert_with(Vec::new).push(meta);
}

/// Groups `candidates` across the whole tree by content hash and applies
/// each resulting rename, updating the canonical entry's `name.storage` and
/// `duplicates` in place. Must run after the full tree has been built (spec
/// §4.9) and before any directory is renamed, since a file rename resolves
/// its absolute path through its (still original-named) parent directories.
fn apply_file_renames(
    root_entry: &mut IndexEntry,
    config: &IndexConfig,
    delete_queue: &mut Vec<PathBuf>,
    warned: &mut bool,
    candidates: Vec<RenameCandidate>,
) {
    let plans = rename::group_by_content(candidates);
    for plan in plans {
        match rename::apply_rename(&plan.canonical, &plan.canonical_storage_name, config.dry_run) {
            Ok(_) => {
                if let Some(canonical_entry) = find_entry_by_relative_path(root_entry, &plan.canonical_relative) {
                    canonical_entry.name.storage = plan.canonical_storage_name.clone();
                    if !plan.duplicate_relatives.is_empty() {
                        canonical_entry.duplicates = Some(plan.duplicate_relatives.clone());
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %plan.canonical.display(), error = %e, "rename failed");
                *warned = true;
            }
        }
        for duplicate in &plan.duplicates {
            delete_queue.push(duplicate.clone());
        }
    }
}

/// Renames every queued directory to its own content-derived storage name,
/// deepest directories first (spec §4.9 step 1). Bottom-up order keeps each
/// directory's recorded absolute path valid at the moment it's renamed: a
/// directory's ancestors haven't moved yet (they're renamed later in the
/// walk), and its descendants moving doesn't affect its own path.
fn apply_directory_renames(
    root_entry: &mut IndexEntry,
    config: &IndexConfig,
    warned: &mut bool,
    mut candidates: Vec<DirRenameCandidate>,
) {
    candidates.sort_by_key(|c| std::cmp::Reverse(c.relative_path.matches('/').count()));
    for candidate in candidates {
        match rename::apply_rename(&candidate.path, &candidate.storage_name, config.dry_run) {
            Ok(_) => {
                if let Some(dir_entry) = find_entry_by_relative_path(root_entry, &candidate.relative_path) {
                    dir_entry.name.storage = candidate.storage_name.clone();
                }
            }
            Err(e) => {
                tracing::warn!(path = %candidate.path.display(), error = %e, "directory rename failed");
                *warned = true;
            }
        }
    }
}

/// Locates the entry (file or directory, anywhere in the tree) whose
/// `file_system.path` - the pre-rename relative path recorded at build time
/// - matches `relative_path`. Used by the tree-wide rename passes to reach
/// back into the nested `items` tree once grouping has happened outside it.
fn find_entry_by_relative_path<'a>(entry: &'a mut IndexEntry, relative_path: &str) -> Option<&'a mut IndexEntry> {
    if entry.file_system.path == relative_path {
        return Some(entry);
    }
    if let Some(items) = &mut entry.items {
        for child in items {
            if let Some(found) = find_entry_by_relative_path(child, relative_path) {
                return Some(found);
            }
        }
    }
    None
}

/// Unlinks every queued path, tolerating per-file failures (spec §7: a
/// failed unlink downgrades the run to `CompletedWithWarnings`, it never
/// aborts a merge/delete pass that has already written its output).
fn drain_delete_queue(queue: &[PathBuf], warned: &mut bool) {
    for path in queue {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete queued file");
            *warned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, OutputConfig, OutputMode};
    use tempfile::tempdir;

    fn base_config(root: PathBuf) -> IndexConfig {
        IndexConfig {
            root,
            output: OutputConfig {
                mode: OutputMode::File,
                file: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn index_path_builds_tree_for_flat_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let mut cfg = base_config(dir.path().to_path_buf());
        cfg.output.file = Some(dir.path().join("index.json"));
        cfg.apply_implications();

        let (root, status) = index_path(&cfg, None, None).unwrap();
        assert_eq!(status, IndexStatus::Completed);
        let items = root.items.unwrap();
        // The aggregate file is written only after traversal completes, so
        // it never appears in its own tree.
        assert_eq!(items.len(), 1);
        assert!(items.iter().any(|i| i.name.original == "a.txt"));
    }

    #[test]
    fn index_path_recurses_into_subdirectories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), b"hi").unwrap();
        let mut cfg = base_config(dir.path().to_path_buf());
        cfg.output.file = Some(dir.path().join("index.json"));
        cfg.apply_implications();

        let (root, _) = index_path(&cfg, None, None).unwrap();
        let items = root.items.unwrap();
        let sub = items.iter().find(|i| i.name.original == "sub").unwrap();
        assert!(sub.items.as_ref().unwrap().iter().any(|i| i.name.original == "b.txt"));
    }

    #[test]
    fn index_path_dedups_identical_files_across_subdirectories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub1")).unwrap();
        std::fs::create_dir(dir.path().join("sub2")).unwrap();
        std::fs::write(dir.path().join("sub1").join("a.txt"), b"same content").unwrap();
        std::fs::write(dir.path().join("sub2").join("b.txt"), b"same content").unwrap();

        let mut cfg = base_config(dir.path().to_path_buf());
        cfg.output.file = Some(dir.path().join("index.json"));
        cfg.rename = true;
        cfg.apply_implications();

        let (root, _) = index_path(&cfg, None, None).unwrap();
        let items = root.items.unwrap();
        let sub1 = items.iter().find(|i| i.name.original == "sub1").unwrap();
        let sub2 = items.iter().find(|i| i.name.original == "sub2").unwrap();
        let a = sub1.items.as_ref().unwrap().iter().find(|i| i.name.original == "a.txt").unwrap();
        let b = sub2.items.as_ref().unwrap().iter().find(|i| i.name.original == "b.txt").unwrap();

        // Exactly one of the two siblings is canonical (has the recorded
        // duplicate) and the other was queued for removal, regardless of
        // which subdirectory discovered it first.
        let canonical_duplicates = a.duplicates.as_ref().or(b.duplicates.as_ref());
        assert!(canonical_duplicates.is_some());
        assert_eq!(canonical_duplicates.unwrap().len(), 1);
    }

    #[test]
    fn index_path_renames_directories_to_content_derived_names_excluding_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("photos")).unwrap();
        std::fs::write(dir.path().join("photos").join("a.txt"), b"hi").unwrap();

        let mut cfg = base_config(dir.path().to_path_buf());
        cfg.output.file = Some(dir.path().join("index.json"));
        cfg.rename = true;
        cfg.apply_implications();

        let (root, _) = index_path(&cfg, None, None).unwrap();
        assert_eq!(root.name.storage, root.name.original, "root must never be renamed");
        let photos = root.items.unwrap().into_iter().find(|i| i.name.original == "photos").unwrap();
        assert_ne!(photos.name.storage, photos.name.original);
        assert_eq!(photos.name.storage, photos.id);
    }

    #[test]
    fn index_path_honors_cancellation_between_items() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world").unwrap();
        let mut cfg = base_config(dir.path().to_path_buf());
        cfg.output.file = Some(dir.path().join("index.json"));
        cfg.apply_implications();

        let cancel_flag = AtomicBool::new(true);
        let result = index_path(&cfg, None, Some(&cancel_flag));
        match result {
            Err(JozinError::Interrupted { .. }) => {}
            other => panic!("expected Interrupted, got {:?}", other),
        }
        assert!(!dir.path().join("index.json").exists(), "a cancelled run must not write output");
    }
}
