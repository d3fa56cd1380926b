//! Path utilities (C2) - canonicalization, component extraction, sidecar and
//! storage path derivation, forward-slash relative paths.

use std::path::{Path, PathBuf};

/// Canonicalizes `input` via the OS. Falls back to lexical normalization
/// (no existence requirement) when strict resolution fails, e.g. for a
/// dangling symlink target or a path that doesn't exist yet.
pub fn resolve(input: &Path) -> PathBuf {
    if let Ok(canonical) = input.canonicalize() {
        return canonical;
    }
    lexical_normalize(input)
}

/// Normalizes `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    let mut out = base;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                out.push(component.as_os_str());
            }
            Component::Normal(part) => {
                out.push(part);
            }
        }
    }
    out
}

/// Splits `path` into `(parent, stem, extension)`. Extension is lowercased
/// and has no leading dot; `None` for extensionless names or directories.
pub fn extract_components(path: &Path) -> (Option<PathBuf>, String, Option<String>) {
    let parent = path.parent().map(|p| p.to_path_buf());
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    (parent, stem, extension)
}

/// Builds the in-place sidecar path for an item: `<file>_meta2.json` for
/// files, `<dir>/<leaf>_directorymeta2.json` for directories.
pub fn build_sidecar_path(item_path: &Path, is_directory: bool) -> PathBuf {
    if is_directory {
        let leaf = item_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        item_path.join(format!("{}_directorymeta2.json", leaf))
    } else {
        let name = item_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        item_path.with_file_name(format!("{}_meta2.json", name))
    }
}

/// Builds the rename target path: `item_path.parent() / storage_name`.
pub fn build_storage_path(item_path: &Path, storage_name: &str) -> PathBuf {
    match item_path.parent() {
        Some(parent) => parent.join(storage_name),
        None => PathBuf::from(storage_name),
    }
}

/// Returns `item`'s path relative to `root`, always using forward slashes
/// (invariant I5), regardless of host path separator conventions.
pub fn relative_of(item: &Path, root: &Path) -> String {
    let rel = item.strip_prefix(root).unwrap_or(item);
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }
    parts.join("/")
}

/// Inverse of `relative_of`: joins a forward-slash relative path back onto
/// `root` using real path components, so it works regardless of host path
/// separator conventions.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    if !relative.is_empty() {
        for part in relative.split('/') {
            out.push(part);
        }
    }
    out
}

/// Returns the parent of a forward-slash relative path string, or the
/// empty string when `relative` has no parent (a root-level item).
pub fn parent_relative(relative: &str) -> String {
    match relative.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_path_for_file() {
        let p = Path::new("/photos/IMG_1234.JPG");
        assert_eq!(
            build_sidecar_path(p, false),
            PathBuf::from("/photos/IMG_1234.JPG_meta2.json")
        );
    }

    #[test]
    fn sidecar_path_for_directory() {
        let p = Path::new("/photos/2020");
        assert_eq!(
            build_sidecar_path(p, true),
            PathBuf::from("/photos/2020/2020_directorymeta2.json")
        );
    }

    #[test]
    fn storage_path_joins_parent_and_name() {
        let p = Path::new("/photos/IMG_1234.JPG");
        assert_eq!(
            build_storage_path(p, "yABCDEF.jpg"),
            PathBuf::from("/photos/yABCDEF.jpg")
        );
    }

    #[test]
    fn relative_of_uses_forward_slash() {
        let root = Path::new("/photos");
        let item = Path::new("/photos/2020/a.jpg");
        assert_eq!(relative_of(item, root), "2020/a.jpg");
    }

    #[test]
    fn extract_components_lowercases_extension() {
        let (_, stem, ext) = extract_components(Path::new("IMG_01.JPG"));
        assert_eq!(stem, "IMG_01");
        assert_eq!(ext, Some("jpg".to_string()));
    }

    #[test]
    fn join_relative_is_inverse_of_relative_of() {
        let root = Path::new("/photos");
        let item = Path::new("/photos/2020/a.jpg");
        let relative = relative_of(item, root);
        assert_eq!(join_relative(root, &relative), item);
    }

    #[test]
    fn parent_relative_strips_last_segment() {
        assert_eq!(parent_relative("2020/a.jpg"), "2020");
        assert_eq!(parent_relative("a.jpg"), "");
    }
}
