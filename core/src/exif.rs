//! EXIF adapter (C6) - a thin, opaque wrapper around an external `exiftool`
//! subprocess. The core never parses media formats itself; it only parses
//! the JSON `exiftool` writes to stdout.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::statadapter::ItemKind;

const TIMEOUT: Duration = Duration::from_secs(30);

/// Result of the one-shot `which`-style availability probe, cached for the
/// lifetime of an invocation. Never re-probed per entry.
#[derive(Clone)]
pub struct ExifToolHandle {
    binary: std::path::PathBuf,
}

/// Runs the availability probe once per process/invocation.
pub fn probe() -> Option<ExifToolHandle> {
    which::which("exiftool")
        .ok()
        .map(|binary| ExifToolHandle { binary })
}

#[derive(Debug, Clone)]
pub struct ExiftoolArgs {
    pub base_args: Vec<String>,
}

impl Default for ExiftoolArgs {
    fn default() -> Self {
        ExiftoolArgs {
            base_args: vec![
                "-json".to_string(),
                "-G".to_string(),
                "-api".to_string(),
                "largefilesupport=1".to_string(),
                "-charset".to_string(),
                "filename=UTF8".to_string(),
            ],
        }
    }
}

/// Whether `path` should be skipped for EXIF extraction: excluded
/// extension, or a symlink (never followed).
pub fn should_skip(ext_lower: Option<&str>, kind: ItemKind, exclude_extensions: &HashSet<String>) -> bool {
    if kind == ItemKind::Symlink {
        return true;
    }
    match ext_lower {
        Some(ext) => exclude_extensions.contains(ext),
        None => false,
    }
}

/// Extracts EXIF metadata from `path` as a one-shot subprocess invocation.
/// Returns `None` (never an error) on absence, timeout, non-zero exit, or
/// unparseable stdout; the caller logs once and continues (degradation
/// rule, spec §4.8/§7).
pub fn extract(handle: &ExifToolHandle, args: &ExiftoolArgs, path: &Path) -> Option<serde_json::Value> {
    let mut cmd = Command::new(&handle.binary);
    cmd.args(&args.base_args);
    cmd.arg(path);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());
    cmd.stdin(Stdio::null());

    let mut child = cmd.spawn().ok()?;
    match wait_with_timeout(&mut child, TIMEOUT) {
        Some(true) => {}
        Some(false) => {
            tracing::warn!(path = %path.display(), "exiftool timed out");
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        None => return None,
    }

    let status = child.wait().ok()?;
    if !status.success() {
        tracing::warn!(path = %path.display(), "exiftool exited non-zero");
        return None;
    }

    let mut stdout = String::new();
    child.stdout.take()?.read_to_string(&mut stdout).ok()?;

    let parsed: serde_json::Value = serde_json::from_str(&stdout).ok()?;
    let first = parsed.as_array().and_then(|a| a.first()).cloned()?;
    Some(first)
}

/// Polls `child` for completion until `timeout` elapses. Returns `Some(true)`
/// if it exited in time, `Some(false)` if the timeout fired (and the caller
/// is responsible for killing it), or `None` on a wait error.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<bool> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return Some(true),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    return Some(false);
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => return None,
        }
    }
}

/// Filters a parsed EXIF object down to the configured key set by base key
/// (strips the `Group:` prefix before matching).
pub fn filter_keys(
    mut map: serde_json::Value,
    exclude_keys: &HashSet<String>,
) -> serde_json::Value {
    if let Some(obj) = map.as_object_mut() {
        obj.retain(|key, _| {
            let base = key.rsplit(':').next().unwrap_or(key);
            !exclude_keys.contains(base)
        });
    }
    map
}

/// A handle that never resolves to a real binary, useful for tests and for
/// orchestrators that want a single shared "unavailable" sentinel.
pub fn unavailable() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
