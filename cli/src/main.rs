//! # jozin CLI
//!
//! Command-line interface for the jozin content-addressed filesystem
//! indexer.
//!
//! - **index**: traverse a directory, compute content hashes, optionally
//!   extract EXIF metadata, merge sidecars, and rename/dedup files to
//!   content-derived canonical names
//! - **rollback**: undo a prior `index --rename` run's renames, using the
//!   sidecars or aggregate file it left behind
//!
//! Errors are printed to stderr as structured JSON with exit codes 1-5.

use clap::{Args, Parser, Subcommand};
use jozin_core::config::{IndexConfig, OutputConfig, OutputMode};
use jozin_core::hash::IdAlgorithm;
use jozin_core::rollback::{self, FilesystemResolver, RestoreMode};
use jozin_core::{index_path, IndexStatus, JozinError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::exit;

/// Optional TOML pre-population for `IndexConfig`, loaded before CLI flags
/// are applied. Kept minimal: flags always win over the file for any value
/// the file and the command line both set, except the boolean stage
/// switches, which are OR'd together (a file enabling a stage cannot be
/// silently overridden by the flag's own default-false).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileConfig {
    recursive: Option<bool>,
    sha512: Option<bool>,
    extract_exif: Option<bool>,
    meta_merge: Option<bool>,
    meta_merge_delete: Option<bool>,
    rename: Option<bool>,
    session_id: Option<String>,
}

fn load_file_config(path: &std::path::Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| JozinError::ConfigError {
        message: format!("{}: {}", path.display(), e),
    })?;
    toml::from_str(&raw).map_err(|e| JozinError::ConfigError {
        message: format!("invalid config file {}: {}", path.display(), e),
    })
}

#[derive(Parser)]
#[command(
    name = "jozin",
    version,
    about = "Deterministic, content-addressed filesystem indexer",
    long_about = "jozin walks a directory tree and produces a JSON index keyed by\n\
                  cryptographic content hash, optionally enriched with EXIF metadata\n\
                  and sidecar-derived metadata, and optionally renamed to\n\
                  content-derived canonical names with duplicates flagged.",
    after_help = "EXAMPLES:\n  \
                  jozin index ~/Photos --recursive --output index.json\n  \
                  jozin index ~/Photos --rename --extract-exif --meta-merge\n  \
                  jozin rollback ~/Photos --from index.json\n\n\
                  For detailed help on a subcommand, run: jozin <SUBCOMMAND> --help"
)]
struct CliArgs {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Index a directory tree into a content-addressed JSON document
    Index(IndexArgs),
    /// Undo a prior rename/dedup run
    Rollback(RollbackArgs),
}

/// Index a directory tree into a content-addressed JSON document
#[derive(Args)]
#[command(
    about = "Index a directory tree",
    long_about = "Traverses a directory, hashes every file (MD5 and SHA-256 always,\n\
                  SHA-512 optionally), and builds a JSON tree of entries. Optional\n\
                  stages extract EXIF metadata, merge sidecar files into each item,\n\
                  and rename files to content-derived canonical names.",
    after_help = "EXAMPLES:\n  \
                  # Index recursively, write a single aggregate file\n  \
                  jozin index ~/Photos --recursive --output index.json\n\n  \
                  # Rename to canonical names, write a sidecar per item\n  \
                  jozin index ~/Photos --rename\n\n  \
                  # Extract EXIF and fold sidecars into each item, then delete them\n  \
                  jozin index ~/Photos --meta-merge-delete --output index.json"
)]
struct IndexArgs {
    /// Directory to index
    path: PathBuf,

    /// Pre-populate options from a TOML config file; CLI flags still win
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Recurse into subdirectories (default: true; use --no-recursive to disable)
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    recursive: bool,

    /// Write a single aggregate JSON document to this path instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write one sidecar JSON per item, in place, instead of an aggregate
    #[arg(long, conflicts_with = "output")]
    inplace: bool,

    /// Also compute SHA-512 (MD5 and SHA-256 are always computed)
    #[arg(long)]
    sha512: bool,

    /// Which digest becomes an entry's `id` field
    #[arg(long, value_enum, default_value = "sha256")]
    id_algorithm: IdAlgorithmArg,

    /// Extract EXIF metadata via `exiftool` (silently skipped if not on PATH)
    #[arg(long)]
    extract_exif: bool,

    /// Fold discovered sidecars into each item's metadata (implies --extract-exif)
    #[arg(long)]
    meta_merge: bool,

    /// Fold sidecars in, then delete the originals (implies --meta-merge; requires --output or --inplace)
    #[arg(long)]
    meta_merge_delete: bool,

    /// Rename files to content-derived canonical names and flag duplicates (implies --inplace)
    #[arg(long)]
    rename: bool,

    /// Compute and print intended actions without writing or renaming anything
    #[arg(long)]
    dry_run: bool,

    /// Tag this run with a session id (defaults to a generated UUID)
    #[arg(long)]
    session_id: Option<String>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum IdAlgorithmArg {
    Md5,
    Sha256,
}

impl From<IdAlgorithmArg> for IdAlgorithm {
    fn from(value: IdAlgorithmArg) -> Self {
        match value {
            IdAlgorithmArg::Md5 => IdAlgorithm::Md5,
            IdAlgorithmArg::Sha256 => IdAlgorithm::Sha256,
        }
    }
}

/// Undo a prior rename/dedup run
#[derive(Args)]
#[command(
    about = "Undo a prior rename/dedup run",
    long_about = "Reconstructs a prior indexing run from whatever it emitted - a single\n\
                  aggregate file or in-place sidecars - and restores renamed files to\n\
                  their original names. Each restore verifies the current file's content\n\
                  hash still matches what was indexed before renaming it back.",
    after_help = "EXAMPLES:\n  \
                  # Roll back using an aggregate file\n  \
                  jozin rollback ~/Photos --from index.json\n\n  \
                  # Roll back using in-place sidecars\n  \
                  jozin rollback ~/Photos --flat"
)]
struct RollbackArgs {
    /// Root directory the original index run covered
    path: PathBuf,

    /// Aggregate index file to restore from (structured mode)
    #[arg(long, value_name = "FILE", conflicts_with = "flat")]
    from: Option<PathBuf>,

    /// Restore from in-place sidecars instead of an aggregate file
    #[arg(long)]
    flat: bool,

    /// Only restrict the rollback to entries from this session id
    #[arg(long)]
    session_id: Option<String>,
}

fn run_index(args: IndexArgs) -> Result<IndexStatus> {
    let file_config = match &args.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };

    let output = if args.inplace {
        OutputConfig { mode: OutputMode::Inplace, file: None }
    } else if let Some(file) = args.output.clone() {
        OutputConfig { mode: OutputMode::File, file: Some(file) }
    } else {
        OutputConfig { mode: OutputMode::Stdout, file: None }
    };

    let session_id = args
        .session_id
        .or(file_config.session_id)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut config = IndexConfig {
        root: args.path,
        recursive: args.recursive && file_config.recursive.unwrap_or(true),
        id_algorithm: args.id_algorithm.into(),
        compute_sha512: args.sha512 || file_config.sha512.unwrap_or(false),
        output,
        extract_exif: args.extract_exif || file_config.extract_exif.unwrap_or(false),
        meta_merge: args.meta_merge || file_config.meta_merge.unwrap_or(false),
        meta_merge_delete: args.meta_merge_delete || file_config.meta_merge_delete.unwrap_or(false),
        rename: args.rename || file_config.rename.unwrap_or(false),
        dry_run: args.dry_run,
        session_id: Some(session_id),
        ..IndexConfig::default()
    };
    config.apply_implications();

    let (_, status) = index_path(&config, None, None)?;
    tracing::info!(?status, "index complete");
    Ok(status)
}

fn run_rollback(args: RollbackArgs) -> Result<()> {
    let mode = if args.flat { RestoreMode::Flat } else { RestoreMode::Structured };
    let source = match (&args.from, mode) {
        (Some(file), RestoreMode::Structured) => file.clone(),
        _ => args.path.clone(),
    };

    let resolver = FilesystemResolver;
    let root_entry = rollback::load(&resolver, &source, mode)?;
    let plan = rollback::plan(&root_entry, args.session_id.as_deref());

    if !plan.mixed_sessions.is_empty() {
        tracing::warn!(
            sessions = ?plan.mixed_sessions,
            "other sessions touched this tree since the run being rolled back"
        );
    }

    let report = rollback::execute(&args.path, &plan, jozin_core::hash::HashAlgorithms::default())?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "restored": report.restored,
        "skipped": report.skipped,
        "conflicted": report.conflicted,
    }))?);
    Ok(())
}

/// Runs `cmd` and resolves it to a process exit code. A successful index
/// run that nonetheless degraded (`CompletedWithWarnings` - a bad sidecar
/// read, a failed dedup-cleanup unlink) exits 1 (spec §6's `PartialFailure`)
/// even though it never raised a `JozinError`; a clean run or a successful
/// rollback exits 0.
fn run_command(cmd: Cmd) -> Result<i32> {
    match cmd {
        Cmd::Index(args) => {
            let status = run_index(args)?;
            Ok(match status {
                IndexStatus::Completed => 0,
                IndexStatus::CompletedWithWarnings => 1,
            })
        }
        Cmd::Rollback(args) => {
            run_rollback(args)?;
            Ok(0)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    match run_command(args.cmd) {
        Ok(exit_code) => exit(exit_code),
        Err(e) => {
            let exit_code = e.exit_code();
            let error_output = serde_json::to_string_pretty(&e).unwrap_or_else(|_| {
                let fallback = serde_json::json!({ "error": e.to_string(), "exit_code": exit_code });
                serde_json::to_string_pretty(&fallback)
                    .unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", e))
            });
            eprintln!("{}", error_output);
            exit(exit_code);
        }
    }
}

