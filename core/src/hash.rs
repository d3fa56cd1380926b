//! Hasher (C1) - multi-algorithm streaming hashing of byte sources.
//!
//! Reading a file exactly once and fanning out each chunk to every active
//! algorithm state is mandatory, not an optimization: it keeps the cost of
//! adding SHA-512 to a dual-hash default independent of file size.

use md5::{Digest, Md5};
use sha2::{Sha256, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

use crate::{JozinError, Result};

/// 64 KiB is the fixed chunk size for every streaming hash read.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

/// The single algorithm promoted to an entry's `id` field. A file's `id` is
/// always derived from its full content hash; a directory's `id` from its
/// two-layer name hash (see `entry::compute_directory_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdAlgorithm {
    Md5,
    Sha256,
}

/// Computes a single algorithm's digest directly, without building a full
/// `HashSet`. Used by the directory id's two-layer hash, which only ever
/// needs the one algorithm selected for `id_algorithm`.
pub fn digest_bytes_single(bytes: &[u8], algo: IdAlgorithm) -> String {
    match algo {
        IdAlgorithm::Md5 => {
            let mut h = Md5::new();
            h.update(bytes);
            hex_upper(&h.finalize())
        }
        IdAlgorithm::Sha256 => {
            let mut h = Sha256::new();
            h.update(bytes);
            hex_upper(&h.finalize())
        }
    }
}

/// Digests the NFC-normalized UTF-8 encoding of `name` with a single
/// algorithm (invariant I7).
pub fn digest_name_single(name: &str, algo: IdAlgorithm) -> String {
    let normalized: String = name.nfc().collect();
    digest_bytes_single(normalized.as_bytes(), algo)
}

/// Which algorithms to compute for a given hash pass. MD5 and SHA-256 are
/// always active; SHA-512 is opt-in. SHA-1 is never emitted (spec C1 contract).
#[derive(Debug, Clone, Copy)]
pub struct HashAlgorithms {
    pub sha512: bool,
}

impl Default for HashAlgorithms {
    fn default() -> Self {
        HashAlgorithms { sha512: false }
    }
}

/// Uppercase-hex digests for whichever algorithms were active. Absent
/// algorithms are omitted from serialization, never null (see `HashSet`
/// field order: md5, sha256, sha512?).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HashSet {
    pub md5: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

struct HashState {
    md5: Md5,
    sha256: Sha256,
    sha512: Option<Sha512>,
}

impl HashState {
    fn new(algorithms: HashAlgorithms) -> Self {
        HashState {
            md5: Md5::new(),
            sha256: Sha256::new(),
            sha512: if algorithms.sha512 {
                Some(Sha512::new())
            } else {
                None
            },
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        self.md5.update(chunk);
        self.sha256.update(chunk);
        if let Some(sha512) = self.sha512.as_mut() {
            sha512.update(chunk);
        }
    }

    fn finish(self) -> HashSet {
        HashSet {
            md5: hex_upper(&self.md5.finalize()),
            sha256: hex_upper(&self.sha256.finalize()),
            sha512: self.sha512.map(|h| hex_upper(&h.finalize())),
        }
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02X}", b));
    }
    s
}

/// Hashes a file's contents in one pass, fanning chunks out to every active
/// algorithm. Reads exactly once regardless of how many algorithms are active.
pub fn hash_file(path: &Path, algorithms: HashAlgorithms) -> Result<HashSet> {
    let mut file = File::open(path).map_err(|e| JozinError::IoError {
        message: format!("{}: {}", path.display(), e),
    })?;
    let mut state = HashState::new(algorithms);
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = read_full(&mut file, &mut buf).map_err(|e| JozinError::IoError {
            message: format!("{}: {}", path.display(), e),
        })?;
        if n == 0 {
            break;
        }
        state.update(&buf[..n]);
    }
    Ok(state.finish())
}

/// Hashes an in-memory byte sequence.
pub fn hash_bytes(bytes: &[u8], algorithms: HashAlgorithms) -> HashSet {
    let mut state = HashState::new(algorithms);
    state.update(bytes);
    state.finish()
}

/// Hashes the NFC-normalized UTF-8 encoding of a name string (invariant I7).
/// This guarantees cross-platform determinism even though HFS+ stores
/// decomposed (NFD) filenames.
pub fn hash_name(name: &str, algorithms: HashAlgorithms) -> HashSet {
    let normalized: String = name.nfc().collect();
    hash_bytes(normalized.as_bytes(), algorithms)
}

/// Precomputed digests of the empty byte sequence, used as the inner-hash
/// component for root directories whose parent name is empty.
pub fn null_hashes(algorithms: HashAlgorithms) -> HashSet {
    hash_bytes(&[], algorithms)
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    match reader.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => read_full(reader, buf),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn hash_bytes_matches_hash_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hello").unwrap();
        f.flush().unwrap();

        let from_file = hash_file(f.path(), HashAlgorithms::default()).unwrap();
        let from_bytes = hash_bytes(b"hello", HashAlgorithms::default());
        assert_eq!(from_file, from_bytes);
        assert_eq!(from_file.md5, "5D41402ABC4B2A76B9719D911017C592");
    }

    #[test]
    fn sha512_omitted_when_not_requested() {
        let h = hash_bytes(b"hello", HashAlgorithms::default());
        assert!(h.sha512.is_none());
        let h2 = hash_bytes(b"hello", HashAlgorithms { sha512: true });
        assert!(h2.sha512.is_some());
    }

    #[test]
    fn hash_name_normalizes_nfc() {
        // "é" as NFD (e + combining acute) vs NFC (precomposed) must hash the same.
        let nfc = "\u{00e9}";
        let nfd = "e\u{0301}";
        assert_eq!(
            hash_name(nfc, HashAlgorithms::default()),
            hash_name(nfd, HashAlgorithms::default())
        );
    }

    #[test]
    fn null_hashes_are_empty_digest() {
        let nulls = null_hashes(HashAlgorithms::default());
        assert_eq!(nulls, hash_bytes(&[], HashAlgorithms::default()));
    }
}
