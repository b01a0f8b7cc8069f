//! Streaming SHA-256 verification for staged archives.

use crate::StoreError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::debug;

/// Read size for each digest update; archive size is never bounded by memory.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of the file at `path`, computed in fixed-size chunks.
///
/// An unopenable file and a failure mid-stream are reported as distinct errors.
pub fn sha256_of(path: &Path) -> Result<String, StoreError> {
    let mut file = File::open(path).map_err(|source| StoreError::HashOpen {
        path: path.display().to_string(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(StoreError::HashRead {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    let digest = format!("{:x}", hasher.finalize());
    debug!("sha256 {} ({total} bytes) = {digest}", path.display());
    Ok(digest)
}

/// Lowercase hex SHA-256 of an in-memory buffer.
pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compare the file's digest against `expected`. Returns the actual digest on success.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<String, StoreError> {
    let actual = sha256_of(path)?;
    if actual != expected {
        return Err(StoreError::HashMismatch {
            path: path.display().to_string(),
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(actual)
}
