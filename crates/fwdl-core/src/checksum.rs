//! SHA-256 of finished downloads.
//!
//! Hashing runs once over the completed temp file, never inline with the
//! stream loop.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::DownloadError;

const BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 of a file and return the digest as lowercase hex.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes `path` on the blocking pool and compares against `expected`
/// (hex, case-insensitive).
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let owned: PathBuf = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || sha256_path(&owned))
        .await
        .map_err(DownloadError::storage)?
        .map_err(|e| DownloadError::Storage(format!("{e:#}")))?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(
            sha256_path(f.path()).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn verify_matches_case_insensitively() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        verify_sha256(f.path(), &HELLO_SHA256.to_uppercase())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verify_reports_mismatch() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello!\n").unwrap();
        f.flush().unwrap();
        match verify_sha256(f.path(), HELLO_SHA256).await {
            Err(DownloadError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, HELLO_SHA256);
                assert_ne!(actual, HELLO_SHA256);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_missing_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify_sha256(&dir.path().join("gone"), HELLO_SHA256)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Storage(_)));
    }
}
