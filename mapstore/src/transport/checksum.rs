//! SHA-256 verification of downloaded region files.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Read chunk size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Lowercase hex SHA-256 of a file's contents.
pub fn calculate_file_checksum(path: &Path) -> Result<String, ChecksumError> {
    let read_error = |source| ChecksumError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(read_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = file.read(&mut buffer).map_err(read_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fails with [`ChecksumError::Mismatch`] unless the file hashes to
/// `expected`. Comparison ignores ASCII case.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), ChecksumError> {
    let actual = calculate_file_checksum(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ChecksumError::Mismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_WORLD_SHA256: &str =
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_known_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Luna.map");
        fs::write(&path, b"hello world").unwrap();

        assert_eq!(calculate_file_checksum(&path).unwrap(), HELLO_WORLD_SHA256);
        verify_checksum(&path, HELLO_WORLD_SHA256).unwrap();
        verify_checksum(&path, &HELLO_WORLD_SHA256.to_uppercase()).unwrap();
    }

    #[test]
    fn test_mismatch_reports_both_digests() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Luna.map");
        fs::write(&path, b"hello world").unwrap();

        match verify_checksum(&path, "00") {
            Err(ChecksumError::Mismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, "00");
                assert_eq!(actual, HELLO_WORLD_SHA256);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_chunk_file_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.map");
        fs::write(&path, vec![0x5Au8; BUFFER_SIZE * 2 + 17]).unwrap();

        let first = calculate_file_checksum(&path).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, calculate_file_checksum(&path).unwrap());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            calculate_file_checksum(Path::new("/nonexistent/Luna.map")),
            Err(ChecksumError::Read { .. })
        ));
    }
}
