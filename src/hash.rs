//! SHA-256 helpers (C1). Treated as a library function per spec.md §1; this
//! module exists only so call sites read `hash::bytes(..)` / `hash::file(..)`
//! instead of repeating the `Digest` trait dance everywhere.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Lower-case hex SHA-256 of the supplied bytes.
pub fn bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Lower-case hex SHA-256 of an entire file's contents, streamed so the
/// whole file is never held in memory at once.
pub fn file(path: &Path) -> Result<String> {
    let f = File::open(path)?;
    let mut reader = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// True if `hex_digest` is a syntactically valid lower-case SHA-256 hex string.
pub fn is_valid_hex_digest(hex_digest: &str) -> bool {
    hex_digest.len() == 64 && hex_digest.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_matches_known_vector() {
        // SHA-256("") per FIPS 180-4 test vectors.
        assert_eq!(
            bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(file(&path).unwrap(), bytes(b"hello world"));
    }

    #[test]
    fn validates_hex_digest_shape() {
        assert!(is_valid_hex_digest(&bytes(b"abc")));
        assert!(!is_valid_hex_digest("not-hex"));
        assert!(!is_valid_hex_digest("ab"));
    }
}
