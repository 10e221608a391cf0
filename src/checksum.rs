//! Content checksums for before/after comparison of re-encodes.
//!
//! Image boards reject re-uploads by content hash. The CLI shows the SHA-256
//! of the input and the output so a checksum change is visible at a glance.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

/// SHA-256 hash of in-memory bytes, as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_matches_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.bin");
        std::fs::write(&path, b"image bytes").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"image bytes"));
    }

    #[test]
    fn missing_file_errors() {
        assert!(hash_file(Path::new("/nonexistent/file")).is_err());
    }
}
