//! SHA-256 hashing used to gate analyzer binary execution.
//!
//! A scan request names the analyzer binary it expects by content hash; the
//! executor fetches the binary, hashes the bytes actually on disk, and
//! refuses to run anything that doesn't match.

use scanforge_ids::BinaryHash;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Compute the lowercase hex SHA-256 digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("binary hash mismatch: requested {requested}, fetched {fetched}")]
pub struct HashMismatch {
    pub requested: BinaryHash,
    pub fetched: BinaryHash,
}

/// Verify that `data` hashes to `requested`. Used by the Scan Executor's
/// binary-fetch step to reject a mismatched analyzer binary before it is
/// ever executed.
pub fn verify_binary(data: &[u8], requested: &BinaryHash) -> Result<BinaryHash, HashMismatch> {
    let fetched = BinaryHash::parse(sha256_hex(data)).expect("sha256_hex always yields 64 hex chars");
    if &fetched == requested {
        Ok(fetched)
    } else {
        Err(HashMismatch {
            requested: requested.clone(),
            fetched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn verify_binary_accepts_matching_hash() {
        let digest = sha256_hex(b"analyzer-bytes");
        let requested = BinaryHash::parse(digest).unwrap();
        assert_eq!(verify_binary(b"analyzer-bytes", &requested).unwrap(), requested);
    }

    #[test]
    fn verify_binary_rejects_mismatch() {
        let requested = BinaryHash::parse(sha256_hex(b"expected-bytes")).unwrap();
        let err = verify_binary(b"actual-bytes", &requested).unwrap_err();
        assert_eq!(err.requested, requested);
    }
}
