//! Content hashing for include checksum verification.
//!
//! Implements the `ContentHasher` trait from `stackup-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256, Sha512};
use stackup_core::hash::ContentHasher;
use stackup_types::checksum::HashAlgorithm;

/// SHA-2 implementation of `ContentHasher`.
///
/// Produces lowercase hex digests for SHA-256 and SHA-512; every other
/// algorithm is reported as unavailable.
pub struct Sha2ContentHasher;

impl Sha2ContentHasher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sha2ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher for Sha2ContentHasher {
    fn compute_hash(&self, algorithm: HashAlgorithm, content: &str) -> Option<String> {
        match algorithm {
            HashAlgorithm::Sha256 => Some(format!("{:x}", Sha256::digest(content.as_bytes()))),
            HashAlgorithm::Sha512 => Some(format!("{:x}", Sha512::digest(content.as_bytes()))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        let hash = Sha2ContentHasher::new().compute_hash(HashAlgorithm::Sha256, "");
        assert_eq!(
            hash.as_deref(),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn test_sha512_is_lowercase_hex() {
        let hash = Sha2ContentHasher::new()
            .compute_hash(HashAlgorithm::Sha512, "tasks: []")
            .unwrap();
        assert_eq!(hash.len(), 128);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_unsupported_algorithms_yield_none() {
        let hasher = Sha2ContentHasher::new();
        assert!(hasher.compute_hash(HashAlgorithm::Md5, "x").is_none());
        assert!(hasher.compute_hash(HashAlgorithm::Sha384, "x").is_none());
    }
}
