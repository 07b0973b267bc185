//! ContentHasher trait for checksum verification.
//!
//! Defined in stackup-core so the checksum verifier can hash include contents
//! without coupling to a hashing crate. The `Sha2ContentHasher` adapter lives
//! in stackup-infra.

use stackup_types::checksum::HashAlgorithm;

/// Abstraction over content hashing for include verification.
pub trait ContentHasher: Send + Sync {
    /// Compute a lowercase hex digest of `content`.
    ///
    /// Returns `None` for algorithms the implementation cannot compute.
    fn compute_hash(&self, algorithm: HashAlgorithm, content: &str) -> Option<String>;
}

impl<H: ContentHasher + ?Sized> ContentHasher for std::sync::Arc<H> {
    fn compute_hash(&self, algorithm: HashAlgorithm, content: &str) -> Option<String> {
        (**self).compute_hash(algorithm, content)
    }
}
