//! Include cache port.
//!
//! A TTL key/value store holding raw include bodies keyed by display name,
//! together with the digest and verification state recorded when each body
//! was fetched. Implementations live in stackup-infra.

use std::future::Future;

use stackup_types::cache::CacheEntry;
use stackup_types::checksum::{ChecksumVerificationState, HashAlgorithm};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache query failed: {0}")]
    Query(String),

    #[error("corrupt cache entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Integrity metadata written together with a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub hash: Option<String>,
    pub algorithm: Option<HashAlgorithm>,
    pub validation_state: ChecksumVerificationState,
}

/// TTL key/value store for include bodies.
///
/// Expiry is checked lazily on read: an expired entry is reported as absent.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait IncludeCache: Send + Sync {
    /// Live entry for `key`, if any.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<CacheEntry>, CacheError>> + Send;

    /// Replace value, metadata and expiry in one write.
    ///
    /// `ttl_minutes <= 0` or a `None` value deletes the key.
    fn set(
        &self,
        key: &str,
        value: Option<&str>,
        ttl_minutes: i64,
        metadata: EntryMetadata,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn has(&self, key: &str) -> impl Future<Output = Result<bool, CacheError>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Delete a key. No-op if it does not exist.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Drop every expired entry. Returns how many were removed.
    fn purge_expired(&self) -> impl Future<Output = Result<u64, CacheError>> + Send;
}
