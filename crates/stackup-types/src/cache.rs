//! Include cache entry type.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::{ChecksumVerificationState, HashAlgorithm};

/// 9999-12-31T23:59:59Z, the last instant with a four-digit RFC 3339 year.
const MAX_EXPIRY_SECS: i64 = 253_402_300_799;

/// Latest expiry a cache entry can carry.
pub fn max_expiry() -> DateTime<Utc> {
    DateTime::from_timestamp(MAX_EXPIRY_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Expiry `ttl_minutes` after `now`, clamped to [`max_expiry`].
pub fn expiry_after(now: DateTime<Utc>, ttl_minutes: i64) -> DateTime<Utc> {
    TimeDelta::try_minutes(ttl_minutes)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .map_or_else(max_expiry, |at| at.min(max_expiry()))
}

/// A cached include body plus what is known about its integrity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Include display name.
    pub key: String,
    /// Raw include contents.
    pub value: String,
    /// Hex digest of `value` computed with `algorithm`.
    pub hash: Option<String>,
    pub algorithm: Option<HashAlgorithm>,
    /// Verification state reached when the entry was written.
    pub validation_state: ChecksumVerificationState,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the entry was verified when written and its hash still holds.
    ///
    /// `hash_of` computes the digest of `value` for the stored algorithm.
    pub fn is_verified_with<F>(&self, hash_of: F) -> bool
    where
        F: FnOnce(HashAlgorithm, &str) -> Option<String>,
    {
        if self.validation_state != ChecksumVerificationState::Verified {
            return false;
        }
        match (&self.hash, self.algorithm) {
            (Some(stored), Some(algorithm)) => hash_of(algorithm, &self.value)
                .is_some_and(|computed| computed.eq_ignore_ascii_case(stored)),
            _ => false,
        }
    }
}
