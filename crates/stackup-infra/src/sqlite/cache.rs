//! SQLite include cache.
//!
//! Implements `IncludeCache` from `stackup-core`. Rows are bucketed by project
//! so several checkouts can share one database file. Expiry is checked when an
//! entry is read; `purge_expired` only bounds storage.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use stackup_core::include::cache::{CacheError, EntryMetadata, IncludeCache};
use stackup_types::cache::{CacheEntry, expiry_after};
use stackup_types::checksum::{ChecksumVerificationState, HashAlgorithm};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `IncludeCache`.
pub struct SqliteIncludeCache {
    pool: DatabasePool,
    bucket: String,
}

impl SqliteIncludeCache {
    pub fn new(pool: DatabasePool, bucket: impl Into<String>) -> Self {
        Self {
            pool,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct CacheRow {
    key: String,
    value: String,
    hash: Option<String>,
    algorithm: Option<String>,
    validation_state: String,
    expires_at: String,
    updated_at: String,
}

impl CacheRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            hash: row.try_get("hash")?,
            algorithm: row.try_get("algorithm")?,
            validation_state: row.try_get("validation_state")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, CacheError> {
        let corrupt = |reason: String| CacheError::Corrupt {
            key: self.key.clone(),
            reason,
        };
        let validation_state = self
            .validation_state
            .parse::<ChecksumVerificationState>()
            .map_err(corrupt)?;
        let expires_at = parse_datetime(&self.expires_at).map_err(corrupt)?;
        let updated_at = parse_datetime(&self.updated_at).map_err(corrupt)?;
        let algorithm = self
            .algorithm
            .as_deref()
            .and_then(|a| a.parse::<HashAlgorithm>().ok());

        Ok(CacheEntry {
            key: self.key,
            value: self.value,
            hash: self.hash,
            algorithm,
            validation_state,
            expires_at,
            updated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid datetime: {e}"))
}

/// Fixed-width UTC form so stored timestamps compare correctly as text.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn query_err(e: sqlx::Error) -> CacheError {
    CacheError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// IncludeCache implementation
// ---------------------------------------------------------------------------

impl IncludeCache for SqliteIncludeCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT * FROM include_cache WHERE bucket = ? AND key = ?")
            .bind(&self.bucket)
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = CacheRow::from_row(&row).map_err(query_err)?.into_entry()?;
        if entry.is_expired(Utc::now()) {
            tracing::debug!(bucket = %self.bucket, key, "cache entry expired");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        ttl_minutes: i64,
        metadata: EntryMetadata,
    ) -> Result<(), CacheError> {
        let Some(value) = value.filter(|_| ttl_minutes > 0) else {
            return self.remove(key).await;
        };

        let now = Utc::now();
        let expires_at = expiry_after(now, ttl_minutes);

        sqlx::query(
            r#"INSERT INTO include_cache (bucket, key, value, hash, algorithm, validation_state, expires_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (bucket, key) DO UPDATE SET
                   value = excluded.value,
                   hash = excluded.hash,
                   algorithm = excluded.algorithm,
                   validation_state = excluded.validation_state,
                   expires_at = excluded.expires_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&self.bucket)
        .bind(key)
        .bind(value)
        .bind(metadata.hash.as_deref())
        .bind(metadata.algorithm.map(|a| a.as_str()))
        .bind(metadata.validation_state.as_str())
        .bind(format_datetime(&expires_at))
        .bind(format_datetime(&now))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        tracing::debug!(bucket = %self.bucket, key, ttl_minutes, "cache entry written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM include_cache WHERE bucket = ? AND key = ?")
            .bind(&self.bucket)
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM include_cache WHERE expires_at <= ?")
            .bind(format_datetime(&Utc::now()))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use stackup_types::cache::max_expiry;

    use super::*;
    use crate::sqlite::pool::database_url;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(dir.path());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn verified(hash: &str) -> EntryMetadata {
        EntryMetadata {
            hash: Some(hash.to_string()),
            algorithm: Some(HashAlgorithm::Sha256),
            validation_state: ChecksumVerificationState::Verified,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = SqliteIncludeCache::new(test_pool().await, "demo");
        cache
            .set("gh:org/repo/main/a.yaml", Some("tasks: []"), 10, verified("abc"))
            .await
            .unwrap();

        let entry = cache.get("gh:org/repo/main/a.yaml").await.unwrap().unwrap();
        assert_eq!(entry.value, "tasks: []");
        assert_eq!(entry.hash.as_deref(), Some("abc"));
        assert_eq!(entry.algorithm, Some(HashAlgorithm::Sha256));
        assert_eq!(entry.validation_state, ChecksumVerificationState::Verified);
        assert!(cache.has("gh:org/repo/main/a.yaml").await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let cache = SqliteIncludeCache::new(test_pool().await, "demo");
        cache
            .set("k", Some("v"), 1_000_000_000_000, EntryMetadata::default())
            .await
            .unwrap();

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, "v");
        assert_eq!(entry.expires_at, max_expiry());
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_negative_ttl_deletes() {
        let cache = SqliteIncludeCache::new(test_pool().await, "demo");
        cache.set("k", Some("v"), 10, EntryMetadata::default()).await.unwrap();
        cache.set("k", Some("v"), -1, EntryMetadata::default()).await.unwrap();
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_none_value_deletes() {
        let cache = SqliteIncludeCache::new(test_pool().await, "demo");
        cache.set("k", Some("v"), 10, EntryMetadata::default()).await.unwrap();
        cache.set("k", None, 10, EntryMetadata::default()).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_value_and_metadata() {
        let cache = SqliteIncludeCache::new(test_pool().await, "demo");
        cache.set("k", Some("old"), 10, verified("aaa")).await.unwrap();
        cache.set("k", Some("new"), 10, EntryMetadata::default()).await.unwrap();

        let entry = cache.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, "new");
        assert!(entry.hash.is_none());
        assert_eq!(entry.validation_state, ChecksumVerificationState::NotVerified);
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let pool = test_pool().await;
        let a = SqliteIncludeCache::new(pool.clone(), "project-a");
        let b = SqliteIncludeCache::new(pool, "project-b");

        a.set("shared", Some("from a"), 10, EntryMetadata::default()).await.unwrap();
        assert!(b.get("shared").await.unwrap().is_none());
        assert_eq!(a.get("shared").await.unwrap().unwrap().value, "from a");
    }

    #[tokio::test]
    async fn test_expired_rows_are_absent_and_purged() {
        let pool = test_pool().await;
        let cache = SqliteIncludeCache::new(pool.clone(), "demo");
        let past = format_datetime(&(Utc::now() - Duration::minutes(5)));
        sqlx::query(
            "INSERT INTO include_cache (bucket, key, value, validation_state, expires_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("demo")
        .bind("stale")
        .bind("tasks: []")
        .bind("not_verified")
        .bind(&past)
        .bind(&past)
        .execute(&pool.writer)
        .await
        .unwrap();
        cache.set("fresh", Some("v"), 10, EntryMetadata::default()).await.unwrap();

        assert!(cache.get("stale").await.unwrap().is_none());
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.has("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported() {
        let pool = test_pool().await;
        let cache = SqliteIncludeCache::new(pool.clone(), "demo");
        let future = format_datetime(&(Utc::now() + Duration::minutes(5)));
        sqlx::query(
            "INSERT INTO include_cache (bucket, key, value, validation_state, expires_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind("demo")
        .bind("bad")
        .bind("x")
        .bind("half-verified")
        .bind(&future)
        .bind(&future)
        .execute(&pool.writer)
        .await
        .unwrap();

        assert!(matches!(
            cache.get("bad").await,
            Err(CacheError::Corrupt { .. })
        ));
    }
}
