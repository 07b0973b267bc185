//! SQLite storage layer.
//!
//! The include cache, backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod cache;
pub mod pool;
