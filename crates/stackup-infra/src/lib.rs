//! Infrastructure layer for stackup.
//!
//! Implementations of the ports defined in `stackup-core`: the SQLite include
//! cache, the reqwest HTTP/S3 transport, the tokio process runner, SHA-2
//! hashing, plus data-directory and global-config helpers and the
//! notification capability.

pub mod config;
pub mod crypto;
pub mod filesystem;
pub mod http;
pub mod notify;
pub mod process;
pub mod s3;
pub mod sqlite;
