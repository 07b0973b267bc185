//! Cryptographic operations for stackup.
//!
//! - `hash`: SHA-256/SHA-512 content hashing for include checksums
//! - S3 request signing lives in [`crate::s3`]

pub mod hash;
