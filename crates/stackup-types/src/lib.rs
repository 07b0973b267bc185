//! Shared domain types for stackup.
//!
//! This crate contains the serializable shapes used across the workspace:
//! the workflow definition schema, settings, cache entries, checksum
//! verification state, and expression values.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod cache;
pub mod checksum;
pub mod config;
pub mod script;
pub mod workflow;
