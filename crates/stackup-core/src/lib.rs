//! Engine logic and port traits for stackup.
//!
//! This crate owns the workflow model (tasks, preconditions, the cron
//! scheduler, the lifecycle driver) and the secure include pipeline (gateway,
//! cache, checksum discovery, resolution). Everything that touches the outside
//! world is reached through a trait defined here and implemented in
//! `stackup-infra`.

pub mod hash;
pub mod include;
pub mod process;
pub mod report;
pub mod workflow;
