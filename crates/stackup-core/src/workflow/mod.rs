//! Workflow engine: definition parsing, task lifecycle, and the run driver.
//!
//! - `definition` -- YAML parsing, validation, file discovery
//! - `expression` -- JEXL evaluator and the `{{ }}` delimiter helpers
//! - `capability` -- named script capabilities installed into the evaluator
//! - `context` -- execution context: variables, current-task stack
//! - `model` -- the `Workflow` aggregate and include merging
//! - `task` -- task lifecycle (guards, run limits, sync/detached execution)
//! - `precondition` -- the fail-fast precondition gate
//! - `scheduler` -- cron registration with overlap skipping
//! - `driver` -- startup → preconditions → servers → scheduler → idle → shutdown

pub mod capability;
pub mod context;
pub mod definition;
pub mod driver;
pub mod expression;
pub mod model;
pub mod precondition;
pub mod scheduler;
pub mod task;
