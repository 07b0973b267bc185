//! User-visible run transcript.
//!
//! Every skip, success and failure decided by the engine is reported through
//! [`StatusReporter`] with the unit's display name. Rendering (symbols,
//! colors) belongs to the binary; logs go through `tracing` separately.

use std::fmt;

/// Outcome class of a reported line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    Skipped,
    Info,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// Sink for transcript lines.
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: Status, message: &str);

    fn success(&self, message: &str) {
        self.report(Status::Success, message);
    }

    fn failure(&self, message: &str) {
        self.report(Status::Failure, message);
    }

    fn skipped(&self, message: &str) {
        self.report(Status::Skipped, message);
    }

    fn info(&self, message: &str) {
        self.report(Status::Info, message);
    }
}

/// Reporter that forwards every line to `tracing`. Useful for embedding and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, status: Status, message: &str) {
        match status {
            Status::Failure => tracing::warn!(%status, "{message}"),
            _ => tracing::info!(%status, "{message}"),
        }
    }
}
