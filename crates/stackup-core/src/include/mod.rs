//! Secure include pipeline.
//!
//! An include is a workflow fragment pulled in from a URL, the `gh:`
//! shorthand, an S3 object, or a local file. Remote includes are authorized
//! by the [`gateway::Gateway`], cached through the [`cache::IncludeCache`]
//! port, checksum-verified, and finally merged into the running workflow by
//! the [`resolver::IncludeResolver`].

pub mod cache;
pub mod checksum;
pub mod gateway;
pub mod resolver;
pub mod source;
pub mod transport;

use stackup_types::checksum::TransitionError;

use self::cache::CacheError;
use self::checksum::ChecksumError;
use self::gateway::GatewayError;
use self::transport::TransportError;

/// Errors from resolving one include. All of them are per-include soft
/// failures except [`IncludeError::ChecksumMismatchExit`].
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("invalid include: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("checksum verification failed: {0}")]
    Checksum(#[from] ChecksumError),

    #[error("checksum mismatch for {include}")]
    ChecksumRejected { include: String },

    /// Mismatch with `exit-on-checksum-mismatch` enabled.
    #[error("checksum mismatch for {include}: expected {expected}, got {actual}")]
    ChecksumMismatchExit {
        include: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("include {include} is not a valid workflow fragment: {reason}")]
    Parse { include: String, reason: String },
}

impl IncludeError {
    /// Whether this failure must halt the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChecksumMismatchExit { .. })
    }
}
