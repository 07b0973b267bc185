//! Checksum algorithm and verification-state types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// HashAlgorithm
// ---------------------------------------------------------------------------

/// Hash algorithm of a discovered checksum.
///
/// Only `Sha256` and `Sha512` can be used for comparison; every other
/// variant is recognized so it can be reported, then rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md4,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Unsupported,
}

impl HashAlgorithm {
    /// Whether content can be hashed and compared with this algorithm.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Sha256 | Self::Sha512)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md4 => "md4",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = std::convert::Infallible;

    /// Unknown names parse to `Unsupported` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "md4" => Self::Md4,
            "md5" => Self::Md5,
            "sha1" => Self::Sha1,
            "sha224" => Self::Sha224,
            "sha256" => Self::Sha256,
            "sha384" => Self::Sha384,
            "sha512" => Self::Sha512,
            _ => Self::Unsupported,
        })
    }
}

// ---------------------------------------------------------------------------
// ChecksumVerificationState
// ---------------------------------------------------------------------------

/// Error returned for a transition the state table does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid checksum state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: ChecksumVerificationState,
    pub to: ChecksumVerificationState,
}

/// One result of a pending verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumOutcome {
    Matched,
    Mismatched,
    Failed,
}

/// Verification progress of an include.
///
/// Transition table:
/// `NotVerified -> Pending`, `Pending -> {Verified, Mismatch, Error}`.
/// `Verified`, `Mismatch` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumVerificationState {
    #[default]
    NotVerified,
    Pending,
    Verified,
    Mismatch,
    Error,
}

impl ChecksumVerificationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Mismatch | Self::Error)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotVerified, Self::Pending)
                | (Self::Pending, Self::Verified)
                | (Self::Pending, Self::Mismatch)
                | (Self::Pending, Self::Error)
        )
    }

    /// Advance to `next`, refusing anything outside the transition table.
    pub fn transition(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    /// Settle a pending state from every outcome produced by one step.
    ///
    /// `Failed` beats `Mismatched`, which beats `Matched`. No outcomes at all
    /// settles to `Error`.
    pub fn settle<I>(self, outcomes: I) -> Result<Self, TransitionError>
    where
        I: IntoIterator<Item = ChecksumOutcome>,
    {
        let mut saw_any = false;
        let mut mismatched = false;
        for outcome in outcomes {
            saw_any = true;
            match outcome {
                ChecksumOutcome::Failed => return self.transition(Self::Error),
                ChecksumOutcome::Mismatched => mismatched = true,
                ChecksumOutcome::Matched => {}
            }
        }

        let next = match (saw_any, mismatched) {
            (false, _) => Self::Error,
            (true, true) => Self::Mismatch,
            (true, false) => Self::Verified,
        };
        self.transition(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotVerified => "not_verified",
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Mismatch => "mismatch",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChecksumVerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumVerificationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_verified" => Ok(Self::NotVerified),
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "mismatch" => Ok(Self::Mismatch),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown verification state '{other}'")),
        }
    }
}
