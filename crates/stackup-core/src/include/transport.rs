//! Include transport port.
//!
//! Raw fetches only; authorization happens in the gateway before a URL ever
//! reaches a transport. Implementations live in stackup-infra.

use std::future::Future;
use std::path::Path;

use url::Url;

use super::source::S3Location;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("reading {path} failed: {reason}")]
    Io { path: String, reason: String },
}

/// Body and content type of a successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedResponse {
    pub body: String,
    pub content_type: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

/// Fetches include bodies and checksum files.
pub trait IncludeTransport: Send + Sync {
    /// HTTP(S) GET with extra headers.
    fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<FetchedResponse, TransportError>> + Send;

    /// Path-style S3 GetObject; unsigned when `credentials` is `None`.
    fn get_s3(
        &self,
        location: &S3Location,
        credentials: Option<&S3Credentials>,
        secure: bool,
    ) -> impl Future<Output = Result<FetchedResponse, TransportError>> + Send;

    fn read_file(&self, path: &Path) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// Parse `Name: value` header lines. Malformed lines are dropped.
pub fn parse_header_lines<'a, I>(lines: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.is_empty() {
                tracing::warn!(header = line, "ignoring malformed header");
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Overlay `overrides` on `base`; header names compare case-insensitively.
pub fn merge_headers(
    base: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = base
        .into_iter()
        .filter(|(name, _)| !overrides.iter().any(|(o, _)| o.eq_ignore_ascii_case(name)))
        .collect();
    merged.extend(overrides);
    merged
}
