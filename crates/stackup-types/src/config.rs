//! Global configuration types for stackup.
//!
//! `GlobalConfig` represents the per-user `config.toml` in the data
//! directory. It supplies defaults that individual workflow files may
//! override.

use serde::{Deserialize, Serialize};

/// Top-level per-user configuration. All fields have defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalConfig {
    /// Include cache TTL used when a workflow does not set one.
    #[serde(default = "default_cache_ttl_minutes")]
    pub default_cache_ttl_minutes: i64,

    /// Timeout applied to every outbound HTTP/S3 fetch.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Domains allowed in addition to each workflow's own allow-list.
    #[serde(default = "default_allowed_domains")]
    pub default_allowed_domains: Vec<String>,
}

fn default_cache_ttl_minutes() -> i64 {
    15
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "raw.githubusercontent.com".to_string(),
        "api.github.com".to_string(),
        "gist.githubusercontent.com".to_string(),
    ]
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl_minutes: default_cache_ttl_minutes(),
            http_timeout_secs: default_http_timeout_secs(),
            default_allowed_domains: default_allowed_domains(),
        }
    }
}
