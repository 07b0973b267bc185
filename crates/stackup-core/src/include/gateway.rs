//! Outbound request authorization.
//!
//! Every remote fetch (include bodies, checksum files, S3 objects) passes
//! through the [`Gateway`]. Requests run through an ordered, named chain of
//! request middleware; the first rejection wins. Successful responses then run
//! through the response middleware chain (content-type policy).
//!
//! Built-in request middleware:
//! - `validate-url`: deny list first, then the allow list (exact host or glob
//!   such as `*.example.com`); anything else is "not explicitly allowed".
//! - `verify-file-type`: only `.yaml .yml .txt .sha256 .sha512 .json .js`
//!   paths, or paths without an extension.
//!
//! A disabled gateway bypasses every check.

use std::sync::Arc;

use stackup_types::workflow::{ContentTypeSettings, Settings};
use url::Url;

use super::transport::{FetchedResponse, IncludeTransport, TransportError};

/// Extensions accepted by `verify-file-type`.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["yaml", "yml", "txt", "sha256", "sha512", "json", "js"];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("access to {host} denied: {reason}")]
    Denied { host: String, reason: String },

    #[error("file type '.{extension}' is not allowed for {url}")]
    FileType { url: String, extension: String },

    #[error("content type '{content_type}' from {host} is not allowed")]
    ContentType { host: String, content_type: String },

    #[error(transparent)]
    Fetch(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Runs before a request is sent.
pub type RequestMiddleware = Arc<dyn Fn(&Gateway, &Url) -> Result<(), GatewayError> + Send + Sync>;

/// Runs on a successful response.
pub type ResponseMiddleware =
    Arc<dyn Fn(&Gateway, &Url, &FetchedResponse) -> Result<(), GatewayError> + Send + Sync>;

/// Reject denied hosts, then anything not on the allow list.
pub fn validate_url(gateway: &Gateway, url: &Url) -> Result<(), GatewayError> {
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::InvalidUrl(url.to_string()))?
        .to_lowercase();

    if gateway.blocked_domains.iter().any(|p| host_matches(p, &host)) {
        return Err(GatewayError::Denied {
            host,
            reason: "host is blocked".to_string(),
        });
    }
    if gateway.allowed_domains.iter().any(|p| host_matches(p, &host)) {
        return Ok(());
    }
    Err(GatewayError::Denied {
        host,
        reason: "not explicitly allowed".to_string(),
    })
}

/// Reject paths whose extension is not on [`ALLOWED_EXTENSIONS`].
pub fn verify_file_type(_gateway: &Gateway, url: &Url) -> Result<(), GatewayError> {
    let basename = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or_default();
    let Some((stem, extension)) = basename.rsplit_once('.') else {
        return Ok(());
    };
    if stem.is_empty() {
        // dotfile such as `.env`
        return Err(GatewayError::FileType {
            url: url.to_string(),
            extension: extension.to_string(),
        });
    }
    let extension = extension.to_lowercase();
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(GatewayError::FileType {
            url: url.to_string(),
            extension,
        })
    }
}

/// Check `Content-Type` against the matching host policy, else the global one.
pub fn verify_content_type(
    gateway: &Gateway,
    url: &Url,
    response: &FetchedResponse,
) -> Result<(), GatewayError> {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let Some(content_type) = response.content_type.as_deref() else {
        return Ok(());
    };
    let policy = gateway
        .hosts
        .iter()
        .find(|h| host_matches(&h.pattern, &host))
        .map(|h| &h.content_types)
        .unwrap_or(&gateway.content_types);

    if policy.permits(content_type) {
        Ok(())
    } else {
        Err(GatewayError::ContentType {
            host,
            content_type: content_type.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Policy types
// ---------------------------------------------------------------------------

/// Allow/block lists of MIME patterns (`text/*` style).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypePolicy {
    pub allowed: Vec<String>,
    pub blocked: Vec<String>,
}

impl ContentTypePolicy {
    fn from_settings(settings: &ContentTypeSettings) -> Self {
        let clean = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            allowed: clean(&settings.allowed),
            blocked: clean(&settings.blocked),
        }
    }

    /// Blocked wins; an empty allow list allows everything else.
    pub fn permits(&self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if self.blocked.iter().any(|p| pattern_matches(p, &mime)) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.iter().any(|p| pattern_matches(p, &mime))
    }
}

/// Settings for one host pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPolicy {
    pub pattern: String,
    /// Raw `Name: value` lines, evaluated by the caller before sending.
    pub headers: Vec<String>,
    pub content_types: ContentTypePolicy,
}

// ---------------------------------------------------------------------------
// Normalization & matching
// ---------------------------------------------------------------------------

/// Reduce a domain entry to a lowercase host pattern.
///
/// Blank entries yield `None`; full URLs are reduced to their host.
pub fn normalize_domain(entry: &str) -> Option<String> {
    let trimmed = entry.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        return Url::parse(trimmed)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase));
    }
    let host = trimmed.split('/').next().unwrap_or_default();
    let host = host.rsplit_once(':').map_or(host, |(h, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) { h } else { host }
    });
    (!host.is_empty()).then(|| host.to_lowercase())
}

fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == candidate {
        return true;
    }
    glob::Pattern::new(pattern)
        .map(|p| p.matches(candidate))
        .unwrap_or(false)
}

/// Exact (case-insensitive) or glob host match.
pub fn host_matches(pattern: &str, host: &str) -> bool {
    pattern_matches(&pattern.to_lowercase(), &host.to_lowercase())
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct Gateway {
    enabled: bool,
    allowed_domains: Vec<String>,
    blocked_domains: Vec<String>,
    hosts: Vec<HostPolicy>,
    content_types: ContentTypePolicy,
    request_middleware: Vec<(&'static str, RequestMiddleware)>,
    response_middleware: Vec<(&'static str, ResponseMiddleware)>,
}

impl Gateway {
    /// Gateway with the built-in middleware and the given domain lists.
    pub fn new<A, B>(allowed: A, blocked: B) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        let normalize = |items: Vec<String>| -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for item in items.iter().filter_map(|s| normalize_domain(s)) {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            out
        };

        Self {
            enabled: true,
            allowed_domains: normalize(allowed.into_iter().map(|s| s.as_ref().to_string()).collect()),
            blocked_domains: normalize(blocked.into_iter().map(|s| s.as_ref().to_string()).collect()),
            hosts: Vec::new(),
            content_types: ContentTypePolicy::default(),
            request_middleware: vec![
                ("validate-url", Arc::new(validate_url) as RequestMiddleware),
                ("verify-file-type", Arc::new(verify_file_type) as RequestMiddleware),
            ],
            response_middleware: vec![(
                "verify-content-type",
                Arc::new(verify_content_type) as ResponseMiddleware,
            )],
        }
    }

    /// Build from workflow settings. `default_allowed` (from the global
    /// config) is merged into the workflow's own allow list.
    pub fn from_settings(settings: &Settings, default_allowed: &[String]) -> Self {
        let domains = &settings.domains;
        let allowed = domains.allowed.iter().chain(default_allowed.iter());
        let mut gateway = Self::new(allowed, domains.blocked.iter());
        gateway.enabled = settings.gateway.enabled;
        gateway.content_types = ContentTypePolicy::from_settings(&settings.gateway.content_types);
        gateway.hosts = domains
            .hosts
            .iter()
            .filter_map(|h| {
                Some(HostPolicy {
                    pattern: normalize_domain(&h.hostname)?,
                    headers: h.headers.clone(),
                    content_types: ContentTypePolicy::from_settings(&h.content_types),
                })
            })
            .collect();
        gateway
    }

    /// A gateway that lets everything through.
    pub fn disabled() -> Self {
        let mut gateway = Self::new(Vec::<String>::new(), Vec::<String>::new());
        gateway.enabled = false;
        gateway
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    pub fn blocked_domains(&self) -> &[String] {
        &self.blocked_domains
    }

    pub fn with_content_types(mut self, policy: ContentTypePolicy) -> Self {
        self.content_types = policy;
        self
    }

    pub fn with_host(mut self, policy: HostPolicy) -> Self {
        self.hosts.push(policy);
        self
    }

    /// Append a request middleware; it runs after the existing ones.
    pub fn add_request_middleware(&mut self, name: &'static str, middleware: RequestMiddleware) {
        self.request_middleware.push((name, middleware));
    }

    pub fn request_middleware_names(&self) -> Vec<&'static str> {
        self.request_middleware.iter().map(|(name, _)| *name).collect()
    }

    /// Run the request chain. Returns the parsed URL on success.
    pub fn check_request(&self, url: &str) -> Result<Url, GatewayError> {
        let parsed = Url::parse(url.trim()).map_err(|_| GatewayError::InvalidUrl(url.to_string()))?;
        if !self.enabled {
            return Ok(parsed);
        }
        for (name, middleware) in &self.request_middleware {
            if let Err(e) = middleware(self, &parsed) {
                tracing::debug!(middleware = name, %url, error = %e, "request rejected");
                return Err(e);
            }
        }
        Ok(parsed)
    }

    pub fn allowed(&self, url: &str) -> bool {
        self.check_request(url).is_ok()
    }

    /// Run the response chain.
    pub fn check_response(&self, url: &Url, response: &FetchedResponse) -> Result<(), GatewayError> {
        if !self.enabled {
            return Ok(());
        }
        for (name, middleware) in &self.response_middleware {
            if let Err(e) = middleware(self, url, response) {
                tracing::debug!(middleware = name, %url, error = %e, "response rejected");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Raw header lines configured for every host pattern matching `host`.
    pub fn headers_for(&self, host: &str) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|h| host_matches(&h.pattern, host))
            .flat_map(|h| h.headers.iter().cloned())
            .collect()
    }

    /// Authorize, fetch, and check the response.
    pub async fn get_url<T: IncludeTransport>(
        &self,
        transport: &T,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<String, GatewayError> {
        let parsed = self.check_request(url)?;
        let response = transport.get(&parsed, headers).await?;
        self.check_response(&parsed, &response)?;
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::include::transport::testing::ScriptedTransport;
    use stackup_types::workflow::HostSettings;

    fn gateway() -> Gateway {
        Gateway::new(["raw.githubusercontent.com", "*.github.com"], ["evil.github.com"])
    }

    #[test]
    fn test_allow_list_exact_and_glob() {
        let gw = gateway();
        assert!(gw.allowed("https://raw.githubusercontent.com/x"));
        assert!(gw.allowed("https://api.github.com/repos/a.json"));
        assert!(!gw.allowed("https://evil.test/x"));
    }

    #[test]
    fn test_deny_list_wins() {
        let err = gateway()
            .check_request("https://evil.github.com/a.yaml")
            .unwrap_err();
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn test_not_explicitly_allowed_message() {
        let err = gateway().check_request("https://example.org/a.yaml").unwrap_err();
        assert!(err.to_string().contains("not explicitly allowed"));
    }

    #[test]
    fn test_file_type_filter() {
        let gw = gateway();
        assert!(gw.allowed("https://raw.githubusercontent.com/o/r/main/a.yml"));
        assert!(gw.allowed("https://raw.githubusercontent.com/o/r/main/sha256sum"));
        assert!(gw.allowed("https://raw.githubusercontent.com/o/r/main/"));
        assert!(matches!(
            gw.check_request("https://raw.githubusercontent.com/o/r/main/run.sh"),
            Err(GatewayError::FileType { .. })
        ));
    }

    #[test]
    fn test_disabled_gateway_bypasses_checks() {
        let gw = Gateway::disabled();
        assert!(gw.allowed("https://anything.test/payload.exe"));
        assert!(!gw.allowed("not a url"));
    }

    #[test]
    fn test_domain_normalization() {
        assert_eq!(normalize_domain("  "), None);
        assert_eq!(
            normalize_domain("https://Raw.GithubUserContent.com/org/repo").as_deref(),
            Some("raw.githubusercontent.com")
        );
        assert_eq!(normalize_domain("example.com/path").as_deref(), Some("example.com"));
        assert_eq!(normalize_domain("minio.local:9000").as_deref(), Some("minio.local"));

        let gw = Gateway::new(["", "https://raw.githubusercontent.com/"], Vec::<String>::new());
        assert_eq!(gw.allowed_domains(), ["raw.githubusercontent.com"]);
    }

    #[test]
    fn test_content_type_policy() {
        let policy = ContentTypePolicy {
            allowed: vec!["text/*".to_string(), "application/json".to_string()],
            blocked: vec!["text/html".to_string()],
        };
        assert!(policy.permits("text/plain; charset=utf-8"));
        assert!(policy.permits("application/json"));
        assert!(!policy.permits("text/html"));
        assert!(!policy.permits("application/octet-stream"));
        assert!(ContentTypePolicy::default().permits("anything/else"));
    }

    #[test]
    fn test_host_policy_overrides_global_content_types() {
        let mut settings = Settings::default();
        settings.domains.allowed = vec!["*.github.com".to_string()];
        settings.gateway.content_types.allowed = vec!["application/json".to_string()];
        settings.domains.hosts = vec![HostSettings {
            hostname: "api.github.com".to_string(),
            headers: vec!["Authorization: token abc".to_string()],
            content_types: ContentTypeSettings {
                allowed: vec!["text/*".to_string()],
                blocked: vec![],
            },
        }];
        let gw = Gateway::from_settings(&settings, &[]);
        let response = FetchedResponse {
            body: String::new(),
            content_type: Some("text/plain".to_string()),
        };

        let api = Url::parse("https://api.github.com/a.yaml").unwrap();
        let gist = Url::parse("https://gist.github.com/a.yaml").unwrap();
        assert!(gw.check_response(&api, &response).is_ok());
        assert!(gw.check_response(&gist, &response).is_err());
        assert_eq!(gw.headers_for("api.github.com"), vec!["Authorization: token abc"]);
        assert!(gw.headers_for("gist.github.com").is_empty());
    }

    #[test]
    fn test_custom_middleware_runs_in_order() {
        let mut gw = gateway();
        gw.add_request_middleware(
            "no-http",
            Arc::new(|_: &Gateway, url: &Url| {
                if url.scheme() == "http" {
                    Err(GatewayError::Denied {
                        host: url.host_str().unwrap_or_default().to_string(),
                        reason: "plain http".to_string(),
                    })
                } else {
                    Ok(())
                }
            }),
        );
        assert_eq!(
            gw.request_middleware_names(),
            vec!["validate-url", "verify-file-type", "no-http"]
        );
        assert!(!gw.allowed("http://raw.githubusercontent.com/a.yaml"));
        assert!(gw.allowed("https://raw.githubusercontent.com/a.yaml"));
    }

    #[test]
    fn test_global_defaults_merged_into_allow_list() {
        let gw = Gateway::from_settings(&Settings::default(), &["gist.githubusercontent.com".to_string()]);
        assert!(gw.allowed("https://gist.githubusercontent.com/u/abc/raw/a.yaml"));
    }

    #[tokio::test]
    async fn test_get_url_gates_and_fetches() {
        let transport = ScriptedTransport::default()
            .with("https://raw.githubusercontent.com/o/r/main/a.yaml", "tasks: []")
            .with_content_type("https://api.github.com/page.json", "<html>", "text/html");
        let gw = gateway().with_content_types(ContentTypePolicy {
            allowed: vec![],
            blocked: vec!["text/html".to_string()],
        });

        let body = gw
            .get_url(&transport, "https://raw.githubusercontent.com/o/r/main/a.yaml", &[])
            .await
            .unwrap();
        assert_eq!(body, "tasks: []");

        assert!(matches!(
            gw.get_url(&transport, "https://evil.test/a.yaml", &[]).await,
            Err(GatewayError::Denied { .. })
        ));
        assert!(matches!(
            gw.get_url(&transport, "https://api.github.com/page.json", &[]).await,
            Err(GatewayError::ContentType { .. })
        ));
        assert!(matches!(
            gw.get_url(&transport, "https://raw.githubusercontent.com/missing.yaml", &[]).await,
            Err(GatewayError::Fetch(_))
        ));
        assert_eq!(transport.requested().len(), 3);
    }
}
