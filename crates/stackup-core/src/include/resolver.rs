//! Include resolution: authorize, look up the cache, fetch, verify, merge.
//!
//! Each declared include is processed once, concurrently with its siblings.
//! Failures stay with the include that caused them (its tasks are simply
//! absent) except a checksum mismatch under `exit-on-checksum-mismatch`,
//! which is returned as a fatal [`IncludeError::ChecksumMismatchExit`].

use std::sync::Arc;

use stackup_types::checksum::{ChecksumOutcome, ChecksumVerificationState, HashAlgorithm};
use stackup_types::workflow::IncludeDefinition;
use tokio::task::JoinSet;
use url::Url;

use super::IncludeError;
use super::cache::{CacheError, EntryMetadata, IncludeCache};
use super::checksum::{ChecksumCheck, ChecksumVerifier};
use super::gateway::{Gateway, GatewayError};
use super::source::IncludeSource;
use super::transport::{IncludeTransport, S3Credentials, merge_headers, parse_header_lines};
use crate::hash::ContentHasher;
use crate::workflow::definition::parse_fragment_yaml;
use crate::workflow::expression::normalize_env_shorthand;
use crate::workflow::model::{MergeSummary, Workflow};

/// Outcome of one successfully merged include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInclude {
    pub name: String,
    pub from_cache: bool,
    pub validation_state: ChecksumVerificationState,
    /// Digest of the merged contents, when known.
    pub hash: Option<String>,
    pub found_checksum: Option<String>,
    pub algorithm: Option<HashAlgorithm>,
    pub merge: MergeSummary,
}

impl ResolvedInclude {
    fn status_line(&self) -> String {
        let origin = if self.from_cache { "cached" } else { "fetched" };
        let checksum = match self.validation_state {
            ChecksumVerificationState::Verified => "checksum verified",
            _ => "checksum not verified",
        };
        format!(
            "{} ({origin}, {checksum}, {} task(s), {} precondition(s))",
            self.name, self.merge.tasks_added, self.merge.preconditions_added
        )
    }
}

/// Contents plus what is known about their integrity.
struct Loaded {
    contents: String,
    from_cache: bool,
    state: ChecksumVerificationState,
    check: Option<ChecksumCheck>,
}

pub struct IncludeResolver<C, T, H> {
    cache: Arc<C>,
    transport: Arc<T>,
    hasher: Arc<H>,
    gateway: Arc<Gateway>,
    default_ttl_minutes: i64,
}

impl<C, T, H> IncludeResolver<C, T, H>
where
    C: IncludeCache + 'static,
    T: IncludeTransport + 'static,
    H: ContentHasher + 'static,
{
    pub fn new(
        cache: Arc<C>,
        transport: Arc<T>,
        hasher: Arc<H>,
        gateway: Arc<Gateway>,
        default_ttl_minutes: i64,
    ) -> Self {
        Self {
            cache,
            transport,
            hasher,
            gateway,
            default_ttl_minutes,
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Drop expired cache rows. Correctness never depends on this.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        self.cache.purge_expired().await
    }

    /// Resolve every include of `workflow` concurrently and wait for all.
    ///
    /// Soft failures are reported and dropped; the first fatal failure is
    /// returned once every worker has finished.
    pub async fn resolve_all(
        self: &Arc<Self>,
        workflow: &Arc<Workflow>,
    ) -> Result<Vec<ResolvedInclude>, IncludeError> {
        let mut workers = JoinSet::new();
        for include in workflow.includes().iter().cloned() {
            let resolver = Arc::clone(self);
            let workflow = Arc::clone(workflow);
            workers.spawn(async move {
                let name = include.display_name();
                (name, resolver.process(&workflow, &include).await)
            });
        }

        let mut resolved = Vec::new();
        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(include))) => resolved.push(include),
                Ok((name, Err(e))) => {
                    tracing::warn!(include = %name, error = %e, "include failed");
                    workflow.reporter().failure(&format!("{name}: {e}"));
                    if e.is_fatal() && fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => tracing::error!(error = %e, "include worker panicked"),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(resolved),
        }
    }

    /// Resolve one include and merge it into `workflow`.
    pub async fn process(
        &self,
        workflow: &Workflow,
        include: &IncludeDefinition,
    ) -> Result<ResolvedInclude, IncludeError> {
        let name = include.display_name();
        let source = IncludeSource::from_definition(include, workflow.context().working_dir())?;

        if let Some(url) = source.gateway_url() {
            self.gateway.check_request(&url)?;
        }

        let settings = workflow.settings();
        let verify = settings.checksum_verification
            && include.verify.unwrap_or(true)
            && matches!(source, IncludeSource::Http(_));

        let loaded = self.load(workflow, include, &source, &name, verify).await?;

        match loaded.state {
            ChecksumVerificationState::Mismatch => {
                let (expected, actual) = loaded
                    .check
                    .as_ref()
                    .map(|c| (c.discovered.checksum.clone(), c.hash.clone()))
                    .unwrap_or_default();
                if settings.exit_on_checksum_mismatch {
                    return Err(IncludeError::ChecksumMismatchExit {
                        include: name,
                        expected,
                        actual,
                    });
                }
                return Err(IncludeError::ChecksumRejected { include: name });
            }
            ChecksumVerificationState::Verified | ChecksumVerificationState::NotVerified => {}
            other => {
                return Err(IncludeError::InvalidSource(format!(
                    "{name} left in checksum state {other}"
                )));
            }
        }

        let fragment = parse_fragment_yaml(&loaded.contents).map_err(|e| IncludeError::Parse {
            include: name.clone(),
            reason: e.to_string(),
        })?;
        let merge = workflow.merge_fragment(fragment).await;

        let resolved = ResolvedInclude {
            name,
            from_cache: loaded.from_cache,
            validation_state: loaded.state,
            hash: loaded.check.as_ref().map(|c| c.hash.clone()),
            found_checksum: loaded.check.as_ref().map(|c| c.discovered.checksum.clone()),
            algorithm: loaded.check.as_ref().map(|c| c.discovered.algorithm),
            merge,
        };
        tracing::info!(
            include = %resolved.name,
            from_cache = resolved.from_cache,
            state = %resolved.validation_state,
            tasks = resolved.merge.tasks_added,
            "include merged"
        );
        workflow.reporter().success(&resolved.status_line());
        Ok(resolved)
    }

    /// Produce contents and a settled verification state.
    ///
    /// Checksum errors settle the state to `Error` and are returned as-is.
    async fn load(
        &self,
        workflow: &Workflow,
        include: &IncludeDefinition,
        source: &IncludeSource,
        name: &str,
        verify: bool,
    ) -> Result<Loaded, IncludeError> {
        let cached = match source {
            IncludeSource::Http(_) => match self.cache.get(name).await {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(include = name, error = %e, "cache lookup failed, fetching");
                    None
                }
            },
            _ => None,
        };

        if let Some(entry) = cached {
            let reusable = verify && entry.is_verified_with(|alg, v| self.hasher.compute_hash(alg, v));
            if reusable || !verify {
                tracing::debug!(include = name, reusable, "include served from cache");
                let state = if reusable {
                    ChecksumVerificationState::NotVerified
                        .transition(ChecksumVerificationState::Pending)?
                        .settle([ChecksumOutcome::Matched])?
                } else {
                    ChecksumVerificationState::NotVerified
                };
                return Ok(Loaded {
                    check: None,
                    contents: entry.value,
                    from_cache: true,
                    state,
                });
            }

            let (state, check) = self.verify(workflow, include, source, &entry.value).await?;
            self.store(workflow, name, &entry.value, state, check.as_ref()).await;
            return Ok(Loaded {
                contents: entry.value,
                from_cache: true,
                state,
                check,
            });
        }

        let contents = self.fetch(workflow, include, source).await?;
        let (state, check) = if verify {
            self.verify(workflow, include, source, &contents).await?
        } else {
            (ChecksumVerificationState::NotVerified, None)
        };

        if matches!(source, IncludeSource::Http(_)) {
            self.store(workflow, name, &contents, state, check.as_ref()).await;
        }

        Ok(Loaded {
            contents,
            from_cache: false,
            state,
            check,
        })
    }

    async fn fetch(
        &self,
        workflow: &Workflow,
        include: &IncludeDefinition,
        source: &IncludeSource,
    ) -> Result<String, IncludeError> {
        match source {
            IncludeSource::Http(url) => {
                let headers = self.request_headers(workflow, include, url.host_str()).await;
                Ok(self.gateway.get_url(self.transport.as_ref(), url.as_str(), &headers).await?)
            }
            IncludeSource::S3 { location, secure } => {
                let credentials = match (&include.access_key, &include.secret_key) {
                    (Some(access), Some(secret)) => Some(S3Credentials {
                        access_key: expand_value(workflow, access).await,
                        secret_key: expand_value(workflow, secret).await,
                    }),
                    _ => None,
                };
                let response = self
                    .transport
                    .get_s3(location, credentials.as_ref(), *secure)
                    .await?;
                // Authorized in `process`; only the response chain is left.
                let raw = location.url(*secure);
                let url = Url::parse(&raw).map_err(|_| GatewayError::InvalidUrl(raw))?;
                self.gateway.check_response(&url, &response)?;
                Ok(response.body)
            }
            IncludeSource::File(path) => Ok(self.transport.read_file(path).await?),
        }
    }

    async fn verify(
        &self,
        workflow: &Workflow,
        include: &IncludeDefinition,
        source: &IncludeSource,
        contents: &str,
    ) -> Result<(ChecksumVerificationState, Option<ChecksumCheck>), IncludeError> {
        let IncludeSource::Http(url) = source else {
            return Ok((ChecksumVerificationState::NotVerified, None));
        };

        let pending = ChecksumVerificationState::NotVerified
            .transition(ChecksumVerificationState::Pending)?;
        let headers = self.request_headers(workflow, include, url.host_str()).await;
        let verifier = ChecksumVerifier::new(&self.gateway, self.transport.as_ref(), self.hasher.as_ref());

        match verifier
            .validate_checksum(url, include.checksum_url.as_deref(), &headers, contents)
            .await
        {
            Ok(check) => {
                let outcome = if check.valid {
                    ChecksumOutcome::Matched
                } else {
                    ChecksumOutcome::Mismatched
                };
                Ok((pending.settle([outcome])?, Some(check)))
            }
            Err(e) => {
                let state = pending.settle([ChecksumOutcome::Failed])?;
                tracing::warn!(include = %url, %state, error = %e, "checksum verification failed");
                Err(e.into())
            }
        }
    }

    async fn store(
        &self,
        workflow: &Workflow,
        name: &str,
        contents: &str,
        state: ChecksumVerificationState,
        check: Option<&ChecksumCheck>,
    ) {
        let (hash, algorithm) = match check {
            Some(check) => (Some(check.hash.clone()), Some(check.discovered.algorithm)),
            None => (
                self.hasher.compute_hash(HashAlgorithm::Sha256, contents),
                Some(HashAlgorithm::Sha256),
            ),
        };
        let ttl = workflow
            .settings()
            .cache
            .ttl_minutes
            .unwrap_or(self.default_ttl_minutes);
        let metadata = EntryMetadata {
            hash,
            algorithm,
            validation_state: state,
        };
        if let Err(e) = self.cache.set(name, Some(contents), ttl, metadata).await {
            tracing::warn!(include = name, error = %e, "failed to cache include");
        }
    }

    /// Host headers from settings overlaid by the include's own headers, with
    /// `$VAR` and `{{ }}` values expanded.
    async fn request_headers(
        &self,
        workflow: &Workflow,
        include: &IncludeDefinition,
        host: Option<&str>,
    ) -> Vec<(String, String)> {
        let host_lines = host.map(|h| self.gateway.headers_for(h)).unwrap_or_default();
        let merged = merge_headers(
            parse_header_lines(host_lines.iter().map(String::as_str)),
            parse_header_lines(include.headers.iter().map(String::as_str)),
        );

        let mut headers = Vec::with_capacity(merged.len());
        for (name, value) in merged {
            headers.push((name, expand_value(workflow, &value).await));
        }
        headers
    }
}

/// Expand a configuration value: `{{ expr }}` or bare `$VAR` is evaluated,
/// then any remaining `$VAR` tokens are substituted from the environment.
async fn expand_value(workflow: &Workflow, raw: &str) -> String {
    let normalized = normalize_env_shorthand(raw);
    let evaluated = match workflow.evaluate_text(&normalized).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "could not evaluate header value");
            return String::new();
        }
    };
    substitute_env_tokens(&evaluated, |name| {
        workflow.context().variables().env_value(name)
    })
}

/// Replace `$NAME` tokens using `lookup`; unknown names become empty.
pub fn substitute_env_tokens<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if end == start {
            out.push('$');
        } else {
            out.push_str(&lookup(&input[start..end]).unwrap_or_default());
        }
    }
    out
}
