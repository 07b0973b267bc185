//! Checksum discovery and verification for remote includes.
//!
//! Discovery tries an ordered list of checksum-file URLs next to the include
//! (an explicit `checksum-url` first), each fetched through the gateway. The
//! first file that fetches successfully is searched for the include's
//! filename; the algorithm comes from the checksum file's name or, failing
//! that, from the digest length.

use stackup_types::checksum::HashAlgorithm;
use url::Url;

use super::gateway::{Gateway, GatewayError};
use super::transport::IncludeTransport;
use crate::hash::ContentHasher;

/// Checksum file names tried next to the include, in order.
pub const CHECKSUM_FILE_NAMES: [&str; 5] = [
    "checksums.txt",
    "checksums.sha256.txt",
    "checksums.sha512.txt",
    "sha256sum",
    "sha512sum",
];

/// Shortest digest accepted from a `hash  filename` line or a bare token.
const MIN_HEX_LEN: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("no checksum file found for {0}")]
    NotFound(String),

    #[error("checksum file {url} contains no checksum")]
    Empty { url: String },

    #[error("unsupported hash algorithm '{0}'")]
    UnsupportedAlgorithm(HashAlgorithm),
}

/// A checksum located for an include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredChecksum {
    /// Checksum file it was read from.
    pub source_url: String,
    pub checksum: String,
    pub algorithm: HashAlgorithm,
}

/// Result of comparing contents against a discovered checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumCheck {
    pub valid: bool,
    /// Digest of the contents.
    pub hash: String,
    pub discovered: DiscoveredChecksum,
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Candidate checksum-file URLs for `include_url`, in the order they are tried.
pub fn checksum_candidates(include_url: &Url, explicit: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();

    for name in CHECKSUM_FILE_NAMES {
        if let Ok(url) = include_url.join(name) {
            candidates.push(url.to_string());
        }
    }

    let mut bare = include_url.clone();
    bare.set_query(None);
    bare.set_fragment(None);
    candidates.push(format!("{bare}.sha256"));
    candidates.push(format!("{bare}.sha512"));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Extract the checksum for `file_name` from a checksum file body.
///
/// Tries, in order: a `hash<ws>filename` line (hash of at least 48 hex
/// characters, `*` binary marker and `./` prefix ignored), any bare token of
/// 48+ hex characters, then the whole trimmed body.
pub fn find_checksum_line(body: &str, file_name: &str) -> Option<String> {
    for line in body.lines() {
        let mut tokens = line.split_whitespace();
        let (Some(hash), Some(name)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let name = name.trim_start_matches('*').trim_start_matches("./");
        let name_matches = name == file_name || name.ends_with(&format!("/{file_name}"));
        if name_matches && hash.len() >= MIN_HEX_LEN && is_hex(hash) {
            return Some(hash.to_string());
        }
    }

    if let Some(token) = body
        .split_whitespace()
        .find(|t| t.len() >= MIN_HEX_LEN && is_hex(t))
    {
        return Some(token.to_string());
    }

    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Algorithm implied by a checksum file's URL, if any.
pub fn determine_algorithm_from_url(url: &str) -> Option<HashAlgorithm> {
    let path = Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    let implies = |alg: &str| {
        path.ends_with(&format!("{alg}sum"))
            || path.ends_with(&format!("{alg}.txt"))
            || path.ends_with(&format!(".{alg}"))
    };
    if implies("sha256") {
        Some(HashAlgorithm::Sha256)
    } else if implies("sha512") {
        Some(HashAlgorithm::Sha512)
    } else {
        None
    }
}

/// Algorithm implied by the hex length of a digest.
pub fn determine_algorithm_by_length(checksum: &str) -> HashAlgorithm {
    match checksum.trim().len() {
        16 => HashAlgorithm::Md4,
        32 => HashAlgorithm::Md5,
        40 => HashAlgorithm::Sha1,
        48 => HashAlgorithm::Sha224,
        64 => HashAlgorithm::Sha256,
        96 => HashAlgorithm::Sha384,
        128 => HashAlgorithm::Sha512,
        _ => HashAlgorithm::Unsupported,
    }
}

/// URL suffix first, then digest length.
pub fn determine_algorithm(checksum_url: &str, checksum: &str) -> HashAlgorithm {
    determine_algorithm_from_url(checksum_url)
        .unwrap_or_else(|| determine_algorithm_by_length(checksum))
}

/// Compare `contents` against `discovered`. A mismatch is `valid: false`,
/// not an error.
pub fn compare_checksum<H: ContentHasher + ?Sized>(
    hasher: &H,
    contents: &str,
    discovered: DiscoveredChecksum,
) -> Result<ChecksumCheck, ChecksumError> {
    if !discovered.algorithm.is_supported() {
        return Err(ChecksumError::UnsupportedAlgorithm(discovered.algorithm));
    }
    let hash = hasher
        .compute_hash(discovered.algorithm, contents)
        .ok_or(ChecksumError::UnsupportedAlgorithm(discovered.algorithm))?;
    Ok(ChecksumCheck {
        valid: hash.eq_ignore_ascii_case(discovered.checksum.trim()),
        hash,
        discovered,
    })
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Discovers and checks checksums through the gateway.
pub struct ChecksumVerifier<'a, T, H: ?Sized> {
    gateway: &'a Gateway,
    transport: &'a T,
    hasher: &'a H,
}

impl<'a, T, H> ChecksumVerifier<'a, T, H>
where
    T: IncludeTransport,
    H: ContentHasher + ?Sized,
{
    pub fn new(gateway: &'a Gateway, transport: &'a T, hasher: &'a H) -> Self {
        Self {
            gateway,
            transport,
            hasher,
        }
    }

    /// Try candidates until one fetches, then extract its checksum.
    pub async fn discover(
        &self,
        include_url: &Url,
        explicit: Option<&str>,
        headers: &[(String, String)],
    ) -> Result<DiscoveredChecksum, ChecksumError> {
        let file_name = include_url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or_default()
            .to_string();

        for candidate in checksum_candidates(include_url, explicit) {
            let body = match self.gateway.get_url(self.transport, &candidate, headers).await {
                Ok(body) => body,
                Err(GatewayError::Fetch(e)) => {
                    tracing::debug!(%candidate, error = %e, "checksum candidate unavailable");
                    continue;
                }
                Err(e) => {
                    tracing::info!(%candidate, error = %e, "checksum candidate not authorized, skipping");
                    continue;
                }
            };

            let checksum = find_checksum_line(&body, &file_name).ok_or_else(|| ChecksumError::Empty {
                url: candidate.clone(),
            })?;
            let algorithm = determine_algorithm(&candidate, &checksum);
            tracing::debug!(%candidate, %algorithm, "checksum discovered");
            return Ok(DiscoveredChecksum {
                source_url: candidate,
                checksum,
                algorithm,
            });
        }

        Err(ChecksumError::NotFound(include_url.to_string()))
    }

    /// Discover the checksum for `include_url` and compare `contents` to it.
    pub async fn validate_checksum(
        &self,
        include_url: &Url,
        explicit: Option<&str>,
        headers: &[(String, String)],
        contents: &str,
    ) -> Result<ChecksumCheck, ChecksumError> {
        let discovered = self.discover(include_url, explicit, headers).await?;
        compare_checksum(self.hasher, contents, discovered)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{TestHasher, sha256_hex};
    use super::*;
    use crate::include::transport::testing::ScriptedTransport;

    const BASE: &str = "https://raw.githubusercontent.com/org/repo/main/fragment.yaml";

    #[test]
    fn test_candidate_order() {
        let url = Url::parse(BASE).unwrap();
        let candidates = checksum_candidates(&url, Some("https://example.com/SUMS.txt"));
        assert_eq!(
            candidates,
            vec![
                "https://example.com/SUMS.txt",
                "https://raw.githubusercontent.com/org/repo/main/checksums.txt",
                "https://raw.githubusercontent.com/org/repo/main/checksums.sha256.txt",
                "https://raw.githubusercontent.com/org/repo/main/checksums.sha512.txt",
                "https://raw.githubusercontent.com/org/repo/main/sha256sum",
                "https://raw.githubusercontent.com/org/repo/main/sha512sum",
                "https://raw.githubusercontent.com/org/repo/main/fragment.yaml.sha256",
                "https://raw.githubusercontent.com/org/repo/main/fragment.yaml.sha512",
            ]
        );
    }

    #[test]
    fn test_algorithm_by_length() {
        let cases = [
            (16, HashAlgorithm::Md4),
            (32, HashAlgorithm::Md5),
            (40, HashAlgorithm::Sha1),
            (48, HashAlgorithm::Sha224),
            (64, HashAlgorithm::Sha256),
            (96, HashAlgorithm::Sha384),
            (128, HashAlgorithm::Sha512),
            (10, HashAlgorithm::Unsupported),
            (63, HashAlgorithm::Unsupported),
        ];
        for (len, expected) in cases {
            assert_eq!(determine_algorithm_by_length(&"a".repeat(len)), expected, "length {len}");
        }
    }

    #[test]
    fn test_algorithm_from_url_suffix() {
        for url in [
            "https://h/x/sha256sum",
            "https://h/x/checksums.sha256.txt",
            "https://h/x/fragment.yaml.sha256",
        ] {
            assert_eq!(determine_algorithm_from_url(url), Some(HashAlgorithm::Sha256), "{url}");
        }
        for url in [
            "https://h/x/sha512sum",
            "https://h/x/checksums.sha512.txt",
            "https://h/x/fragment.yaml.sha512",
        ] {
            assert_eq!(determine_algorithm_from_url(url), Some(HashAlgorithm::Sha512), "{url}");
        }
        assert_eq!(determine_algorithm_from_url("https://h/x/checksums.txt"), None);
    }

    #[test]
    fn test_find_checksum_line() {
        let a = "a".repeat(64);
        let b = "b".repeat(64);
        let body = format!("{a}  other.yaml\n{b} *./fragment.yaml\n");
        assert_eq!(find_checksum_line(&body, "fragment.yaml"), Some(b.clone()));

        // No line names the file: first bare long token.
        assert_eq!(find_checksum_line(&body, "missing.yaml"), Some(a.clone()));

        // Short digests only: whole body.
        assert_eq!(find_checksum_line("  abc123 \n", "x"), Some("abc123".to_string()));
        assert_eq!(find_checksum_line("   ", "x"), None);
    }

    #[test]
    fn test_compare_is_case_insensitive_and_idempotent() {
        let contents = "tasks: []\n";
        let discovered = DiscoveredChecksum {
            source_url: "u".to_string(),
            checksum: sha256_hex(contents).to_uppercase(),
            algorithm: HashAlgorithm::Sha256,
        };
        let first = compare_checksum(&TestHasher, contents, discovered.clone()).unwrap();
        let second = compare_checksum(&TestHasher, contents, discovered.clone()).unwrap();
        assert!(first.valid);
        assert_eq!(first, second);

        let changed = compare_checksum(&TestHasher, "tasks: [x]\n", discovered).unwrap();
        assert!(!changed.valid);
    }

    #[test]
    fn test_unsupported_algorithm_is_error() {
        let discovered = DiscoveredChecksum {
            source_url: "u".to_string(),
            checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            algorithm: HashAlgorithm::Md5,
        };
        assert!(matches!(
            compare_checksum(&TestHasher, "", discovered),
            Err(ChecksumError::UnsupportedAlgorithm(HashAlgorithm::Md5))
        ));
    }

    #[tokio::test]
    async fn test_discover_skips_unavailable_and_unauthorized_candidates() {
        let contents = "tasks:\n  - id: lint\n    command: eslint .\n";
        let sums = format!("{}  fragment.yaml\n", sha256_hex(contents));
        let transport = ScriptedTransport::default()
            .with("https://raw.githubusercontent.com/org/repo/main/sha256sum", &sums);
        let gateway = Gateway::new(["raw.githubusercontent.com"], Vec::<String>::new());
        let verifier = ChecksumVerifier::new(&gateway, &transport, &TestHasher);

        let url = Url::parse(BASE).unwrap();
        let check = verifier
            .validate_checksum(&url, Some("https://elsewhere.test/sums.txt"), &[], contents)
            .await
            .unwrap();
        assert!(check.valid);
        assert_eq!(check.discovered.algorithm, HashAlgorithm::Sha256);
        assert!(check.discovered.source_url.ends_with("/sha256sum"));

        let requested = transport.requested();
        assert!(!requested.iter().any(|u| u.contains("elsewhere.test")));
        assert_eq!(requested.len(), 4);
    }

    #[tokio::test]
    async fn test_discover_not_found() {
        let transport = ScriptedTransport::default();
        let gateway = Gateway::new(["raw.githubusercontent.com"], Vec::<String>::new());
        let verifier = ChecksumVerifier::new(&gateway, &transport, &TestHasher);
        let url = Url::parse(BASE).unwrap();
        assert!(matches!(
            verifier.discover(&url, None, &[]).await,
            Err(ChecksumError::NotFound(_))
        ));
    }
}
