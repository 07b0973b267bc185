//! Where an include comes from.

use std::fmt;
use std::path::{Path, PathBuf};

use stackup_types::workflow::IncludeDefinition;
use url::Url;

use super::IncludeError;

const GITHUB_RAW: &str = "https://raw.githubusercontent.com";

/// Path-style S3 object address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    /// `host[:port]`
    pub endpoint: String,
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Parse `endpoint/bucket/key...`.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.trim_start_matches('/').splitn(3, '/');
        let endpoint = parts.next().filter(|s| !s.is_empty())?;
        let bucket = parts.next().filter(|s| !s.is_empty())?;
        let key = parts.next().filter(|s| !s.is_empty())?;
        Some(Self {
            endpoint: endpoint.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn url(&self, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        format!("{scheme}://{}/{}/{}", self.endpoint, self.bucket, self.key)
    }
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3:{}/{}/{}", self.endpoint, self.bucket, self.key)
    }
}

/// A parsed include locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeSource {
    Http(Url),
    S3 { location: S3Location, secure: bool },
    File(PathBuf),
}

/// Expand `gh:<owner>/<repo>/<ref>/<path>` to a raw.githubusercontent.com URL.
pub fn expand_github_shorthand(locator: &str) -> Option<String> {
    let rest = locator.trim().strip_prefix("gh:")?.trim_start_matches('/');
    if rest.split('/').filter(|s| !s.is_empty()).count() < 4 {
        return None;
    }
    Some(format!("{GITHUB_RAW}/{rest}"))
}

impl IncludeSource {
    pub fn from_definition(def: &IncludeDefinition, working_dir: &Path) -> Result<Self, IncludeError> {
        match (&def.url, &def.file) {
            (Some(url), None) => Self::parse_url(url, def.secure.unwrap_or(true)),
            (None, Some(file)) => {
                let path = PathBuf::from(file);
                Ok(Self::File(if path.is_absolute() {
                    path
                } else {
                    working_dir.join(path)
                }))
            }
            _ => Err(IncludeError::InvalidSource(format!(
                "include '{}' must set exactly one of url or file",
                def.display_name()
            ))),
        }
    }

    fn parse_url(raw: &str, secure: bool) -> Result<Self, IncludeError> {
        let raw = raw.trim();

        if raw.starts_with("gh:") {
            let expanded = expand_github_shorthand(raw).ok_or_else(|| {
                IncludeError::InvalidSource(format!("'{raw}' is not gh:<owner>/<repo>/<ref>/<path>"))
            })?;
            return Self::parse_url(&expanded, secure);
        }

        if let Some(spec) = raw.strip_prefix("s3://").or_else(|| raw.strip_prefix("s3:")) {
            let location = S3Location::parse(spec).ok_or_else(|| {
                IncludeError::InvalidSource(format!("'{raw}' is not s3:<endpoint>/<bucket>/<key>"))
            })?;
            return Ok(Self::S3 { location, secure });
        }

        let url = Url::parse(raw).map_err(|e| IncludeError::InvalidSource(format!("{raw}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Http(url)),
            "file" => url
                .to_file_path()
                .map(Self::File)
                .map_err(|_| IncludeError::InvalidSource(raw.to_string())),
            other => Err(IncludeError::InvalidSource(format!(
                "unsupported include scheme '{other}'"
            ))),
        }
    }

    /// URL the gateway authorizes for this source.
    pub fn gateway_url(&self) -> Option<String> {
        match self {
            Self::Http(url) => Some(url.to_string()),
            Self::S3 { location, secure } => Some(location.url(*secure)),
            Self::File(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_include(url: &str) -> IncludeDefinition {
        IncludeDefinition {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_github_shorthand() {
        assert_eq!(
            expand_github_shorthand("gh:org/repo/main/fragments/php.yaml").as_deref(),
            Some("https://raw.githubusercontent.com/org/repo/main/fragments/php.yaml")
        );
        assert!(expand_github_shorthand("gh:org/repo").is_none());

        let source =
            IncludeSource::from_definition(&url_include("gh:org/repo/v1/a.yaml"), Path::new("/")).unwrap();
        assert_eq!(
            source.gateway_url().as_deref(),
            Some("https://raw.githubusercontent.com/org/repo/v1/a.yaml")
        );
    }

    #[test]
    fn test_s3_locator() {
        let def = IncludeDefinition {
            url: Some("s3:minio.local:9000/bucket/path/fragment.yaml".to_string()),
            secure: Some(false),
            ..Default::default()
        };
        let source = IncludeSource::from_definition(&def, Path::new("/")).unwrap();
        let IncludeSource::S3 { location, secure } = &source else {
            panic!("expected s3 source");
        };
        assert_eq!(location.endpoint, "minio.local:9000");
        assert_eq!(location.bucket, "bucket");
        assert_eq!(location.key, "path/fragment.yaml");
        assert!(!secure);
        assert_eq!(
            source.gateway_url().as_deref(),
            Some("http://minio.local:9000/bucket/path/fragment.yaml")
        );
    }

    #[test]
    fn test_relative_file_joins_working_dir() {
        let def = IncludeDefinition {
            file: Some("local/fragment.yaml".to_string()),
            ..Default::default()
        };
        let source = IncludeSource::from_definition(&def, Path::new("/project")).unwrap();
        assert_eq!(source, IncludeSource::File(PathBuf::from("/project/local/fragment.yaml")));
        assert!(source.gateway_url().is_none());
    }

    #[test]
    fn test_rejects_bad_locators() {
        for bad in ["ftp://host/a.yaml", "s3:bucket-only", "not a url"] {
            assert!(
                IncludeSource::from_definition(&url_include(bad), Path::new("/")).is_err(),
                "{bad} should be rejected"
            );
        }
    }
}
