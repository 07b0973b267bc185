//! reqwest-backed include transport.
//!
//! Raw fetches only. The gateway in `stackup-core` authorizes every URL
//! before it reaches [`HttpTransport::get`]; this adapter just honors the
//! client timeout and maps failures onto `TransportError`.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use stackup_core::include::source::S3Location;
use stackup_core::include::transport::{
    FetchedResponse, IncludeTransport, S3Credentials, TransportError,
};
use url::Url;

use crate::s3;

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stackup/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<FetchedResponse, TransportError> {
        let network = |e: reqwest::Error| TransportError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%url, status = status.as_u16(), "fetch returned an error status");
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(network)?;
        tracing::debug!(%url, bytes = body.len(), "fetched");

        Ok(FetchedResponse { body, content_type })
    }
}

impl IncludeTransport for HttpTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<FetchedResponse, TransportError> {
        self.send(url.as_str(), headers).await
    }

    async fn get_s3(
        &self,
        location: &S3Location,
        credentials: Option<&S3Credentials>,
        secure: bool,
    ) -> Result<FetchedResponse, TransportError> {
        let signed =
            s3::sign_get(location, credentials, secure, Utc::now()).map_err(|e| {
                TransportError::Network {
                    url: location.to_string(),
                    reason: format!("could not sign request: {e}"),
                }
            })?;
        self.send(&signed.url, &signed.headers).await
    }

    async fn read_file(&self, path: &Path) -> Result<String, TransportError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TransportError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragment.yaml");
        tokio::fs::write(&path, "tasks: []\n").await.unwrap();

        assert_eq!(transport().read_file(&path).await.unwrap(), "tasks: []\n");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = transport()
            .read_file(&dir.path().join("missing.yaml"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 on loopback: nothing listens, so the connect is refused.
        let url = Url::parse("http://127.0.0.1:9/fragment.yaml").unwrap();
        let err = transport().get(&url, &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Network { .. }));
    }
}
