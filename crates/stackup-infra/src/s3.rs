//! AWS Signature Version 4 for path-style S3 `GetObject`.
//!
//! Only what an include fetch needs: a GET with an empty payload against
//! `<endpoint>/<bucket>/<key>` in `us-east-1`. Works with AWS and with
//! S3-compatible servers such as MinIO.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use stackup_core::include::source::S3Location;
use stackup_core::include::transport::S3Credentials;

type HmacSha256 = Hmac<Sha256>;

pub const REGION: &str = "us-east-1";
const SERVICE: &str = "s3";
const EMPTY_PAYLOAD_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// A GET ready to send: the URL plus the headers that were signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedGet {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Percent-encode a path segment per the SigV4 rules (RFC 3986 unreserved kept).
fn uri_encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// `/<bucket>/<key>` with every segment encoded, slashes kept.
pub fn canonical_uri(location: &S3Location) -> String {
    std::iter::once(location.bucket.as_str())
        .chain(location.key.split('/'))
        .map(uri_encode_segment)
        .fold(String::new(), |mut acc, segment| {
            acc.push('/');
            acc.push_str(&segment);
            acc
        })
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(key)?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the SigV4 signing key for one day, region and service.
pub fn signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, hmac::digest::InvalidLength> {
    let k_date = hmac(format!("AWS4{secret_key}").as_bytes(), date_stamp)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, service)?;
    hmac(&k_service, "aws4_request")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Build a GET for `location`. Unsigned when `credentials` is `None`.
pub fn sign_get(
    location: &S3Location,
    credentials: Option<&S3Credentials>,
    secure: bool,
    now: DateTime<Utc>,
) -> Result<SignedGet, hmac::digest::InvalidLength> {
    let scheme = if secure { "https" } else { "http" };
    let uri = canonical_uri(location);
    let url = format!("{scheme}://{}{uri}", location.endpoint);

    let Some(credentials) = credentials else {
        return Ok(SignedGet {
            url,
            headers: Vec::new(),
        });
    };

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let host = location.endpoint.as_str();

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_headers = format!(
        "host:{host}\nx-amz-content-sha256:{EMPTY_PAYLOAD_SHA256}\nx-amz-date:{amz_date}\n"
    );
    let canonical_request =
        format!("GET\n{uri}\n\n{canonical_headers}\n{signed_headers}\n{EMPTY_PAYLOAD_SHA256}");

    let scope = format!("{date_stamp}/{REGION}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{:x}",
        Sha256::digest(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_key, &date_stamp, REGION, SERVICE)?;
    let signature = hex(&hmac(&key, &string_to_sign)?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key
    );

    Ok(SignedGet {
        url,
        headers: vec![
            ("x-amz-date".to_string(), amz_date),
            (
                "x-amz-content-sha256".to_string(),
                EMPTY_PAYLOAD_SHA256.to_string(),
            ),
            ("Authorization".to_string(), authorization),
        ],
    })
}
