//! AWS Signature Version 4 request signing.
//!
//! Signs outbound requests to the B2 S3-compatible API with
//! `Authorization: AWS4-HMAC-SHA256 ...` headers. The algorithm:
//! 1. Build a canonical request
//! 2. Build a string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Compute the signature and attach it

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::errors::ProxyError;

type HmacSha256 = Hmac<Sha256>;

/// Service name every request is scoped to.
pub const SERVICE: &str = "s3";

/// Payload hash for requests without a body.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// Headers that are forwarded but never part of the signature.
const UNSIGNABLE_HEADERS: &[&str] = &[
    "authorization",
    "content-type",
    "content-length",
    "user-agent",
    "presigned-expires",
    "expect",
    "x-amzn-trace-id",
    "range",
    "connection",
];

/// Application key used to sign requests.
#[derive(Clone)]
pub struct Credentials {
    /// The key ID placed in the credential scope.
    pub access_key_id: String,
    /// The secret the signing key is derived from.
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// A request ready to be sent upstream.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// HTTP method (GET or HEAD).
    pub method: Method,
    /// Fully qualified upstream URL.
    pub url: Url,
    /// Forwarded headers plus the signature headers.
    pub headers: HeaderMap,
}

/// SigV4 signer bound to one set of credentials and one region.
#[derive(Debug)]
pub struct SigV4Signer<'a> {
    credentials: &'a Credentials,
    region: &'a str,
}

impl<'a> SigV4Signer<'a> {
    /// Create a signer for the `s3` service in `region`.
    pub fn new(credentials: &'a Credentials, region: &'a str) -> Self {
        Self {
            credentials,
            region,
        }
    }

    /// Sign a request at the current time.
    pub fn sign(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<SignedRequest, ProxyError> {
        self.sign_at(method, url, headers, Utc::now())
    }

    /// Sign a request as of `now`.
    pub fn sign_at(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<SignedRequest, ProxyError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let host = host_header_value(url)?;

        let mut headers = headers.clone();
        headers.insert(axum::http::header::HOST, header_value(&host)?);
        headers.insert(X_AMZ_DATE, header_value(&amz_date)?);
        if !headers.contains_key(X_AMZ_CONTENT_SHA256) {
            headers.insert(X_AMZ_CONTENT_SHA256, HeaderValue::from_static(UNSIGNED_PAYLOAD));
        }
        headers.remove(axum::http::header::AUTHORIZATION);

        let payload_hash = headers
            .get(X_AMZ_CONTENT_SHA256)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(UNSIGNED_PAYLOAD)
            .to_string();

        let canonical_headers = extract_headers_for_signing(&headers);
        let signed_headers = canonical_headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = build_canonical_request(
            method.as_str(),
            &s3_uri_encode_path(url.path()),
            url.query().unwrap_or(""),
            &canonical_headers,
            &signed_headers,
            &payload_hash,
        );

        let credential_scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", self.region);
        let string_to_sign = build_string_to_sign(&amz_date, &credential_scope, &canonical_request);
        let signing_key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date_stamp,
            self.region,
            SERVICE,
        );
        let signature = compute_signature(&signing_key, &string_to_sign);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.credentials.access_key_id
        );
        headers.insert(axum::http::header::AUTHORIZATION, header_value(&authorization)?);

        Ok(SignedRequest {
            method: method.clone(),
            url: url.clone(),
            headers,
        })
    }
}

/// The `host` value for `url`: hostname plus any non-default port.
fn host_header_value(url: &Url) -> Result<String, ProxyError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::InvalidTarget(url.to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value).map_err(|e| ProxyError::InvalidTarget(e.to_string()))
}

// ── Canonical request construction ──────────────────────────────────

/// Build the canonical request string.
///
/// ```text
/// HTTPMethod + '\n' +
/// CanonicalURI + '\n' +
/// CanonicalQueryString + '\n' +
/// CanonicalHeaders + '\n' +
/// SignedHeaders + '\n' +
/// HashedPayload
/// ```
///
/// `headers` must already be the signable (lowercase name, value) pairs.
pub fn build_canonical_request(
    method: &str,
    canonical_uri: &str,
    query_string: &str,
    headers: &[(String, String)],
    signed_headers_str: &str,
    payload_hash: &str,
) -> String {
    let canonical_uri = if canonical_uri.is_empty() {
        "/"
    } else {
        canonical_uri
    };

    let canonical_query = build_canonical_query_string(query_string);

    let mut canonical_headers = String::new();
    for (name, value) in headers {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&collapse_whitespace(value));
        canonical_headers.push('\n');
    }

    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers_str}\n{payload_hash}"
    )
}

/// Build the canonical query string from a raw query string.
///
/// Parameters are decoded, re-encoded with S3's URI encoding rules,
/// sorted by name then value, and joined with `&`. Parameters with no
/// value become `name=`.
pub fn build_canonical_query_string(query_string: &str) -> String {
    if query_string.is_empty() {
        return String::new();
    }

    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            (
                s3_uri_encode(&percent_decode(k), true),
                s3_uri_encode(&percent_decode(v), true),
            )
        })
        .collect();

    params.sort();

    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

// ── String to sign ──────────────────────────────────────────────────

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request: &str,
) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{hash}")
}

// ── Signing key derivation ──────────────────────────────────────────

/// Derive the signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, dateStamp)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, "s3")
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the signature: HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ── URI encoding ────────────────────────────────────────────────────

/// S3-compatible URI encoding (RFC 3986 with S3 exceptions).
///
/// - Characters A-Z, a-z, 0-9, -, _, ., ~ are NOT encoded.
/// - All other characters are percent-encoded with uppercase hex.
/// - If `encode_slash` is false, `/` is NOT encoded (for URI paths).
pub fn s3_uri_encode(input: &str, encode_slash: bool) -> String {
    let mut encoded = String::with_capacity(input.len() * 2);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b'/' if !encode_slash => encoded.push('/'),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// URI-encode a path for S3 canonical requests.
///
/// The URL path is already percent-encoded; it is decoded first and each
/// segment re-encoded so the canonical form does not depend on how the
/// client chose to encode it.
pub fn s3_uri_encode_path(raw_path: &str) -> String {
    if raw_path.is_empty() || raw_path == "/" {
        return "/".to_string();
    }
    let encoded = s3_uri_encode(&percent_decode(raw_path), false);
    if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{encoded}")
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Collapse consecutive whitespace in a header value to a single space,
/// and trim leading/trailing whitespace.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect the signable headers as sorted (lowercase-name, value) pairs.
///
/// Multiple values for one name are joined with `,`. Headers in the
/// unsignable set are skipped; `host` is always included when present.
pub fn extract_headers_for_signing(header_map: &HeaderMap) -> Vec<(String, String)> {
    let mut header_values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in header_map.iter() {
        if is_unsignable(name) {
            continue;
        }
        let val_str = String::from_utf8_lossy(value.as_bytes()).into_owned();
        header_values
            .entry(name.as_str().to_string())
            .or_default()
            .push(val_str);
    }

    header_values
        .into_iter()
        .map(|(name, values)| (name, values.join(",")))
        .collect()
}

fn is_unsignable(name: &HeaderName) -> bool {
    UNSIGNABLE_HEADERS.contains(&name.as_str())
}

// ── Tests ───────────────────────────────────────────────────────────
