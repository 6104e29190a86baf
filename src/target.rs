//! Upstream URL construction.
//!
//! The inbound URL is rewritten to `https://<host>:443<path>?<query>`
//! where `<host>` depends on the [`BucketMode`].  Requests that would list
//! a bucket are rejected here unless listing is enabled.

use axum::http::{header, HeaderMap, Uri};
use reqwest::Url;

use crate::config::{BucketMode, ProxySettings};
use crate::errors::ProxyError;

/// Port every upstream request is sent to.
pub const HTTPS_PORT: u16 = 443;

/// Strip one leading and one trailing `/` from a URL path.
pub fn trim_path(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_suffix('/').unwrap_or(path)
}

/// Whether a request for `path` would enumerate a bucket.
///
/// Path style needs at least a bucket and a key segment; the other modes
/// need a non-empty key.
pub fn is_listing_request(mode: &BucketMode, path: &str) -> bool {
    let path = trim_path(path);
    match mode {
        BucketMode::PathStyle => path.split('/').count() < 2,
        BucketMode::HostStyle | BucketMode::Fixed(_) => path.is_empty(),
    }
}

/// The inbound hostname, without any port.
///
/// Taken from the `Host` header, falling back to the URI authority.
pub fn inbound_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))?;
    // Drop userinfo and port; IPv6 literals keep their brackets.
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = match host.rfind(':') {
        Some(idx) if !host[idx..].contains(']') => &host[..idx],
        _ => host,
    };
    (!host.is_empty()).then_some(host)
}

/// Compute the upstream hostname for a request.
pub fn upstream_host(
    mode: &BucketMode,
    endpoint: &str,
    inbound_host: Option<&str>,
) -> Result<String, ProxyError> {
    match mode {
        BucketMode::PathStyle => Ok(endpoint.to_string()),
        BucketMode::HostStyle => {
            let host = inbound_host.ok_or(ProxyError::MissingHost)?;
            let bucket = host.split('.').next().unwrap_or(host);
            Ok(format!("{bucket}.{endpoint}"))
        }
        BucketMode::Fixed(bucket) => Ok(format!("{bucket}.{endpoint}")),
    }
}

/// Build the upstream URL for an inbound request.
pub fn build_target_url(
    settings: &ProxySettings,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Url, ProxyError> {
    if !settings.allow_list_bucket && is_listing_request(&settings.bucket_mode, uri.path()) {
        return Err(ProxyError::ListingNotAllowed);
    }

    let host = upstream_host(
        &settings.bucket_mode,
        &settings.endpoint,
        inbound_host(uri, headers),
    )?;

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let raw = format!("https://{host}:{HTTPS_PORT}{path_and_query}");
    let url = Url::parse(&raw).map_err(|e| ProxyError::InvalidTarget(format!("{raw}: {e}")))?;

    if url.host_str().is_none() {
        return Err(ProxyError::InvalidTarget(raw));
    }
    Ok(url)
}
