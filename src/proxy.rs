//! The forwarding pipeline.
//!
//! method guard → target URL → header filtering → signing → dispatch,
//! with the range-retry loop when the request carries a `Range` header.

use axum::http::{header, HeaderMap, Method, Uri};
use reqwest::Url;
use tracing::debug;

use crate::auth::SigV4Signer;
use crate::errors::ProxyError;
use crate::headers::filter_headers;
use crate::metrics::record_upstream;
use crate::retry::fetch_with_range_retry;
use crate::target::build_target_url;
use crate::upstream::backend::UpstreamResponse;
use crate::AppState;

/// Forward one inbound request and return the response to relay.
pub async fn forward(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<UpstreamResponse, ProxyError> {
    if *method != Method::GET && *method != Method::HEAD {
        return Err(ProxyError::MethodNotAllowed(method.clone()));
    }

    let settings = &state.settings;
    let url = build_target_url(settings, uri, headers)?;
    let headers = filter_headers(headers, settings.allowed_headers.as_deref());

    debug!(%method, upstream = %url, "forwarding request");

    if headers.contains_key(header::RANGE) {
        fetch_with_range_retry(url.as_str(), || dispatch(state, method, &url, &headers)).await
    } else {
        dispatch(state, method, &url, &headers).await
    }
}

/// Sign and send a single attempt.
async fn dispatch(
    state: &AppState,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
) -> Result<UpstreamResponse, ProxyError> {
    let settings = &state.settings;
    let signer = SigV4Signer::new(&settings.credentials, &settings.region);
    let signed = signer.sign(method, url, headers)?;

    let response = state.upstream.send(signed).await?;
    record_upstream(response.status());
    Ok(response)
}
