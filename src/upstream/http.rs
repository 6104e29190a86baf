//! HTTPS upstream using `reqwest`.
//!
//! Responses are relayed as streams: the body is never buffered, so a
//! multi-gigabyte object flows straight from B2 to the client.  Dropping
//! the returned response drops the `reqwest` body stream, which closes the
//! upstream connection.

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::Response;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::backend::{Upstream, UpstreamResponse};
use crate::auth::SignedRequest;

/// Response headers owned by the connection, not the message.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "trailer",
];

/// Upstream that sends signed requests over HTTPS.
pub struct HttpUpstream {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUpstream {
    /// Create an upstream with the given per-attempt timeout.
    ///
    /// `timeout` bounds connecting, waiting for response headers, and each
    /// idle gap while the body streams.  It is not a deadline on the whole
    /// body: a large object may stream for as long as data keeps arriving.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client, timeout })
    }

    async fn fetch(&self, request: SignedRequest) -> anyhow::Result<UpstreamResponse> {
        debug!(method = %request.method, url = %request.url, "sending upstream request");

        let pending = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send();
        let resp = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| {
                anyhow::anyhow!("upstream did not respond within {}s", self.timeout.as_secs())
            })?
            .map_err(|e| anyhow::anyhow!("upstream request failed: {e}"))?;

        let status = resp.status();
        let headers = relay_headers(resp.headers());

        let mut response = Response::new(Body::from_stream(resp.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Upstream for HttpUpstream {
    fn send(
        &self,
        request: SignedRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UpstreamResponse>> + Send + '_>> {
        Box::pin(self.fetch(request))
    }
}

/// Copy upstream response headers, leaving out hop-by-hop ones.
fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream.iter() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}
