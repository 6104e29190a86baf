//! Proxy error types.
//!
//! Every failure the proxy produces locally resolves to an HTTP status.
//! The enum implements [`axum::response::IntoResponse`] so handlers can
//! simply return `Err(ProxyError::ListingNotAllowed)`.  Upstream error
//! statuses are never wrapped here; they pass through as responses.

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors resolved locally into an HTTP response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Only GET and HEAD are forwarded.
    #[error("method {0} is not allowed")]
    MethodNotAllowed(Method),

    /// The request would list a bucket and listing is disabled.
    #[error("bucket listing is not allowed")]
    ListingNotAllowed,

    /// The inbound request carries no host to derive a bucket from.
    #[error("request has no host to derive a bucket from")]
    MissingHost,

    /// The rewritten upstream URL is not valid.
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    /// The proxy is misconfigured.
    #[error("configuration error: {0}")]
    Config(String),

    /// The upstream request could not be completed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] anyhow::Error),
}

impl ProxyError {
    /// Return the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::ListingNotAllowed => StatusCode::NOT_FOUND,
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 404 and 405 mirror what the edge handler always returned: a bare
        // status with no body.
        match self {
            ProxyError::MethodNotAllowed(_) => {
                let mut response = status.into_response();
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
                response
            }
            ProxyError::ListingNotAllowed => status.into_response(),
            other => {
                tracing::error!(error = %other, status = status.as_u16(), "request failed");
                status.into_response()
            }
        }
    }
}
