//! b2-edge-proxy library -- a signing GET/HEAD proxy for Backblaze B2.
//!
//! This crate provides the components of an edge proxy that forwards
//! read requests to B2's S3-compatible API: bucket-naming policy, header
//! filtering, SigV4 request signing, and the range-retry loop that works
//! around upstream responses ignoring `Range`.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod headers;
pub mod metrics;
pub mod proxy;
pub mod retry;
pub mod server;
pub mod target;
pub mod upstream;

use crate::config::ProxySettings;
use crate::upstream::backend::Upstream;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Resolved, immutable proxy settings.
    pub settings: ProxySettings,
    /// Transport used to reach the storage endpoint.
    pub upstream: Arc<dyn Upstream>,
}
