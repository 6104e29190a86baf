//! Abstract upstream transport trait.

use axum::response::Response;
use std::future::Future;
use std::pin::Pin;

use crate::auth::SignedRequest;

/// Response from the storage endpoint with a streaming body.
///
/// Dropping it aborts the body stream and releases the connection.
pub type UpstreamResponse = Response;

/// Async transport contract.
pub trait Upstream: Send + Sync + 'static {
    /// Issue `request` and return the response once its headers arrive.
    ///
    /// Upstream error statuses are responses, not errors; `Err` means the
    /// exchange itself failed (connect, TLS, timeout).
    fn send(
        &self,
        request: SignedRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UpstreamResponse>> + Send + '_>>;
}
