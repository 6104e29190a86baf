//! Axum router construction.
//!
//! The proxy listener has no routes of its own: every path is an object
//! key, so a single fallback handler receives all requests.  Health and
//! metrics endpoints are served by [`admin_app`] on a separate listener.

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::errors::ProxyError;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the proxy [`Router`].
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy_request)
        .with_state(state)
        // metrics_middleware is inner so it sees the final status.
        .layer(middleware::from_fn(metrics_middleware))
        // TraceLayer is outermost: one span per request.
        .layer(TraceLayer::new_for_http())
}

/// Build the admin [`Router`]: `/health` always, `/metrics` when
/// `metrics_enabled`.
pub fn admin_app(metrics_enabled: bool) -> Router {
    let router = Router::new().route("/health", get(health_check));
    if metrics_enabled {
        router.route("/metrics", get(metrics_handler))
    } else {
        router
    }
}

/// Fallback handler: forward any request to the storage endpoint.
async fn proxy_request(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    crate::proxy::forward(&state, &method, &uri, &headers).await
}

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}
