//! Router-level tests: drive `server::app` with `oneshot` against a
//! scripted upstream and inspect what would have been sent to B2.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use b2_edge_proxy::auth::{Credentials, SignedRequest};
use b2_edge_proxy::config::{BucketMode, ProxySettings};
use b2_edge_proxy::upstream::backend::{Upstream, UpstreamResponse};
use b2_edge_proxy::AppState;

const ENDPOINT: &str = "s3.us-west-002.backblazeb2.com";

/// Upstream that replays canned responses and records every request.
struct ScriptedUpstream {
    responses: Mutex<VecDeque<Response>>,
    requests: Mutex<Vec<SignedRequest>>,
    latency: Duration,
}

impl ScriptedUpstream {
    fn new(responses: Vec<Response>) -> Arc<Self> {
        Self::with_latency(responses, Duration::ZERO)
    }

    /// Like `new`, but each exchange takes `latency` before it answers.
    fn with_latency(responses: Vec<Response>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            latency,
        })
    }

    fn requests(&self) -> Vec<SignedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Upstream for ScriptedUpstream {
    fn send(
        &self,
        request: SignedRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<UpstreamResponse>> + Send + '_>> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        let latency = self.latency;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            next.ok_or_else(|| anyhow::anyhow!("connection reset"))
        })
    }
}

fn settings(mode: BucketMode) -> ProxySettings {
    ProxySettings {
        endpoint: ENDPOINT.to_string(),
        region: "us-west-002".to_string(),
        credentials: Credentials {
            access_key_id: "0021234567890abcdef000001".to_string(),
            secret_access_key: "K002abcdefghijklmnopqrstuvwxyz0".to_string(),
        },
        bucket_mode: mode,
        allow_list_bucket: false,
        allowed_headers: None,
    }
}

fn app(settings: ProxySettings, upstream: Arc<ScriptedUpstream>) -> axum::Router {
    b2_edge_proxy::server::app(Arc::new(AppState { settings, upstream }))
}

fn upstream_response(status: u16, content_range: Option<&str>, body: &'static str) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header("etag", "\"0123456789abcdef\"");
    if let Some(range) = content_range {
        builder = builder.header("content-range", range);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", "files.example.com")
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_rejects_unsupported_methods() {
    for method in ["POST", "PUT", "DELETE", "PATCH", "OPTIONS"] {
        let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "x")]);
        let response = app(settings(BucketMode::PathStyle), upstream.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri("/bucket/key")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(body_string(response).await, "");
        assert!(upstream.requests().is_empty());
    }
}

#[tokio::test]
async fn test_path_style_listing_blocked() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "<List/>")]);
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(get("/onlybucket").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "");
    assert!(upstream.requests().is_empty());
}

#[tokio::test]
async fn test_fixed_bucket_root_blocked() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "<List/>")]);
    let response = app(
        settings(BucketMode::Fixed("mybucket".to_string())),
        upstream.clone(),
    )
    .oneshot(get("/").body(Body::empty()).unwrap())
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(upstream.requests().is_empty());
}

#[tokio::test]
async fn test_listing_allowed_when_enabled() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "<List/>")]);
    let mut settings = settings(BucketMode::PathStyle);
    settings.allow_list_bucket = true;

    let response = app(settings, upstream.clone())
        .oneshot(get("/onlybucket?list-type=2").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url.as_str(),
        "https://s3.us-west-002.backblazeb2.com/onlybucket?list-type=2"
    );
}

#[tokio::test]
async fn test_pass_through_without_range() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(404, None, "<Error/>")]);
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("http://files.example.com:8080/bucket/missing.txt")
                .header("x-forwarded-proto", "http")
                .header("x-real-ip", "198.51.100.7")
                .header("accept-encoding", "gzip")
                .header("cf-ipcountry", "NZ")
                .header("if-none-match", "\"abc\"")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers().get("etag").unwrap(), "\"0123456789abcdef\"");
    assert_eq!(body_string(response).await, "<Error/>");

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.method, "GET");
    assert_eq!(sent.url.scheme(), "https");
    assert_eq!(sent.url.port_or_known_default(), Some(443));
    assert_eq!(sent.url.host_str(), Some(ENDPOINT));
    assert_eq!(sent.url.path(), "/bucket/missing.txt");

    for dropped in ["x-forwarded-proto", "x-real-ip", "accept-encoding", "cf-ipcountry"] {
        assert!(!sent.headers.contains_key(dropped), "{dropped} forwarded");
    }
    assert_eq!(sent.headers.get("if-none-match").unwrap(), "\"abc\"");
    assert_eq!(sent.headers.get("host").unwrap(), ENDPOINT);
    let auth = sent.headers.get("authorization").unwrap().to_str().unwrap();
    assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=0021234567890abcdef000001/"));
    assert!(auth.contains("/us-west-002/s3/aws4_request"));
    assert!(sent.headers.contains_key("x-amz-date"));
}

#[tokio::test]
async fn test_head_is_forwarded() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "")]);
    let response = app(
        settings(BucketMode::Fixed("mybucket".to_string())),
        upstream.clone(),
    )
    .oneshot(
        Request::builder()
            .method("HEAD")
            .uri("/docs/readme.md")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "HEAD");
    assert_eq!(
        requests[0].url.as_str(),
        "https://mybucket.s3.us-west-002.backblazeb2.com/docs/readme.md"
    );
}

#[tokio::test]
async fn test_host_style_bucket_from_inbound_host() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "img")]);
    let response = app(settings(BucketMode::HostStyle), upstream.clone())
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/cat.jpg")
                .header("host", "photos.example.com:443")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        upstream.requests()[0].url.host_str(),
        Some("photos.s3.us-west-002.backblazeb2.com")
    );
}

#[tokio::test]
async fn test_allowed_headers_restrict_forwarding() {
    let upstream = ScriptedUpstream::new(vec![upstream_response(200, None, "x")]);
    let mut settings = settings(BucketMode::PathStyle);
    settings.allowed_headers = Some(vec!["authorization".to_string()]);

    app(settings, upstream.clone())
        .oneshot(
            get("/bucket/key")
                .header("if-none-match", "\"abc\"")
                .header("authorization", "Bearer client-token")
                .header("user-agent", "curl/8.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let sent = &upstream.requests()[0];
    assert!(!sent.headers.contains_key("if-none-match"));
    assert!(!sent.headers.contains_key("user-agent"));
    // The client's authorization survives filtering, then the signer
    // replaces it with the upstream signature.
    let auth = sent.headers.get("authorization").unwrap().to_str().unwrap();
    assert!(auth.starts_with("AWS4-HMAC-SHA256 "));
}

#[tokio::test]
async fn test_range_retry_recovers() {
    let upstream = ScriptedUpstream::new(vec![
        upstream_response(200, None, "the whole object"),
        upstream_response(206, Some("bytes 0-2/16"), "the"),
    ]);
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(
            get("/bucket/object.bin")
                .header("range", "bytes=0-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers().get("content-range").unwrap(), "bytes 0-2/16");
    assert_eq!(body_string(response).await, "the");

    let requests = upstream.requests();
    assert_eq!(requests.len(), 2);
    for sent in &requests {
        assert_eq!(sent.url, requests[0].url);
        assert_eq!(sent.headers.get("range").unwrap(), "bytes=0-2");
        assert!(sent.headers.contains_key("authorization"));
    }
}

#[tokio::test]
async fn test_range_retry_signs_each_attempt() {
    // Each exchange outlasts a second, so a fresh signature carries a
    // different x-amz-date than the attempt before it.
    let upstream = ScriptedUpstream::with_latency(
        vec![
            upstream_response(200, None, "the whole object"),
            upstream_response(206, Some("bytes 0-2/16"), "the"),
        ],
        Duration::from_millis(1100),
    );
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(
            get("/bucket/object.bin")
                .header("range", "bytes=0-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 2);
    let (first, second) = (&requests[0].headers, &requests[1].headers);
    assert_ne!(first.get("x-amz-date"), second.get("x-amz-date"));
    assert_ne!(first.get("authorization"), second.get("authorization"));
}

#[tokio::test]
async fn test_range_retry_exhausted() {
    let upstream = ScriptedUpstream::new(vec![
        upstream_response(200, None, "full-1"),
        upstream_response(200, None, "full-2"),
        upstream_response(200, None, "full-3"),
        upstream_response(206, Some("bytes 0-0/6"), "f"),
    ]);
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(
            get("/bucket/object.bin")
                .header("range", "bytes=0-0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "full-3");
    assert_eq!(upstream.requests().len(), 3);
}

#[tokio::test]
async fn test_range_error_status_not_retried() {
    let upstream = ScriptedUpstream::new(vec![
        upstream_response(403, None, "denied"),
        upstream_response(206, Some("bytes 0-0/6"), "f"),
    ]);
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(
            get("/bucket/object.bin")
                .header("range", "bytes=0-0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_string(response).await, "denied");
    assert_eq!(upstream.requests().len(), 1);
}

#[tokio::test]
async fn test_no_range_single_attempt_even_without_content_range() {
    let upstream = ScriptedUpstream::new(vec![
        upstream_response(200, None, "full"),
        upstream_response(200, None, "unused"),
    ]);
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(get("/bucket/object.bin").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "full");
    assert_eq!(upstream.requests().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_is_bad_gateway() {
    let upstream = ScriptedUpstream::new(Vec::new());
    let response = app(settings(BucketMode::PathStyle), upstream.clone())
        .oneshot(get("/bucket/object.bin").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(upstream.requests().len(), 1);
}

#[tokio::test]
async fn test_admin_health() {
    let response = b2_edge_proxy::server::admin_app(true)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"status":"ok"}"#);
}

#[tokio::test]
async fn test_admin_health_without_metrics() {
    let admin = b2_edge_proxy::server::admin_app(false);

    let health = admin
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body_string(health).await, r#"{"status":"ok"}"#);

    let metrics = admin
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.status(), StatusCode::NOT_FOUND);
}
