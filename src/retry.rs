//! Range-request retry.
//!
//! B2 occasionally answers a `Range` request with `200 OK` and the full
//! object instead of `206 Partial Content`.  When that happens the
//! response is cancelled and the request issued again, up to
//! [`RANGE_RETRY_ATTEMPTS`] times in total.

use axum::http::header::CONTENT_RANGE;
use metrics::counter;
use std::future::Future;
use tracing::{error, info, warn};

use crate::errors::ProxyError;
use crate::metrics::{RANGE_RETRIES_TOTAL, RANGE_RETRY_EXHAUSTED_TOTAL};
use crate::upstream::backend::UpstreamResponse;

/// Total attempts for a range request, including the first.
pub const RANGE_RETRY_ATTEMPTS: u32 = 3;

/// What to do with the response of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The range was honoured (`content-range` present).
    Success,
    /// Success status but no `content-range`: the range was ignored.
    Retry,
    /// Error status: return it as-is.
    GiveUp,
}

/// Classify an upstream response to a range request.
pub fn evaluate(response: &UpstreamResponse) -> Evaluation {
    if response.headers().contains_key(CONTENT_RANGE) {
        Evaluation::Success
    } else if response.status().is_success() {
        Evaluation::Retry
    } else {
        Evaluation::GiveUp
    }
}

/// Issue a range request through `attempt` until the upstream honours the
/// range, returns an error status, or the attempts run out.
///
/// `attempt` is called once per try and must produce a freshly signed
/// request.  A superseded response is dropped before the next call, which
/// aborts its body stream.  When attempts run out the last response is
/// returned unchanged.
pub async fn fetch_with_range_retry<F, Fut>(
    url: &str,
    mut attempt: F,
) -> Result<UpstreamResponse, ProxyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<UpstreamResponse, ProxyError>>,
{
    let mut remaining = RANGE_RETRY_ATTEMPTS;

    loop {
        let response = attempt().await?;

        match evaluate(&response) {
            Evaluation::Success => {
                if remaining < RANGE_RETRY_ATTEMPTS {
                    info!(
                        url = %url,
                        "Retry for {url} succeeded - response has content-range header"
                    );
                }
                return Ok(response);
            }
            Evaluation::GiveUp => return Ok(response),
            Evaluation::Retry => {
                remaining -= 1;
                if remaining == 0 {
                    counter!(RANGE_RETRY_EXHAUSTED_TOTAL).increment(1);
                    error!(
                        url = %url,
                        attempts = RANGE_RETRY_ATTEMPTS,
                        "Tried range request for {url} {RANGE_RETRY_ATTEMPTS} times, but no content-range in response"
                    );
                    return Ok(response);
                }

                counter!(RANGE_RETRIES_TOTAL).increment(1);
                warn!(
                    url = %url,
                    remaining = remaining,
                    "Range header in request for {url} but no content-range header in response. Will retry {remaining} more times"
                );
                // Cancel the unwanted full-body stream before re-issuing.
                drop(response);
            }
        }
    }
}
