//! Inbound header filtering.
//!
//! Headers injected by the edge platform, or that would break signing or
//! transport if forwarded, are dropped before the request is signed.

use axum::http::{HeaderMap, HeaderName};

/// Headers never forwarded upstream.
pub const UNFORWARDED_HEADERS: &[&str] = &["x-forwarded-proto", "x-real-ip", "accept-encoding"];

/// Prefix of headers reserved by the edge platform.
pub const EDGE_HEADER_PREFIX: &str = "cf-";

/// Return the subset of `headers` that may be forwarded.
///
/// When `allowed` is set, only headers named in it survive (names are
/// compared lowercase).  All values of a surviving multi-valued header are
/// kept.
pub fn filter_headers(headers: &HeaderMap, allowed: Option<&[String]>) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_forwardable(name, allowed) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

fn is_forwardable(name: &HeaderName, allowed: Option<&[String]>) -> bool {
    let name = name.as_str();
    if UNFORWARDED_HEADERS.contains(&name) || name.starts_with(EDGE_HEADER_PREFIX) {
        return false;
    }
    match allowed {
        Some(list) => list.iter().any(|a| a.eq_ignore_ascii_case(name)),
        None => true,
    }
}
