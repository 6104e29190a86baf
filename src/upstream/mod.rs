//! Upstream transports.
//!
//! The [`backend::Upstream`] trait abstracts over how a signed request
//! reaches the storage endpoint.  [`http::HttpUpstream`] sends it over
//! HTTPS with `reqwest`; tests substitute scripted implementations.

pub mod backend;
pub mod http;
