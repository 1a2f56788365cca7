//! Request-scoped helpers.
//!
//! # Responsibilities
//! - Stamp request receive time and request ID into extensions
//! - Resolve the client address (proxy headers first, then the peer)
//! - Read query parameters
//!
//! # Design Decisions
//! - Proxy headers are trusted as given; the first `X-Forwarded-For` hop wins
//! - Helpers take borrowed parts so they work on any `Request<B>`

use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};

use axum::http::{HeaderMap, Uri};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

/// When the server received the request.
#[derive(Debug, Clone, Copy)]
pub struct RequestTime {
    /// Wall-clock receive time, attached to published batches.
    pub received: SystemTime,
    /// Monotonic receive time, used for durations.
    pub started: Instant,
}

impl RequestTime {
    pub fn now() -> Self {
        Self {
            received: SystemTime::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Unique identifier assigned to each request by the logging middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Client address used for logging and rate limiting.
///
/// Uses the first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer IP.
/// Returns an empty string when nothing is known.
pub fn remote_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// First value of query parameter `key`.
pub fn query_param(uri: &Uri, key: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Whether query parameter `key` is present, with or without a value.
pub fn query_has(uri: &Uri, key: &str) -> bool {
    uri.query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).any(|(k, _)| k == key))
        .unwrap_or(false)
}

/// Header value as a string, empty when absent or not visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
