//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → http::middleware::auth (bearer token, constant-time compare)
//!     → http::middleware::cors (origin allow-list)
//!     → rate_limit.rs (per-client token bucket, LRU bounded)
//!     → intake handler
//! ```
//!
//! # Design Decisions
//! - Rate limiting applies to the browser intake only; backend agents are
//!   authenticated instead
//! - Limiter memory is bounded by the LRU size, not by client count

pub mod rate_limit;

pub use rate_limit::{RateLimitCache, RateLimitError, RateLimiter, RUM_BURST_MULTIPLIER};
