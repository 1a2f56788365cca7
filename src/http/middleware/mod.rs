//! Request middleware.
//!
//! Each constructor returns a named `Middleware` value. Route tables list them
//! outermost first and fold them around the endpoint handler once at startup.

pub mod auth;
pub mod cors;
pub mod kill_switch;
pub mod log;
pub mod monitoring;
pub mod panic;
pub mod request_time;

pub use auth::{require_authorization, set_authorization};
pub use cors::{cors, OriginMatcher};
pub use kill_switch::kill_switch;
pub use log::log;
pub use monitoring::monitoring;
pub use panic::recover_panic;
pub use request_time::request_time;
