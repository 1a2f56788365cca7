//! APM event intake server library.

pub mod api;
pub mod config;
pub mod http;
pub mod intake;
pub mod lifecycle;
pub mod observability;
pub mod publish;
pub mod security;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
