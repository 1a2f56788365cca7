//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout, graceful shutdown)
//!     → api route table (one handler chain per route)
//!     → pool.rs (acquire a reset Context)
//!     → handler.rs chain: middleware/* around the endpoint handler
//!     → context.rs (RequestResult written into the response)
//!     → Send to client
//! ```

pub mod context;
pub mod handler;
pub mod middleware;
pub mod pool;
pub mod request;
pub mod result;
pub mod server;

pub use context::Context;
pub use handler::{BoxHandler, Chain, Handler, Middleware};
pub use pool::ContextPool;
pub use result::{RequestResult, ResultId};
pub use server::{HttpServer, ServerError};
