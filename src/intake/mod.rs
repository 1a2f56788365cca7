//! Event intake subsystem.
//!
//! # Data Flow
//! ```text
//! IntakeHandler (handler.rs)
//!     → read_body / body_reader (decoder.rs)
//!     → RequestDecoder (decoder.rs, request metadata)
//!     → StreamProcessor (stream.rs trait, NdjsonProcessor in processor.rs)
//!     → Publisher
//!     → StreamResult aggregated into one response
//! ```

pub mod decoder;
pub mod handler;
pub mod processor;
pub mod stream;

pub use decoder::RequestDecoder;
pub use handler::IntakeHandler;
pub use processor::NdjsonProcessor;
pub use stream::{ErrorKind, StreamError, StreamProcessor, StreamResult};
