//! Intake endpoint handler.
//!
//! # Request Flow
//! ```text
//! validate (POST, ndjson content type)
//!     → rate limit by client address (browser intake only)
//!     → read body (size limit) → decompress
//!     → decode request metadata
//!     → StreamProcessor::handle_stream
//!     → aggregate: worst error wins, 202 when clean
//! ```
//!
//! Every stage that fails early still produces the same response shape as a
//! stream failure: `{"accepted": n, "errors": [...]}` with `Connection: close`.

use std::sync::Arc;
use std::time::SystemTime;

use axum::http::{header, HeaderValue, Method};
use serde_json::Map;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, Handler};
use crate::http::request::{header_str, query_has, remote_addr, RequestTime, CONTENT_TYPE_NDJSON};
use crate::http::result::BoxError;
use crate::intake::decoder::{body_reader, read_body, BodyError, RequestDecoder};
use crate::intake::processor::MSG_RATE_LIMIT;
use crate::intake::stream::{ErrorKind, StreamError, StreamProcessor, StreamResult};
use crate::security::RateLimitCache;

pub const VERBOSE_PARAM: &str = "verbose";

/// Streaming intake endpoint.
pub struct IntakeHandler {
    processor: Arc<dyn StreamProcessor>,
    decoder: RequestDecoder,
    rate_limiter: Option<Arc<RateLimitCache>>,
    max_body_size: usize,
}

impl IntakeHandler {
    pub fn new(
        processor: Arc<dyn StreamProcessor>,
        decoder: RequestDecoder,
        rate_limiter: Option<Arc<RateLimitCache>>,
        max_body_size: usize,
    ) -> Self {
        Self {
            processor,
            decoder,
            rate_limiter,
            max_body_size,
        }
    }

    async fn process(&self, ctx: &mut Context) {
        let mut result = StreamResult::new();

        if let Err(err) = validate_request(ctx) {
            result.add_error(err);
            return send_response(ctx, result);
        }

        let client = remote_addr(ctx.request.headers(), ctx.remote_addr);
        let limiter = match &self.rate_limiter {
            Some(cache) => {
                let limiter = cache.get_or_create(&client);
                if !limiter.allow() {
                    result.add(ErrorKind::RateLimit, MSG_RATE_LIMIT);
                    return send_response(ctx, result);
                }
                Some(limiter)
            }
            None => None,
        };

        let encoding = header_str(ctx.request.headers(), header::CONTENT_ENCODING).to_string();
        let body = std::mem::take(ctx.request.body_mut());
        let bytes = match read_body(body, self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(BodyError::TooLarge) => {
                result.add(ErrorKind::InputTooLarge, BodyError::TooLarge.to_string());
                return send_response(ctx, result);
            }
            Err(e) => {
                result.add(ErrorKind::InvalidInput, e.to_string());
                return send_response(ctx, result);
            }
        };
        let reader = match body_reader(bytes, &encoding, self.max_body_size) {
            Ok(reader) => reader,
            Err(e) => {
                result.add(ErrorKind::InvalidInput, e.to_string());
                return send_response(ctx, result);
            }
        };

        let metadata = match self.decoder.decode(ctx.request.headers(), &client) {
            Ok(metadata) => metadata,
            Err(e) => {
                result.add(ErrorKind::InvalidInput, e.to_string());
                Map::new()
            }
        };

        let request_time = ctx
            .request
            .extensions()
            .get::<RequestTime>()
            .map(|t| t.received)
            .unwrap_or_else(SystemTime::now);

        let streamed = self
            .processor
            .handle_stream(limiter, metadata, request_time, reader)
            .await;
        result.merge(streamed);

        send_response(ctx, result);
    }
}

impl Handler for IntakeHandler {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(self.process(ctx))
    }
}

fn validate_request(ctx: &Context) -> Result<(), StreamError> {
    if ctx.request.method() != Method::POST {
        return Err(StreamError::new(
            ErrorKind::MethodForbidden,
            "only POST requests are supported",
        ));
    }
    let content_type = header_str(ctx.request.headers(), header::CONTENT_TYPE);
    if !content_type.contains(CONTENT_TYPE_NDJSON) {
        return Err(StreamError::new(
            ErrorKind::InvalidInput,
            format!("invalid content type: '{}'", content_type),
        ));
    }
    Ok(())
}

fn send_response(ctx: &mut Context, result: StreamResult) {
    let id = result.result_id();
    let failed = id.is_error();
    let verbose = query_has(ctx.request.uri(), VERBOSE_PARAM);

    if failed {
        ctx.header_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }

    let body = if failed || verbose {
        serde_json::to_value(&result).ok()
    } else {
        None
    };
    let err: Option<BoxError> = failed.then(|| result.error_string().into());

    ctx.result.set(id, body, err);
    ctx.write();
}
