//! Request logging.
//!
//! # Responsibilities
//! - Assign each request a UUID request ID
//! - Open a request span with method, URL, client address, user agent and
//!   content length, stored as the context logger
//! - Log one line per request once the response is decided
//!
//! # Design Decisions
//! - Successful requests log at info, failures at error with the error text
//!   and stacktrace (if one was captured)
//! - The inner handler runs instrumented by the request span, so every event
//!   logged downstream carries the request fields

use std::sync::Arc;

use axum::http::header;
use tracing::Instrument;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::http::request::{header_str, remote_addr, RequestId};

struct LogRequests {
    inner: BoxHandler,
}

impl Handler for LogRequests {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let request_id = RequestId::new();
            let headers = ctx.request.headers();
            let span = tracing::info_span!(
                "request",
                request_id = %request_id.as_str(),
                method = %ctx.request.method(),
                url = %ctx.request.uri(),
                remote_address = %remote_addr(headers, ctx.remote_addr),
                user_agent = %header_str(headers, header::USER_AGENT),
                content_length = %header_str(headers, header::CONTENT_LENGTH),
            );
            ctx.request.extensions_mut().insert(request_id);
            ctx.logger = span.clone();

            self.inner.handle(&mut *ctx).instrument(span.clone()).await;

            let status = ctx.result.status().as_u16();
            if status < 400 {
                tracing::info!(parent: &span, response_code = status, "handled request");
            } else {
                let error = ctx.result.error_message().unwrap_or_default();
                match ctx.result.stacktrace.as_deref() {
                    Some(stacktrace) => tracing::error!(
                        parent: &span,
                        response_code = status,
                        error = %error,
                        stacktrace = %stacktrace,
                        "error handling request"
                    ),
                    None => tracing::error!(
                        parent: &span,
                        response_code = status,
                        error = %error,
                        "error handling request"
                    ),
                }
            }
        })
    }
}

/// Log every request with a request-scoped span.
pub fn log() -> Middleware {
    Middleware::new("log", |inner| Arc::new(LogRequests { inner }))
}
