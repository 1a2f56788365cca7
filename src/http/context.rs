//! Per-request context.
//!
//! # Responsibilities
//! - Hold the request, client address, logger span, auth flags and result
//! - Buffer the response until the dispatcher hands it to the connection
//! - Serialize the result exactly once (`write`)
//!
//! # Design Decisions
//! - Contexts are pooled; `reset` erases every field set by the previous request
//! - Handlers only mutate the result; `write` decides status, headers and body
//! - Plain-text responses JSON-encode non-string bodies compactly

use std::net::SocketAddr;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode},
};
use serde_json::{json, Value};
use tracing::Span;

use crate::http::request::{header_str, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
use crate::http::result::RequestResult;

/// Buffered response owned by a context until dispatch.
#[derive(Debug)]
struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    written: bool,
}

impl Default for ResponseSink {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            written: false,
        }
    }
}

impl ResponseSink {
    fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body = Bytes::new();
        self.written = false;
    }
}

/// State for one request as it flows through the middleware chain.
#[derive(Debug)]
pub struct Context {
    pub request: Request<Body>,
    pub remote_addr: Option<SocketAddr>,
    /// Request-scoped span; set by the logging middleware.
    pub logger: Span,
    /// Caller presented the configured secret token (or none is configured).
    pub authorized: bool,
    /// A secret token is configured.
    pub token_set: bool,
    pub result: RequestResult,
    response: ResponseSink,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            request: Request::default(),
            remote_addr: None,
            logger: Span::none(),
            authorized: false,
            token_set: false,
            result: RequestResult::new(),
            response: ResponseSink::default(),
        }
    }
}

impl Context {
    pub fn new(request: Request<Body>, remote_addr: Option<SocketAddr>) -> Self {
        let mut ctx = Self::default();
        ctx.reset(request, remote_addr);
        ctx
    }

    /// Prepare for a new request, erasing everything from the previous one.
    pub fn reset(&mut self, request: Request<Body>, remote_addr: Option<SocketAddr>) {
        self.request = request;
        self.remote_addr = remote_addr;
        self.logger = Span::none();
        self.authorized = false;
        self.token_set = false;
        self.result.reset();
        self.response.reset();
    }

    /// Response headers. Handlers may add headers before `write`.
    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.response.headers
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    pub fn is_written(&self) -> bool {
        self.response.written
    }

    /// Serialize the result into the response. Only the first call has an effect.
    pub fn write(&mut self) {
        if self.response.written {
            tracing::warn!(parent: &self.logger, "multiple write attempts");
            return;
        }
        self.response.written = true;

        let status = self.result.status();
        self.response.status = status;
        self.response.headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );

        let body = if self.result.is_failure() {
            match &self.result.body {
                None => Some(json!({
                    "error": self
                        .result
                        .error_message()
                        .unwrap_or_else(|| self.result.effective_id().keyword().to_string()),
                })),
                Some(Value::String(msg)) => Some(json!({ "error": msg })),
                Some(other) => Some(other.clone()),
            }
        } else {
            self.result.body.clone()
        };

        let Some(body) = body else {
            return;
        };

        let accept = header_str(self.request.headers(), header::ACCEPT);
        if accept.contains("*/*") || accept.contains(CONTENT_TYPE_JSON) {
            self.response.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(CONTENT_TYPE_JSON),
            );
            match serde_json::to_vec_pretty(&body) {
                Ok(mut buf) => {
                    buf.push(b'\n');
                    self.response.body = Bytes::from(buf);
                }
                Err(e) => {
                    tracing::error!(parent: &self.logger, error = %e, "failed to encode response body");
                }
            }
        } else {
            self.response.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(CONTENT_TYPE_TEXT),
            );
            let text = match body {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.response.body = Bytes::from(text + "\n");
        }
    }

    /// Move the buffered response out, leaving an empty sink behind.
    pub fn take_response(&mut self) -> Response<Body> {
        let body = std::mem::take(&mut self.response.body);
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.response.status;
        *response.headers_mut() = std::mem::take(&mut self.response.headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::result::ResultId;
    use axum::body::to_bytes;

    fn ctx_with_accept(accept: Option<&'static str>) -> Context {
        let mut builder = Request::builder().uri("/");
        if let Some(a) = accept {
            builder = builder.header(header::ACCEPT, a);
        }
        Context::new(builder.body(Body::empty()).unwrap(), None)
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_error_without_body_is_wrapped_as_json() {
        let mut ctx = ctx_with_accept(Some("*/*"));
        ctx.result.set_with_error(ResultId::Forbidden, "endpoint is disabled");
        ctx.write();

        let response = ctx.take_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE_JSON);
        assert_eq!(
            body_string(response).await,
            "{\n  \"error\": \"endpoint is disabled\"\n}\n"
        );
    }

    #[tokio::test]
    async fn test_plain_text_string_body() {
        let mut ctx = ctx_with_accept(None);
        ctx.result.set_with_body(ResultId::Ok, "hello");
        ctx.write();

        let response = ctx.take_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE_TEXT);
        assert_eq!(body_string(response).await, "hello\n");
    }

    #[tokio::test]
    async fn test_plain_text_encodes_objects_compactly() {
        let mut ctx = ctx_with_accept(Some("text/html"));
        ctx.result.set_with_error(ResultId::Unauthorized, "invalid token");
        ctx.write();

        let response = ctx.take_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, "{\"error\":\"invalid token\"}\n");
    }

    #[tokio::test]
    async fn test_success_without_body_writes_headers_only() {
        let mut ctx = ctx_with_accept(Some("application/json"));
        ctx.result.set_for(ResultId::Accepted);
        ctx.write();

        let response = ctx.take_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn test_second_write_is_ignored() {
        let mut ctx = ctx_with_accept(Some("*/*"));
        ctx.result.set_for(ResultId::Accepted);
        ctx.write();
        ctx.result.set_for(ResultId::Internal);
        ctx.write();

        let response = ctx.take_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unset_result_writes_internal_error() {
        let mut ctx = ctx_with_accept(Some("*/*"));
        ctx.write();
        let response = ctx.take_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_string(response).await,
            "{\n  \"error\": \"internal error\"\n}\n"
        );
    }

    #[test]
    fn test_reset_erases_previous_request() {
        let mut ctx = ctx_with_accept(Some("*/*"));
        ctx.authorized = true;
        ctx.token_set = true;
        ctx.header_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        ctx.result.set_with_error(ResultId::RateLimit, "slow down");
        ctx.write();

        let next = Request::builder().uri("/next").body(Body::empty()).unwrap();
        ctx.reset(next, Some("127.0.0.1:1".parse().unwrap()));

        assert!(!ctx.authorized);
        assert!(!ctx.token_set);
        assert!(!ctx.is_written());
        assert!(ctx.result.id.is_none());
        assert!(ctx.result.err.is_none());
        assert!(ctx.response_headers().is_empty());
        assert_eq!(ctx.request.uri().path(), "/next");
        assert!(ctx.logger.is_none());
    }
}
