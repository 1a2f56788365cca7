//! Request outcome catalog.
//!
//! # Responsibilities
//! - Enumerate every outcome a request can have
//! - Bind each outcome to its HTTP status, keyword and counter name
//! - Carry the outcome of one request until it is written
//!
//! # Design Decisions
//! - The mapping is a closed enum with `match` arms, so it is total and immutable
//! - Unknown counter names resolve to `Internal` (500)

use std::fmt;

use axum::http::StatusCode;
use serde_json::Value;

/// Boxed error carried by a request result.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identifies the outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultId {
    Ok,
    Accepted,
    NotModified,
    Forbidden,
    Unauthorized,
    NotFound,
    InvalidQuery,
    RequestTooLarge,
    Decode,
    Validate,
    RateLimit,
    MethodNotAllowed,
    FullQueue,
    ShuttingDown,
    ServiceUnavailable,
    Internal,
}

impl ResultId {
    pub const ALL: [ResultId; 16] = [
        ResultId::Ok,
        ResultId::Accepted,
        ResultId::NotModified,
        ResultId::Forbidden,
        ResultId::Unauthorized,
        ResultId::NotFound,
        ResultId::InvalidQuery,
        ResultId::RequestTooLarge,
        ResultId::Decode,
        ResultId::Validate,
        ResultId::RateLimit,
        ResultId::MethodNotAllowed,
        ResultId::FullQueue,
        ResultId::ShuttingDown,
        ResultId::ServiceUnavailable,
        ResultId::Internal,
    ];

    /// Counter name identifying this outcome.
    pub fn name(self) -> &'static str {
        match self {
            ResultId::Ok => "response.valid.ok",
            ResultId::Accepted => "response.valid.accepted",
            ResultId::NotModified => "response.valid.notmodified",
            ResultId::Forbidden => "response.errors.forbidden",
            ResultId::Unauthorized => "response.errors.unauthorized",
            ResultId::NotFound => "response.errors.notfound",
            ResultId::InvalidQuery => "response.errors.invalidquery",
            ResultId::RequestTooLarge => "response.errors.toolarge",
            ResultId::Decode => "response.errors.decode",
            ResultId::Validate => "response.errors.validate",
            ResultId::RateLimit => "response.errors.ratelimit",
            ResultId::MethodNotAllowed => "response.errors.method",
            ResultId::FullQueue => "response.errors.queue",
            ResultId::ShuttingDown => "response.errors.closed",
            ResultId::ServiceUnavailable => "response.errors.unavailable",
            ResultId::Internal => "response.errors.internal",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ResultId::Ok => StatusCode::OK,
            ResultId::Accepted => StatusCode::ACCEPTED,
            ResultId::NotModified => StatusCode::NOT_MODIFIED,
            ResultId::Forbidden => StatusCode::FORBIDDEN,
            ResultId::Unauthorized => StatusCode::UNAUTHORIZED,
            ResultId::NotFound => StatusCode::NOT_FOUND,
            ResultId::InvalidQuery | ResultId::Decode | ResultId::Validate => {
                StatusCode::BAD_REQUEST
            }
            ResultId::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ResultId::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ResultId::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ResultId::FullQueue | ResultId::ShuttingDown | ResultId::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ResultId::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short human-readable description sent with the status.
    pub fn keyword(self) -> &'static str {
        match self {
            ResultId::Ok => "request ok",
            ResultId::Accepted => "request accepted",
            ResultId::NotModified => "not modified",
            ResultId::Forbidden => "forbidden request",
            ResultId::Unauthorized => "unauthorized",
            ResultId::NotFound => "404 page not found",
            ResultId::InvalidQuery => "invalid query",
            ResultId::RequestTooLarge => "request body too large",
            ResultId::Decode => "data decoding error",
            ResultId::Validate => "data validation error",
            ResultId::RateLimit => "too many requests",
            ResultId::MethodNotAllowed => "method not supported",
            ResultId::FullQueue => "queue is full",
            ResultId::ShuttingDown => "server is shutting down",
            ResultId::ServiceUnavailable => "service unavailable",
            ResultId::Internal => "internal error",
        }
    }

    pub fn from_name(name: &str) -> Option<ResultId> {
        ResultId::ALL.into_iter().find(|id| id.name() == name)
    }

    pub fn is_error(self) -> bool {
        self.status().as_u16() >= 400
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a counter name, falling back to `Internal` for unknown names.
pub fn lookup(name: &str) -> ResultId {
    ResultId::from_name(name).unwrap_or(ResultId::Internal)
}

/// Error synthesized from a result keyword when no explicit error is given.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct KeywordError(pub &'static str);

/// Outcome of one request, written to the client by `Context::write`.
#[derive(Debug, Default)]
pub struct RequestResult {
    pub id: Option<ResultId>,
    pub status_code: Option<StatusCode>,
    pub keyword: &'static str,
    pub body: Option<Value>,
    pub err: Option<BoxError>,
    pub stacktrace: Option<String>,
}

impl RequestResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the zero value.
    pub fn reset(&mut self) {
        self.id = None;
        self.status_code = None;
        self.keyword = "";
        self.body = None;
        self.err = None;
        self.stacktrace = None;
    }

    /// Set canonical status and keyword for `id`, clearing body and error.
    pub fn set_for(&mut self, id: ResultId) {
        self.set(id, None, None);
    }

    pub fn set_with_error(&mut self, id: ResultId, err: impl Into<BoxError>) {
        self.set(id, None, Some(err.into()));
    }

    pub fn set_with_body(&mut self, id: ResultId, body: impl Into<Value>) {
        self.set(id, Some(body.into()), None);
    }

    /// General form. Error results always carry an error; the keyword is used
    /// when none is supplied.
    pub fn set(&mut self, id: ResultId, body: Option<Value>, err: Option<BoxError>) {
        self.id = Some(id);
        self.status_code = Some(id.status());
        self.keyword = id.keyword();
        self.body = body;
        self.stacktrace = None;
        self.err = match err {
            Some(e) => Some(e),
            None if id.is_error() => Some(Box::new(KeywordError(id.keyword()))),
            None => None,
        };
    }

    /// Id to report, with unset results treated as internal failures.
    pub fn effective_id(&self) -> ResultId {
        self.id.unwrap_or(ResultId::Internal)
    }

    pub fn status(&self) -> StatusCode {
        self.status_code
            .unwrap_or_else(|| self.effective_id().status())
    }

    pub fn is_failure(&self) -> bool {
        self.status().as_u16() >= 400
    }

    /// Error message, if any.
    pub fn error_message(&self) -> Option<String> {
        self.err.as_ref().map(|e| e.to_string())
    }
}
