//! Stream outcome aggregation.
//!
//! # Responsibilities
//! - Classify per-line and per-request failures (`ErrorKind`)
//! - Collect them into a `StreamResult` with a capped error list
//! - Decide the single HTTP outcome for the whole request
//!
//! # Design Decisions
//! - One ascending severity table binds every kind to its `ResultId`; the
//!   outcome is the most severe kind seen, independent of arrival order
//! - Severity is tracked for every error, including those past the list cap

use std::fmt;
use std::io::BufRead;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::http::result::ResultId;
use crate::security::RateLimiter;

/// Errors kept in a response body.
pub const MAX_REPORTED_ERRORS: usize = 5;

/// Failure classes a stream can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidInput,
    MethodForbidden,
    InputTooLarge,
    RateLimit,
    Unclassified,
    QueueFull,
    ShuttingDown,
}

/// Least to most severe.
const SEVERITY: [(ErrorKind, ResultId); 7] = [
    (ErrorKind::InvalidInput, ResultId::Validate),
    (ErrorKind::MethodForbidden, ResultId::MethodNotAllowed),
    (ErrorKind::InputTooLarge, ResultId::RequestTooLarge),
    (ErrorKind::RateLimit, ResultId::RateLimit),
    (ErrorKind::Unclassified, ResultId::Internal),
    (ErrorKind::QueueFull, ResultId::FullQueue),
    (ErrorKind::ShuttingDown, ResultId::ShuttingDown),
];

impl ErrorKind {
    pub fn rank(self) -> usize {
        SEVERITY
            .iter()
            .position(|(kind, _)| *kind == self)
            .unwrap_or(SEVERITY.len())
    }

    pub fn result_id(self) -> ResultId {
        SEVERITY
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, id)| *id)
            .unwrap_or(ResultId::Internal)
    }
}

/// One reported failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl StreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            document: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.document {
            Some(doc) => write!(f, "{} [{}]", self.message, doc),
            None => f.write_str(&self.message),
        }
    }
}

/// Aggregated outcome of one intake request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamResult {
    pub accepted: usize,
    errors: Vec<StreamError>,
    #[serde(skip)]
    worst: Option<ErrorKind>,
    #[serde(skip)]
    total_errors: usize,
}

impl StreamResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.add_error(StreamError::new(kind, message));
    }

    pub fn add_error(&mut self, err: StreamError) {
        self.total_errors += 1;
        if self.worst.map_or(true, |w| err.kind.rank() > w.rank()) {
            self.worst = Some(err.kind);
        }
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(err);
        }
    }

    /// Fold another result into this one.
    pub fn merge(&mut self, other: StreamResult) {
        self.accepted += other.accepted;
        let skipped = other.total_errors - other.errors.len();
        for err in other.errors {
            self.add_error(err);
        }
        if let Some(kind) = other.worst {
            if self.worst.map_or(true, |w| kind.rank() > w.rank()) {
                self.worst = Some(kind);
            }
        }
        self.total_errors += skipped;
    }

    /// Reported errors (at most `MAX_REPORTED_ERRORS`).
    pub fn errors(&self) -> &[StreamError] {
        &self.errors
    }

    /// Every error added, reported or not.
    pub fn total_errors(&self) -> usize {
        self.total_errors
    }

    pub fn worst(&self) -> Option<ErrorKind> {
        self.worst
    }

    /// `Accepted` without errors, otherwise the most severe error's result.
    pub fn result_id(&self) -> ResultId {
        self.worst
            .map(ErrorKind::result_id)
            .unwrap_or(ResultId::Accepted)
    }

    pub fn error_string(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Decodes an event stream and hands its events downstream.
#[async_trait]
pub trait StreamProcessor: Send + Sync {
    /// Process every line of `reader`. `limiter`, when present, must grant
    /// tokens before each batch.
    async fn handle_stream(
        &self,
        limiter: Option<Arc<RateLimiter>>,
        metadata: Map<String, Value>,
        request_time: SystemTime,
        reader: Box<dyn BufRead + Send>,
    ) -> StreamResult;
}
