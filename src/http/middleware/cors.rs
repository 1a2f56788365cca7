//! Cross-origin request handling for browser intake.
//!
//! # Responsibilities
//! - Match the request `Origin` against configured glob patterns
//! - Answer `OPTIONS` preflights directly
//! - Echo allowed origins on actual requests; reject the rest with 403
//!
//! # Design Decisions
//! - Patterns compile once into a single anchored regex per pattern; `*`
//!   matches any run of characters, everything else is literal
//! - A missing `Origin` header is matched as the empty string

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use regex::Regex;

use crate::http::context::Context;
use crate::http::handler::{BoxFuture, BoxHandler, Handler, Middleware};
use crate::http::request::header_str;
use crate::http::result::ResultId;

const MAX_AGE_SECS: &str = "3600";
const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Content-Encoding, Accept";

/// Compiled set of origin glob patterns.
#[derive(Debug, Clone)]
pub struct OriginMatcher {
    patterns: Vec<Regex>,
}

impl OriginMatcher {
    pub fn new<S: AsRef<str>>(origins: &[S]) -> Result<Self, regex::Error> {
        let patterns = origins
            .iter()
            .map(|origin| {
                let parts: Vec<String> = origin.as_ref().split('*').map(regex::escape).collect();
                Regex::new(&format!("^{}$", parts.join(".*")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(origin))
    }
}

struct Cors {
    origins: Arc<OriginMatcher>,
    inner: BoxHandler,
}

impl Handler for Cors {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        let origin = header_str(ctx.request.headers(), header::ORIGIN).to_string();
        let allowed = self.origins.is_allowed(&origin);
        let origin_value = HeaderValue::from_str(&origin).ok();

        if ctx.request.method() == Method::OPTIONS {
            return Box::pin(async move {
                let headers = ctx.header_mut();
                if let (true, Some(value)) = (allowed, origin_value) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                }
                headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static(ALLOW_METHODS),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static(ALLOW_HEADERS),
                );
                headers.insert(
                    header::ACCESS_CONTROL_MAX_AGE,
                    HeaderValue::from_static(MAX_AGE_SECS),
                );
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                ctx.result.set_for(ResultId::Ok);
                ctx.write();
            });
        }

        match (allowed, origin_value) {
            (true, Some(value)) => {
                ctx.header_mut()
                    .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                self.inner.handle(ctx)
            }
            _ => Box::pin(async move {
                ctx.result.set_with_error(
                    ResultId::Forbidden,
                    format!("origin: '{}' is not allowed", origin),
                );
                ctx.write();
            }),
        }
    }
}

/// Enforce the origin allow-list and answer preflight requests.
pub fn cors(origins: OriginMatcher) -> Middleware {
    let origins = Arc::new(origins);
    Middleware::new("cors", move |inner| {
        Arc::new(Cors {
            origins: origins.clone(),
            inner,
        })
    })
}
