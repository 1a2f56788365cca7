//! Central agent configuration endpoint.
//!
//! Agents poll `GET /config/v1/agents?service.name=...` (or `POST` the same
//! query as JSON) and receive the settings for their service together with an
//! `ETag`. A repeated poll carrying that tag in `If-None-Match` gets `304`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderValue, Method};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::{AgentConfigConfig, ServiceSettings};
use crate::http::context::Context;
use crate::http::handler::{BoxFuture, Handler};
use crate::http::request::{header_str, query_param};
use crate::http::result::{BoxError, ResultId};
use crate::intake::decoder::{read_body, BodyError};

/// Upper bound for a `POST` query body.
const MAX_QUERY_BODY: usize = 64 * 1024;

const ERROR_MAX_AGE_SECS: u64 = 300;

pub const MSG_SERVICE_NAME_REQUIRED: &str = "service.name is required";

/// Service an agent asks settings for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentQuery {
    #[serde(default)]
    pub service: Service,
}

/// Settings for one service plus their version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub settings: BTreeMap<String, String>,
    pub etag: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to encode agent settings: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("agent configuration source unavailable: {0}")]
    Unavailable(String),
}

/// Source of agent settings.
#[async_trait]
pub trait AgentConfigFetcher: Send + Sync {
    async fn fetch(&self, query: &AgentQuery) -> Result<AgentSettings, FetchError>;
}

/// Serves the `[[agent_config.services]]` entries of the config file.
///
/// An entry with a matching environment wins over one without; a service
/// with no entry gets empty settings.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    services: Vec<ServiceSettings>,
}

impl StaticFetcher {
    pub fn new(services: Vec<ServiceSettings>) -> Self {
        Self { services }
    }

    pub fn from_config(config: &AgentConfigConfig) -> Self {
        Self::new(config.services.clone())
    }

    fn find(&self, service: &Service) -> Option<&ServiceSettings> {
        let by_name = || self.services.iter().filter(|s| s.name == service.name);
        by_name()
            .find(|s| s.environment.is_some() && s.environment == service.environment)
            .or_else(|| by_name().find(|s| s.environment.is_none()))
    }
}

#[async_trait]
impl AgentConfigFetcher for StaticFetcher {
    async fn fetch(&self, query: &AgentQuery) -> Result<AgentSettings, FetchError> {
        let settings = self
            .find(&query.service)
            .map(|s| s.settings.clone())
            .unwrap_or_default();
        let encoded = serde_json::to_vec(&settings)?;
        let etag = hex::encode(Sha256::digest(&encoded));
        Ok(AgentSettings { settings, etag })
    }
}

/// Request failure with the message shown to authorized callers.
struct QueryError {
    id: ResultId,
    message: String,
}

impl QueryError {
    fn new(id: ResultId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

pub struct AgentConfigHandler {
    fetcher: Arc<dyn AgentConfigFetcher>,
    cache_expiration_secs: u64,
}

impl AgentConfigHandler {
    pub fn new(fetcher: Arc<dyn AgentConfigFetcher>, cache_expiration_secs: u64) -> Self {
        Self {
            fetcher,
            cache_expiration_secs,
        }
    }

    async fn process(&self, ctx: &mut Context) {
        let query = match build_query(ctx).await {
            Ok(query) => query,
            Err(e) => return send_error(ctx, e),
        };

        let fetched = match self.fetcher.fetch(&query).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(parent: &ctx.logger, error = %e, service = %query.service.name, "agent config fetch failed");
                return send_error(
                    ctx,
                    QueryError::new(
                        ResultId::ServiceUnavailable,
                        format!("unable to retrieve agent configuration: {}", e),
                    ),
                );
            }
        };

        set_cache_control(ctx, self.cache_expiration_secs);
        let etag = format!("\"{}\"", fetched.etag);
        if let Ok(value) = HeaderValue::from_str(&etag) {
            ctx.header_mut().insert(header::ETAG, value);
        }

        let if_none_match = header_str(ctx.request.headers(), header::IF_NONE_MATCH);
        if !if_none_match.is_empty() && if_none_match.trim_matches('"') == fetched.etag {
            ctx.result.set_for(ResultId::NotModified);
        } else {
            let body = serde_json::to_value(&fetched.settings).unwrap_or(Value::Null);
            ctx.result.set_with_body(ResultId::Ok, body);
        }
        ctx.write();
    }
}

impl Handler for AgentConfigHandler {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(self.process(ctx))
    }
}

async fn build_query(ctx: &mut Context) -> Result<AgentQuery, QueryError> {
    let method = ctx.request.method().clone();
    let query = if method == Method::GET {
        AgentQuery {
            service: Service {
                name: query_param(ctx.request.uri(), "service.name").unwrap_or_default(),
                environment: query_param(ctx.request.uri(), "service.environment"),
            },
        }
    } else if method == Method::POST {
        let body = std::mem::take(ctx.request.body_mut());
        let bytes = read_body(body, MAX_QUERY_BODY).await.map_err(|e| match e {
            BodyError::TooLarge => QueryError::new(ResultId::RequestTooLarge, e.to_string()),
            e => QueryError::new(ResultId::InvalidQuery, e.to_string()),
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| QueryError::new(ResultId::InvalidQuery, format!("invalid query: {}", e)))?
    } else {
        return Err(QueryError::new(
            ResultId::MethodNotAllowed,
            format!("method not supported: {}", method),
        ));
    };
    if query.service.name.is_empty() {
        return Err(QueryError::new(ResultId::InvalidQuery, MSG_SERVICE_NAME_REQUIRED));
    }
    Ok(query)
}

fn set_cache_control(ctx: &mut Context, max_age_secs: u64) {
    let value = format!("max-age={}, must-revalidate", max_age_secs);
    if let Ok(value) = HeaderValue::from_str(&value) {
        ctx.header_mut().insert(header::CACHE_CONTROL, value);
    }
}

/// Callers that passed a configured token see the full message; everyone
/// else only the result keyword.
fn send_error(ctx: &mut Context, e: QueryError) {
    set_cache_control(ctx, ERROR_MAX_AGE_SECS);
    let message = if ctx.token_set || e.id == ResultId::InvalidQuery {
        e.message.clone()
    } else {
        e.id.keyword().to_string()
    };
    let err: BoxError = e.message.into();
    ctx.result.set(e.id, Some(Value::String(message)), Some(err));
    ctx.write();
}
