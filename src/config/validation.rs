//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, addresses parse)
//! - Check CORS origin patterns compile
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;
use crate::http::middleware::cors::OriginMatcher;
use crate::security::RUM_BURST_MULTIPLIER;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            "must not be empty",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.intake.max_event_size == 0 {
        errors.push(ValidationError::new("intake.max_event_size", "must be > 0"));
    }
    if config.intake.max_body_size == 0 {
        errors.push(ValidationError::new("intake.max_body_size", "must be > 0"));
    }
    if config.intake.batch_size == 0 {
        errors.push(ValidationError::new("intake.batch_size", "must be > 0"));
    }

    if config.queue.capacity == 0 {
        errors.push(ValidationError::new("queue.capacity", "must be > 0"));
    }

    if config.rum.enabled {
        if config.rum.event_rate.lru_size == 0 {
            errors.push(ValidationError::new(
                "rum.event_rate.lru_size",
                "must be > 0",
            ));
        }
        let burst = config.rum.event_rate.limit as usize * RUM_BURST_MULTIPLIER as usize;
        if config.rum.event_rate.limit == 0 {
            errors.push(ValidationError::new("rum.event_rate.limit", "must be > 0"));
        } else if burst <= config.intake.batch_size {
            // one token per request plus batch_size per batch
            errors.push(ValidationError::new(
                "rum.event_rate.limit",
                format!(
                    "burst of {} tokens cannot admit a batch of {} events",
                    burst, config.intake.batch_size
                ),
            ));
        }
        if let Err(e) = OriginMatcher::new(config.rum.allow_origins.as_slice()) {
            errors.push(ValidationError::new("rum.allow_origins", e.to_string()));
        }
    }

    if config.agent_config.enabled {
        for svc in &config.agent_config.services {
            if svc.name.trim().is_empty() {
                errors.push(ValidationError::new(
                    "agent_config.services.name",
                    "must not be empty",
                ));
            }
        }
    }

    if config.expvar.enabled && !config.expvar.url.starts_with('/') {
        errors.push(ValidationError::new("expvar.url", "must start with '/'"));
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format '{}', expected 'pretty' or 'json'", other),
        )),
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
