//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the intake server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration for the intake server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Shared secret agents must present as `Authorization: Bearer <token>`.
    /// Empty disables authorization.
    pub secret_token: String,

    /// Attach client IP and user agent to request metadata.
    pub capture_personal_data: bool,

    /// Event stream limits.
    pub intake: IntakeConfig,

    /// Publish queue between intake and the downstream pipeline.
    pub queue: QueueConfig,

    /// Real user monitoring (browser) endpoint.
    pub rum: RumConfig,

    /// Central agent configuration endpoint.
    pub agent_config: AgentConfigConfig,

    /// Counter dump endpoint.
    pub expvar: ExpvarConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            secret_token: String::new(),
            capture_personal_data: true,
            intake: IntakeConfig::default(),
            queue: QueueConfig::default(),
            rum: RumConfig::default(),
            agent_config: AgentConfigConfig::default(),
            expvar: ExpvarConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8200").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8200".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Time allowed for draining the publish queue on shutdown, in seconds.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 5,
        }
    }
}

/// Limits applied while reading an event stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Maximum size of a single event line in bytes.
    pub max_event_size: usize,

    /// Maximum size of a request body in bytes (before decompression).
    pub max_body_size: usize,

    /// Events per published batch; also the rate-limit token cost per batch.
    pub batch_size: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_event_size: 300 * 1024,
            max_body_size: 30 * 1024 * 1024,
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of batches the publish queue holds.
    pub capacity: usize,

    /// How long a publish waits for queue space before failing, in milliseconds.
    pub full_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            full_timeout_ms: 1000,
        }
    }
}

/// Real user monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RumConfig {
    /// Enable the browser intake endpoint.
    pub enabled: bool,

    /// Origin glob patterns accepted by CORS (`*` matches anything).
    pub allow_origins: Vec<String>,

    /// Per-client event rate limit.
    pub event_rate: EventRateConfig,
}

impl Default for RumConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: vec!["*".to_string()],
            event_rate: EventRateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventRateConfig {
    /// Events per second per client.
    pub limit: u32,

    /// Number of distinct clients tracked at once.
    pub lru_size: usize,
}

impl Default for EventRateConfig {
    fn default() -> Self {
        Self {
            limit: 300,
            lru_size: 1000,
        }
    }
}

/// Agent configuration endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfigConfig {
    /// Enable the endpoint. Disabled endpoints answer 403.
    pub enabled: bool,

    /// `Cache-Control` max-age for successful responses, in seconds.
    pub cache_expiration_secs: u64,

    /// Settings served per service.
    pub services: Vec<ServiceSettings>,
}

impl Default for AgentConfigConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_expiration_secs: 30,
            services: Vec::new(),
        }
    }
}

/// Agent settings for one service, optionally scoped to an environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSettings {
    pub name: String,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpvarConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for ExpvarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "/debug/vars".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
