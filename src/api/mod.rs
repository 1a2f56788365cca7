//! Route table.
//!
//! # Routes
//! ```text
//! /                       root.rs          log → monitoring → recover_panic → set_authorization
//! /intake/v2/events       intake handler   log → monitoring → recover_panic → request_time
//!                                          → require_authorization
//! /intake/v2/rum/events   intake handler   log → monitoring → recover_panic → kill_switch
//!                                          → request_time → cors
//! /config/v1/agents       agent_config.rs  log → monitoring → recover_panic → kill_switch
//!                                          → require_authorization → set_authorization
//! <expvar.url>            expvar.rs        (no chain)
//! ```
//!
//! Every chained route is dispatched through one shared `ContextPool`.

pub mod agent_config;
pub mod expvar;
pub mod root;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response},
    routing::{any, get},
    Router,
};

use crate::config::ServerConfig;
use crate::http::handler::{BoxFuture, BoxHandler, Chain, Middleware};
use crate::http::middleware::{
    cors, kill_switch, log, monitoring, recover_panic, request_time, require_authorization,
    set_authorization, OriginMatcher,
};
use crate::http::pool::ContextPool;
use crate::intake::{IntakeHandler, NdjsonProcessor, RequestDecoder};
use crate::observability::{CounterRegistry, MonitoringRegistry};
use crate::publish::Publisher;
use crate::security::{RateLimitCache, RateLimitError};

use self::agent_config::{AgentConfigFetcher, AgentConfigHandler, StaticFetcher};
use self::root::RootHandler;

pub const ROOT_PATH: &str = "/";
pub const BACKEND_INTAKE_PATH: &str = "/intake/v2/events";
pub const RUM_INTAKE_PATH: &str = "/intake/v2/rum/events";
pub const AGENT_CONFIG_PATH: &str = "/config/v1/agents";

pub const INTAKE_NAMESPACE: &str = "apm-server.server";
pub const AGENT_CONFIG_NAMESPACE: &str = "apm-server.acm";
pub const ROOT_NAMESPACE: &str = "apm-server.root";

pub use crate::security::RUM_BURST_MULTIPLIER;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid RUM rate limit: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("invalid allowed origin pattern: {0}")]
    Origin(#[from] regex::Error),
}

/// Collaborators the routes hand work to.
pub struct Dependencies {
    pub publisher: Arc<dyn Publisher>,
    /// Overrides the config-file fetcher when set.
    pub agent_config_fetcher: Option<Arc<dyn AgentConfigFetcher>>,
}

impl Dependencies {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            agent_config_fetcher: None,
        }
    }
}

/// Counter registries, one per route group.
#[derive(Debug, Clone)]
pub struct Registries {
    pub intake: Arc<MonitoringRegistry>,
    pub agent_config: Arc<MonitoringRegistry>,
    pub root: Arc<MonitoringRegistry>,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            intake: Arc::new(MonitoringRegistry::new(INTAKE_NAMESPACE)),
            agent_config: Arc::new(MonitoringRegistry::new(AGENT_CONFIG_NAMESPACE)),
            root: Arc::new(MonitoringRegistry::new(ROOT_NAMESPACE)),
        }
    }

    pub fn all(&self) -> Vec<Arc<MonitoringRegistry>> {
        vec![
            self.intake.clone(),
            self.agent_config.clone(),
            self.root.clone(),
        ]
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware every chained route starts with.
fn base(registry: &Arc<MonitoringRegistry>) -> Vec<Middleware> {
    let registry: Arc<dyn CounterRegistry> = registry.clone();
    vec![log(), monitoring(registry), recover_panic()]
}

pub fn backend_intake_chain(config: &ServerConfig, registries: &Registries) -> Chain {
    let mut middleware = base(&registries.intake);
    middleware.push(request_time());
    middleware.push(require_authorization(&config.secret_token));
    Chain::new(middleware)
}

pub fn rum_intake_chain(config: &ServerConfig, registries: &Registries) -> Result<Chain, RouteError> {
    let origins = OriginMatcher::new(config.rum.allow_origins.as_slice())?;
    let mut middleware = base(&registries.intake);
    middleware.push(kill_switch(config.rum.enabled));
    middleware.push(request_time());
    middleware.push(cors(origins));
    Ok(Chain::new(middleware))
}

pub fn agent_config_chain(config: &ServerConfig, registries: &Registries, enabled: bool) -> Chain {
    let mut middleware = base(&registries.agent_config);
    middleware.push(kill_switch(enabled));
    middleware.push(require_authorization(&config.secret_token));
    middleware.push(set_authorization(&config.secret_token));
    Chain::new(middleware)
}

pub fn root_chain(config: &ServerConfig, registries: &Registries) -> Chain {
    let mut middleware = base(&registries.root);
    middleware.push(set_authorization(&config.secret_token));
    Chain::new(middleware)
}

/// Axum endpoint running `handler` through the shared context pool.
fn endpoint(
    pool: Arc<ContextPool>,
    handler: BoxHandler,
) -> impl Fn(Request<Body>) -> BoxFuture<'static, Response<Body>> + Clone + Send + Sync + 'static {
    move |request: Request<Body>| -> BoxFuture<'static, Response<Body>> {
        let pool = pool.clone();
        let handler = handler.clone();
        Box::pin(async move {
            let remote_addr = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0);
            pool.serve(handler.as_ref(), request, remote_addr).await
        })
    }
}

/// Build every route of the server.
pub fn build_router(config: &ServerConfig, deps: Dependencies, registries: &Registries) -> Result<Router, RouteError> {
    let pool = Arc::new(ContextPool::default());
    let augment = config.capture_personal_data;

    let processor = Arc::new(NdjsonProcessor::new(&config.intake, deps.publisher.clone()));

    let backend = IntakeHandler::new(
        processor.clone(),
        RequestDecoder::System { augment },
        None,
        config.intake.max_body_size,
    );
    let backend = backend_intake_chain(config, registries).then(Arc::new(backend));

    let rum_limiter = if config.rum.enabled {
        Some(Arc::new(RateLimitCache::new(
            config.rum.event_rate.lru_size,
            config.rum.event_rate.limit,
            RUM_BURST_MULTIPLIER,
        )?))
    } else {
        None
    };
    let rum = IntakeHandler::new(
        processor,
        RequestDecoder::User { augment },
        rum_limiter,
        config.intake.max_body_size,
    );
    let rum = rum_intake_chain(config, registries)?.then(Arc::new(rum));

    let fetcher: Option<Arc<dyn AgentConfigFetcher>> = match deps.agent_config_fetcher {
        Some(fetcher) => Some(fetcher),
        None if config.agent_config.enabled => {
            Some(Arc::new(StaticFetcher::from_config(&config.agent_config)))
        }
        None => None,
    };
    let fetcher_configured = fetcher.is_some();
    let agent_config = AgentConfigHandler::new(
        fetcher.unwrap_or_else(|| Arc::new(StaticFetcher::default())),
        config.agent_config.cache_expiration_secs,
    );
    let agent_config =
        agent_config_chain(config, registries, fetcher_configured).then(Arc::new(agent_config));

    let root = root_chain(config, registries).then(Arc::new(RootHandler));

    let mut router = Router::new()
        .route(ROOT_PATH, any(endpoint(pool.clone(), root.clone())))
        .route(BACKEND_INTAKE_PATH, any(endpoint(pool.clone(), backend)))
        .route(RUM_INTAKE_PATH, any(endpoint(pool.clone(), rum)))
        .route(AGENT_CONFIG_PATH, any(endpoint(pool.clone(), agent_config)))
        .fallback(endpoint(pool, root));

    if config.expvar.enabled {
        let all = Arc::new(registries.all());
        router = router.route(
            &config.expvar.url,
            get(move || expvar::dump(all.clone())),
        );
    }

    tracing::debug!(
        rum_enabled = config.rum.enabled,
        agent_config_enabled = fetcher_configured,
        expvar_enabled = config.expvar.enabled,
        "Routes built"
    );
    Ok(router)
}
