//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the request/response counters kept per route group
//! - Mirror every counter into the `metrics` facade for Prometheus scraping
//! - Snapshot counters for the expvar-style JSON dump
//!
//! # Metrics
//! - `<namespace>.request.count`: requests entering the group
//! - `<namespace>.response.count`: responses written
//! - `<namespace>.response.valid.count` / `.response.errors.count`
//! - `<namespace>.<result name>`: one counter per result id
//! - `apm_request_duration_seconds` (histogram): handling latency by group
//!
//! # Design Decisions
//! - Registries are created once at startup and injected into middleware
//! - Counter updates are atomic increments plus a facade handle increment
//! - The Prometheus recorder must be installed before registries are built,
//!   otherwise facade handles are no-ops (local atomics still count)

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::http::result::ResultId;

/// Identifies a monitoring counter within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterId {
    RequestCount,
    ResponseCount,
    ResponseValidCount,
    ResponseErrorsCount,
    Result(ResultId),
}

impl CounterId {
    pub fn name(&self) -> &'static str {
        match self {
            CounterId::RequestCount => "request.count",
            CounterId::ResponseCount => "response.count",
            CounterId::ResponseValidCount => "response.valid.count",
            CounterId::ResponseErrorsCount => "response.errors.count",
            CounterId::Result(id) => id.name(),
        }
    }

    fn all() -> impl Iterator<Item = CounterId> {
        [
            CounterId::RequestCount,
            CounterId::ResponseCount,
            CounterId::ResponseValidCount,
            CounterId::ResponseErrorsCount,
        ]
        .into_iter()
        .chain(ResultId::ALL.into_iter().map(CounterId::Result))
    }
}

/// Monotonic counter backed by a local atomic and a facade handle.
pub struct Counter {
    name: String,
    value: AtomicI64,
    handle: metrics::Counter,
}

impl Counter {
    pub fn new(name: String) -> Self {
        let handle = metrics::counter!(name.clone());
        Self {
            name,
            value: AtomicI64::new(0),
            handle,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
        self.handle.increment(1);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.name)
            .field("value", &self.get())
            .finish()
    }
}

/// Source of monitoring counters for a route group.
pub trait CounterRegistry: Send + Sync {
    /// Counter for `id`, or `None` when this registry does not track it.
    fn lookup(&self, id: CounterId) -> Option<&Counter>;

    /// Prefix for this registry's counters.
    fn namespace(&self) -> &str;
}

/// Registry holding every `CounterId` under one namespace.
#[derive(Debug)]
pub struct MonitoringRegistry {
    namespace: String,
    counters: HashMap<CounterId, Counter>,
}

impl MonitoringRegistry {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let counters = CounterId::all()
            .map(|id| (id, Counter::new(format!("{}.{}", namespace, id.name()))))
            .collect();
        Self {
            namespace,
            counters,
        }
    }

    /// Current value of every counter keyed by full name.
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.counters
            .values()
            .map(|c| (c.name().to_string(), c.get()))
            .collect()
    }
}

impl CounterRegistry for MonitoringRegistry {
    fn lookup(&self, id: CounterId) -> Option<&Counter> {
        self.counters.get(&id)
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Record how long a request took to handle.
pub fn record_request_duration(namespace: &str, elapsed: Duration) {
    metrics::histogram!("apm_request_duration_seconds", "group" => namespace.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record an event batch handed to the publisher.
pub fn record_published(events: usize) {
    metrics::counter!("apm_intake_events_published_total").increment(events as u64);
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
