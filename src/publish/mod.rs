//! Hand-off from intake to the downstream pipeline.
//!
//! # Data Flow
//! ```text
//! NdjsonProcessor
//!     → Publisher::publish(Batch)      (waits up to full_timeout for space)
//!     → bounded mpsc queue
//!     → run_consumer                   (drains batches, records stats)
//! ```
//!
//! # Design Decisions
//! - Backpressure is explicit: a full queue fails the publish after a timeout
//!   instead of blocking the request indefinitely
//! - Once stopped, publishes fail fast with `ShuttingDown`
//! - On shutdown the consumer closes the queue and drains what was accepted

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};

use crate::config::QueueConfig;
use crate::observability::metrics::record_published;

/// One decoded event line.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Top-level key of the event object (e.g. `transaction`).
    pub kind: String,
    pub payload: Value,
}

/// Events from one request, published together.
#[derive(Debug, Clone)]
pub struct Batch {
    pub metadata: Map<String, Value>,
    pub events: Vec<Event>,
    pub request_time: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("queue is full")]
    QueueFull,

    #[error("server is shutting down")]
    ShuttingDown,
}

/// Accepts batches for downstream processing.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, batch: Batch) -> Result<(), PublishError>;
}

/// Publisher backed by a bounded in-process queue.
#[derive(Debug)]
pub struct QueuePublisher {
    tx: mpsc::Sender<Batch>,
    stopped: AtomicBool,
    full_timeout: Duration,
}

impl QueuePublisher {
    /// Create the publisher and the receiving end for `run_consumer`.
    pub fn new(config: &QueueConfig) -> (Self, mpsc::Receiver<Batch>) {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let publisher = Self {
            tx,
            stopped: AtomicBool::new(false),
            full_timeout: Duration::from_millis(config.full_timeout_ms),
        };
        (publisher, rx)
    }

    /// Refuse further publishes.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for QueuePublisher {
    async fn publish(&self, batch: Batch) -> Result<(), PublishError> {
        if self.is_stopped() {
            return Err(PublishError::ShuttingDown);
        }
        match self.tx.send_timeout(batch, self.full_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(PublishError::QueueFull),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(PublishError::ShuttingDown),
        }
    }
}

/// Totals seen by the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub batches: usize,
    pub events: usize,
}

impl ConsumerStats {
    fn record(&mut self, batch: &Batch) {
        self.batches += 1;
        self.events += batch.events.len();
        record_published(batch.events.len());
        tracing::debug!(
            events = batch.events.len(),
            metadata_fields = batch.metadata.len(),
            "Consumed event batch"
        );
    }
}

/// Drain batches until every sender is gone, or until shutdown, in which
/// case the queue is closed and whatever it still holds is drained.
pub async fn run_consumer(
    mut rx: mpsc::Receiver<Batch>,
    mut shutdown: broadcast::Receiver<()>,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(batch) => stats.record(&batch),
                None => break,
            },
            _ = shutdown.recv() => {
                rx.close();
                while let Some(batch) = rx.recv().await {
                    stats.record(&batch);
                }
                break;
            }
        }
    }
    tracing::info!(batches = stats.batches, events = stats.events, "Publish queue drained");
    stats
}
