//! Shutdown coordination.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks (the HTTP server, the publish queue consumer) subscribe
/// to one broadcast channel; `finish` bounds how long the last of them may
/// take once shutdown is triggered.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    deadline: Duration,
}

impl Shutdown {
    pub fn new(deadline: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, deadline }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Notify every subscriber.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Await `task`, giving up after the shutdown deadline.
    pub async fn finish<T>(&self, task: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.deadline, task).await {
            Ok(output) => Some(output),
            Err(_) => {
                tracing::warn!(deadline = ?self.deadline, "Shutdown deadline exceeded");
                None
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
