//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apm_intake::api::Dependencies;
use apm_intake::config::ServerConfig;
use apm_intake::lifecycle::Shutdown;
use apm_intake::publish::{run_consumer, ConsumerStats, QueuePublisher};
use apm_intake::HttpServer;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server running on an ephemeral port with its queue consumer.
pub struct TestServer {
    pub addr: SocketAddr,
    pub publisher: Arc<QueuePublisher>,
    shutdown: Shutdown,
    consumer: JoinHandle<ConsumerStats>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and return what the consumer saw.
    pub async fn stop(self) -> ConsumerStats {
        self.publisher.stop();
        self.shutdown.trigger();
        self.shutdown
            .finish(self.consumer)
            .await
            .expect("consumer did not stop in time")
            .expect("consumer panicked")
    }
}

pub async fn start_server(config: ServerConfig) -> TestServer {
    let shutdown = Shutdown::new(Duration::from_secs(5));
    let (publisher, queue) = QueuePublisher::new(&config.queue);
    let publisher = Arc::new(publisher);
    let consumer = tokio::spawn(run_consumer(queue, shutdown.subscribe()));

    let server = HttpServer::new(&config, Dependencies::new(publisher.clone())).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        publisher,
        shutdown,
        consumer,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

/// `n` single-key event lines.
pub fn event_lines(n: usize) -> String {
    (0..n)
        .map(|i| format!("{{\"transaction\":{{\"id\":\"{}\"}}}}\n", i))
        .collect()
}
