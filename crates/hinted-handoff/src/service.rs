//! Hinted-Handoff Service
//!
//! The service multiplexes many queues, one per (cluster, topic), under a
//! single base directory:
//!
//! ```text
//! Service
//!     │
//!     ├─ Queue("bigdata", "orders")   <base>/bigdata/orders/
//!     ├─ Queue("bigdata", "clicks")   <base>/bigdata/clicks/
//!     └─ Queue("payments", "events")  <base>/payments/events/
//! ```
//!
//! Queues are created lazily on first append and recovered from disk on
//! `start`. Each open queue runs its own pump (delivering to the shared
//! `Sink`) and housekeeper.
//!
//! ## Thread Safety
//!
//! The service is `Send + Sync` and is shared via `Arc<Service>`. The queue
//! map uses an RwLock (fast reads, rare writes); creation is double-checked
//! under the write lock so it happens at most once per pair.
//!
//! ## Usage
//!
//! ```ignore
//! use hinted_handoff::{Config, Service};
//!
//! let service = Service::new(Config::new("/var/lib/gateway/hh"), producer);
//! service.start().await?;
//!
//! // Downstream cluster is down: park the message on disk.
//! service.append("bigdata", "orders", key, value).await?;
//!
//! // On shutdown, give the pumps a chance to drain, then stop.
//! service.flush_inflights(Some(Duration::from_secs(30))).await;
//! service.stop().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::block::Block;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::queue::{ClusterTopic, Queue};
use crate::sink::Sink;

/// How often `flush_inflights` re-checks the queues.
const FLUSH_POLL: Duration = Duration::from_millis(50);

/// Multiplexer over per-(cluster, topic) disk queues.
pub struct Service {
    config: Config,
    sink: Arc<dyn Sink>,
    queues: RwLock<HashMap<ClusterTopic, Arc<Queue>>>,
    stopped: AtomicBool,
}

impl Service {
    pub fn new(config: Config, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            sink,
            queues: RwLock::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Recover queues left on disk by a previous run and start their
    /// background tasks.
    pub async fn start(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.base_dir).await?;

        let mut clusters = tokio::fs::read_dir(&self.config.base_dir).await?;
        while let Some(cluster) = clusters.next_entry().await? {
            if !cluster.file_type().await?.is_dir() {
                continue;
            }
            let Some(cluster_name) = cluster.file_name().to_str().map(String::from) else {
                warn!(entry = ?cluster.file_name(), "skipping non-utf8 cluster dir");
                continue;
            };

            let mut topics = tokio::fs::read_dir(cluster.path()).await?;
            while let Some(topic) = topics.next_entry().await? {
                if !topic.file_type().await?.is_dir() {
                    continue;
                }
                let Some(topic_name) = topic.file_name().to_str().map(String::from) else {
                    warn!(entry = ?topic.file_name(), "skipping non-utf8 topic dir");
                    continue;
                };

                self.get_or_create_queue(ClusterTopic::new(cluster_name.clone(), topic_name))
                    .await?;
            }
        }

        let queues = self.queues.read().await;
        info!(
            base_dir = %self.config.base_dir.display(),
            queues = queues.len(),
            "hinted handoff service started"
        );
        Ok(())
    }

    /// Close every queue and join all background tasks. In-flight blocks
    /// stay on disk for the next run.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);

        let queues: Vec<Arc<Queue>> = self.queues.read().await.values().cloned().collect();
        for queue in queues {
            if let Err(e) = queue.close().await {
                warn!(queue = %queue.ident(), error = %e, "close failed");
            }
        }
        info!("hinted handoff service stopped");
    }

    /// Buffer one key/value payload for (cluster, topic), creating and
    /// starting the queue on first use.
    pub async fn append(&self, cluster: &str, topic: &str, key: Bytes, value: Bytes) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::QueueNotOpen);
        }

        let b = Block::new(key, value);
        if b.size() > self.config.max_block_size {
            return Err(Error::ValueTooBig(b.size()));
        }

        let queue = self
            .get_or_create_queue(ClusterTopic::new(cluster, topic))
            .await?;
        queue.append(&b).await
    }

    /// Whether the pair has nothing waiting for delivery. An unknown pair
    /// is empty.
    pub async fn empty(&self, cluster: &str, topic: &str) -> bool {
        let ct = ClusterTopic::new(cluster, topic);
        self.queues
            .read()
            .await
            .get(&ct)
            .map(|q| q.empty_inflight())
            .unwrap_or(true)
    }

    /// Block until every queue reports empty, or until `timeout` elapses.
    /// Returns whether everything drained.
    pub async fn flush_inflights(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let drained = {
                let queues = self.queues.read().await;
                queues.values().all(|q| q.empty_inflight())
            };
            if drained {
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!("flush deadline elapsed with inflight blocks remaining");
                    return false;
                }
            }
            tokio::time::sleep(FLUSH_POLL).await;
        }
    }

    /// Appended-but-undelivered blocks across all queues.
    pub async fn inflights(&self) -> i64 {
        let queues = self.queues.read().await;
        queues.values().map(|q| q.inflights()).sum()
    }

    async fn get_or_create_queue(&self, ct: ClusterTopic) -> Result<Arc<Queue>> {
        // Fast path: the queue already exists.
        {
            let queues = self.queues.read().await;
            if let Some(queue) = queues.get(&ct) {
                return Ok(queue.clone());
            }
        }

        let mut queues = self.queues.write().await;
        // Double-check: another appender may have created it meanwhile.
        if let Some(queue) = queues.get(&ct) {
            return Ok(queue.clone());
        }

        let queue = Arc::new(Queue::new(ct.clone(), self.config.clone()));
        queue.open().await?;
        queue.start(self.sink.clone()).await;

        info!(queue = %queue.ident(), "queue created");
        queues.insert(ct, queue.clone());
        Ok(queue)
    }
}
