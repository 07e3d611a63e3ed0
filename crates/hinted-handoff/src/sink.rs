//! Sink Boundary
//!
//! The sink is the external collaborator that forwards buffered blocks to
//! the real messaging cluster. The queue knows nothing about the transport;
//! it hands over `(cluster, topic, key, value)` and interprets `Err` as
//! "retry later, the downstream is still unhappy".
//!
//! Implementations must be safe to call concurrently across queues (each
//! queue's pump calls its sink sequentially, but many pumps share one sink)
//! and must respect their own cancellation: the queue never aborts an
//! in-flight `deliver`.

use async_trait::async_trait;

/// Opaque delivery failure. The pump only logs it and backs off.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Forwards one block to the downstream messaging cluster.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), SinkError>;
}
