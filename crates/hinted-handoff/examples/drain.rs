//! Appends a handful of blocks and watches the pump drain them into a
//! logging sink.
//!
//! ```sh
//! cargo run --example drain
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hinted_handoff::{Config, Service, Sink, SinkError};
use tracing::info;

struct LoggingSink;

#[async_trait]
impl Sink for LoggingSink {
    async fn deliver(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), SinkError> {
        info!(
            cluster,
            topic,
            key = %String::from_utf8_lossy(key),
            value_len = value.len(),
            "delivered"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dir = tempfile::TempDir::new()?;
    let config = Config {
        poll_eof_sleep: Duration::from_millis(100),
        ..Config::new(dir.path())
    };

    let service = Arc::new(Service::new(config, Arc::new(LoggingSink)));
    service.start().await?;

    for i in 0..10u32 {
        service
            .append(
                "bigdata",
                "orders",
                Bytes::from(format!("order-{i}")),
                Bytes::from(format!("{{\"seq\":{i}}}")),
            )
            .await?;
    }

    service.flush_inflights(Some(Duration::from_secs(10))).await;
    service.stop().await;
    Ok(())
}
