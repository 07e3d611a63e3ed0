//! End-to-end service tests: append through the pump to a sink, flush,
//! restart recovery, and admission at the service boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hinted_handoff::{Config, Error, RetryPolicy, Service, Sink, SinkError};
use tempfile::TempDir;

/// Records every successful delivery; fails the first `fail_first` calls.
struct RecordingSink {
    delivered: Mutex<Vec<(String, String, Vec<u8>, Vec<u8>)>>,
    fail_first: AtomicUsize,
}

impl RecordingSink {
    fn new(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(fail_first),
        })
    }

    fn keys(&self) -> Vec<Vec<u8>> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn deliver(
        &self,
        cluster: &str,
        topic: &str,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), SinkError> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err("downstream unavailable".into());
        }
        self.delivered.lock().unwrap().push((
            cluster.to_string(),
            topic.to_string(),
            key.to_vec(),
            value.to_vec(),
        ));
        Ok(())
    }
}

/// The downstream never comes back.
struct DeadSink;

#[async_trait]
impl Sink for DeadSink {
    async fn deliver(&self, _: &str, _: &str, _: &[u8], _: &[u8]) -> Result<(), SinkError> {
        Err("downstream unavailable".into())
    }
}

fn fast_config(dir: &TempDir) -> Config {
    Config {
        poll_eof_sleep: Duration::from_millis(10),
        purge_interval: Duration::from_secs(60),
        retry: RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(20),
            backoff_multiplier: 2.0,
        },
        ..Config::new(dir.path())
    }
}

#[tokio::test]
async fn fifo_through_segment_rollover() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        segment_max_size: 64,
        ..fast_config(&dir)
    };
    let sink = RecordingSink::new(0);
    let service = Service::new(config, sink.clone());
    service.start().await.unwrap();

    // 45-byte frames against a 64-byte segment cap: one segment per block.
    for key in ["a", "b", "c"] {
        service
            .append(
                "bigdata",
                "orders",
                Bytes::copy_from_slice(key.as_bytes()),
                Bytes::from(vec![b'v'; 30]),
            )
            .await
            .unwrap();
    }

    assert!(service.flush_inflights(Some(Duration::from_secs(5))).await);
    assert_eq!(sink.keys(), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert!(service.empty("bigdata", "orders").await);
    assert_eq!(service.inflights().await, 0);

    service.stop().await;
}

#[tokio::test]
async fn failed_delivery_is_rolled_back_and_order_kept() {
    let dir = TempDir::new().unwrap();
    // max_retries = 2, so 3 initial failures force at least one rollback of
    // the first block before it finally goes through.
    let sink = RecordingSink::new(3);
    let service = Service::new(fast_config(&dir), sink.clone());
    service.start().await.unwrap();

    service
        .append("c1", "t1", Bytes::from_static(b"x"), Bytes::from_static(b"1"))
        .await
        .unwrap();
    service
        .append("c1", "t1", Bytes::from_static(b"y"), Bytes::from_static(b"2"))
        .await
        .unwrap();

    assert!(service.flush_inflights(Some(Duration::from_secs(5))).await);
    assert_eq!(sink.keys(), vec![b"x".to_vec(), b"y".to_vec()]);

    service.stop().await;
}

#[tokio::test]
async fn restart_delivers_blocks_parked_by_a_dead_downstream() {
    let dir = TempDir::new().unwrap();

    // First run: the downstream is gone, blocks stay parked on disk.
    {
        let service = Service::new(fast_config(&dir), Arc::new(DeadSink));
        service.start().await.unwrap();
        for key in ["1", "2"] {
            service
                .append(
                    "bigdata",
                    "orders",
                    Bytes::copy_from_slice(key.as_bytes()),
                    Bytes::from_static(b"payload"),
                )
                .await
                .unwrap();
        }
        assert!(!service.flush_inflights(Some(Duration::from_millis(200))).await);
        service.stop().await;
    }

    // Second run: recovery scan finds the queue and drains it in order.
    let sink = RecordingSink::new(0);
    let service = Service::new(fast_config(&dir), sink.clone());
    service.start().await.unwrap();

    assert!(service.flush_inflights(Some(Duration::from_secs(5))).await);
    assert_eq!(sink.keys(), vec![b"1".to_vec(), b"2".to_vec()]);
    assert!(service.empty("bigdata", "orders").await);

    service.stop().await;
}

#[tokio::test]
async fn oversized_blocks_are_rejected() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        max_block_size: 64,
        ..fast_config(&dir)
    };
    let service = Service::new(config, RecordingSink::new(0));
    service.start().await.unwrap();

    let err = service
        .append(
            "c1",
            "t1",
            Bytes::from_static(b"k"),
            Bytes::from(vec![0u8; 100]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValueTooBig(115)));

    service.stop().await;
}

#[tokio::test]
async fn unknown_pair_is_empty_and_stopped_service_rejects_appends() {
    let dir = TempDir::new().unwrap();
    let service = Service::new(fast_config(&dir), RecordingSink::new(0));
    service.start().await.unwrap();

    assert!(service.empty("nobody", "nothing").await);

    service.stop().await;
    let err = service
        .append("c1", "t1", Bytes::from_static(b"k"), Bytes::from_static(b"v"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueueNotOpen));
}

#[tokio::test]
async fn queues_are_isolated_per_cluster_topic() {
    let dir = TempDir::new().unwrap();
    let sink = RecordingSink::new(0);
    let service = Service::new(fast_config(&dir), sink.clone());
    service.start().await.unwrap();

    service
        .append("c1", "t1", Bytes::from_static(b"a"), Bytes::from_static(b"1"))
        .await
        .unwrap();
    service
        .append("c2", "t2", Bytes::from_static(b"b"), Bytes::from_static(b"2"))
        .await
        .unwrap();

    assert!(service.flush_inflights(Some(Duration::from_secs(5))).await);

    let delivered = sink.delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert!(delivered
        .iter()
        .any(|(c, t, k, _)| c == "c1" && t == "t1" && k == b"a"));
    assert!(delivered
        .iter()
        .any(|(c, t, k, _)| c == "c2" && t == "t2" && k == b"b"));

    service.stop().await;
}
