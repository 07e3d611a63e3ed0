//! Hinted Handoff
//!
//! A disk-backed, append-only, bounded queue that buffers outbound messages
//! when the downstream messaging cluster is unavailable or overloaded, then
//! replays them in order once it recovers.
//!
//! ## How It Fits
//!
//! ```text
//! ┌───────────┐  downstream up    ┌───────────────────┐
//! │ Producers │ ────────────────▶ │ messaging cluster │
//! └─────┬─────┘                   └───────────────────┘
//!       │ downstream down                  ▲
//!       ▼                                  │ Sink::deliver
//! ┌───────────────────┐            ┌───────┴───────┐
//! │ Service::append   │──segments─▶│ pump (1/queue)│
//! │ (disk, per queue) │            └───────────────┘
//! └───────────────────┘
//! ```
//!
//! Each (cluster, topic) pair gets its own queue directory of capped,
//! append-only segment files plus a durable cursor checkpoint. Producers
//! append framed key/value blocks at the tail; a single pump consumes at
//! the cursor and hands blocks to a pluggable [`Sink`]; failed deliveries
//! are rolled back and retried in place, so per-queue FIFO holds. A
//! housekeeper deletes segments that are fully consumed and older than the
//! retention age.
//!
//! ## Guarantees (and non-guarantees)
//!
//! - **At-least-once**: the cursor is checkpointed every `dump_per_blocks`
//!   deliveries, so a crash redelivers a bounded window of blocks.
//!   Exactly-once is explicitly not attempted.
//! - **Per-queue FIFO**: a rolled-back block is redelivered before anything
//!   newer. Nothing is promised across queues.
//! - **Bounded**: a queue with a size cap rejects appends once its segments
//!   would exceed the cap; producers see [`Error::QueueFull`].
//! - **Corruption-tolerant**: a CRC mismatch abandons the remainder of that
//!   segment (audited, counted) and delivery continues on the next one.
//!
//! ## Usage
//!
//! ```ignore
//! use hinted_handoff::{Config, Service, Sink};
//!
//! let service = Arc::new(Service::new(Config::new("./data/hh"), producer));
//! service.start().await?;
//!
//! service.append("bigdata", "orders", key, value).await?;
//!
//! service.flush_inflights(Some(Duration::from_secs(30))).await;
//! service.stop().await;
//! ```

mod block;
mod config;
mod cursor;
mod error;
mod housekeeper;
mod pump;
mod queue;
mod retry;
mod segment;
mod service;
mod sink;

pub use block::Block;
pub use config::Config;
pub use cursor::Position;
pub use error::{Error, Result};
pub use queue::{ClusterTopic, Queue};
pub use retry::RetryPolicy;
pub use segment::Segment;
pub use service::Service;
pub use sink::{Sink, SinkError};
