//! Delivery Pump
//!
//! One pump task per queue, and it is the queue's *only* reader. The loop:
//!
//! 1. Pull the next block into a reused scratch buffer.
//! 2. `Eoq` means drained: sleep `poll_eof_sleep` and look again.
//! 3. Hand the block to the sink with bounded exponential-backoff retries.
//! 4. Exhausted retries roll the cursor back and sleep the final backoff,
//!    so a dead downstream backpressures the pump instead of spinning.
//! 5. Every `dump_per_blocks` successful deliveries, checkpoint the cursor.
//!
//! A rolled-back block is redelivered before anything newer, which keeps
//! per-queue FIFO intact across failures. If shutdown arrives while a block
//! is between delivery attempts, the block is rolled back first so the
//! close-time cursor dump cannot checkpoint past it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::queue::Queue;
use crate::sink::Sink;

pub(crate) async fn run(queue: Arc<Queue>, sink: Arc<dyn Sink>, mut quit: watch::Receiver<bool>) {
    let ct = queue.cluster_topic().clone();
    let poll_eof_sleep = queue.config().poll_eof_sleep;
    let retry = queue.config().retry.clone();
    let dump_per_blocks = queue.config().dump_per_blocks.max(1) as i64;

    info!(queue = %queue.ident(), "pump started");
    let mut b = Block::default();

    loop {
        if *quit.borrow() {
            break;
        }

        match queue.next(&mut b).await {
            Ok(()) => {}
            Err(crate::Error::Eoq) => {
                if sleep_or_quit(poll_eof_sleep, &mut quit).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                // Transient: short reads racing an in-flight append, or I/O
                // hiccups. The cursor did not move; re-read the same spot.
                warn!(queue = %queue.ident(), error = %e, "read failed, will retry");
                if sleep_or_quit(poll_eof_sleep, &mut quit).await {
                    break;
                }
                continue;
            }
        }

        let mut delivered = false;
        let mut backoff = retry.initial_backoff;
        for attempt in 0..retry.max_retries {
            match sink.deliver(&ct.cluster, &ct.topic, b.key(), b.value()).await {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(
                            queue = %queue.ident(),
                            attempt = attempt + 1,
                            "delivered after retry"
                        );
                    }
                    delivered = true;
                    break;
                }
                Err(e) => {
                    backoff = retry.backoff(attempt);
                    warn!(
                        queue = %queue.ident(),
                        attempt = attempt + 1,
                        max_retries = retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "delivery failed, backing off"
                    );
                    if attempt + 1 < retry.max_retries
                        && sleep_or_quit(backoff, &mut quit).await
                    {
                        // Shutdown with an undelivered block outstanding:
                        // rewind so the checkpoint cannot skip it.
                        rollback(&queue, &b).await;
                        info!(queue = %queue.ident(), "pump stopped");
                        return;
                    }
                }
            }
        }

        if delivered {
            let deliver_n = queue.note_delivered();
            if deliver_n % dump_per_blocks == 0 {
                if let Err(e) = queue.dump_cursor().await {
                    warn!(queue = %queue.ident(), error = %e, "cursor dump failed");
                }
            }
        } else {
            warn!(
                queue = %queue.ident(),
                retries = retry.max_retries,
                "delivery retries exhausted, rolling back"
            );
            rollback(&queue, &b).await;
            if sleep_or_quit(backoff, &mut quit).await {
                break;
            }
        }
    }

    info!(queue = %queue.ident(), "pump stopped");
}

async fn rollback(queue: &Queue, b: &Block) {
    if let Err(e) = queue.rollback(b).await {
        warn!(queue = %queue.ident(), error = %e, "rollback failed");
    }
}

/// Sleep for `d`, returning early with `true` when quit fires.
async fn sleep_or_quit(d: Duration, quit: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => false,
        changed = quit.changed() => changed.is_err() || *quit.borrow(),
    }
}
