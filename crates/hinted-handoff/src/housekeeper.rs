//! Housekeeper
//!
//! One task per queue. Every `purge_interval` it garbage-collects segments
//! that are fully behind the cursor and older than `max_age`, then
//! checkpoints the cursor so a crash between pump dumps replays a bounded
//! window. Failures are logged and the loop continues; the only way this
//! task exits is the queue's quit signal.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::queue::Queue;

pub(crate) async fn run(queue: Arc<Queue>, mut quit: watch::Receiver<bool>) {
    let interval = queue.config().purge_interval;
    debug!(
        queue = %queue.ident(),
        interval_ms = interval.as_millis() as u64,
        "housekeeper started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = queue.purge().await {
                    warn!(queue = %queue.ident(), error = %e, "purge failed");
                }
                if let Err(e) = queue.dump_cursor().await {
                    warn!(queue = %queue.ident(), error = %e, "cursor dump failed");
                }
            }
            changed = quit.changed() => {
                if changed.is_err() || *quit.borrow() {
                    break;
                }
            }
        }
    }

    debug!(queue = %queue.ident(), "housekeeper stopped");
}
