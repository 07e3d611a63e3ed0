//! Per-Topic Queue
//!
//! One queue buffers blocks for a single (cluster, topic) pair. It owns an
//! ordered list of segment files, a durable cursor, and the counters the
//! service reports:
//!
//! ```text
//! ┌─────┐
//! │head │
//! ├─────┘
//! │
//! ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │segment 1 - 10MB │ │segment 2 - 10MB │ │segment 3 - 10MB │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!                          ▲                               ▲
//!                          │                               │
//!                       ┌───────┐                     ┌─────┐
//!                       │cursor │                     │tail │
//!                       └───────┘                     └─────┘
//! ```
//!
//! Producers append at the tail (rolling to a new segment when it fills);
//! the pump consumes at the cursor; segments fully behind the cursor are
//! garbage-collected once older than `max_age`. A queue with a size cap
//! rejects appends that would push total disk usage past the cap.
//!
//! ## Locking
//!
//! Two locks plus atomics:
//!
//! - `state` (RwLock) guards the segment list and tail. `append`,
//!   rollover, purge, `close`, and `remove` take it exclusively.
//! - `cursor` (Mutex) guards the read pointer. Only the pump, open/close,
//!   and the housekeeper's checkpoint dump touch it, so it is uncontended.
//!   Lock order when both are needed: cursor first, then state.
//! - The cursor's segment id is mirrored into an atomic so purge admission
//!   never takes the cursor lock.
//!
//! The pump is the sole reader. That invariant is what makes `rollback`
//! sound: at most one block is outstanding, so a rollback never crosses a
//! segment boundary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::config::Config;
use crate::cursor::{Cursor, CURSOR_FILE};
use crate::error::{Error, Result};
use crate::segment::{now_ms, segment_file_name, Segment};
use crate::sink::Sink;
use crate::{housekeeper, pump};

/// The (cluster, topic) pair identifying one queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterTopic {
    pub cluster: String,
    pub topic: String,
}

impl ClusterTopic {
    pub fn new(cluster: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            topic: topic.into(),
        }
    }

    /// Directory backing this queue: `<base>/<cluster>/<topic>`.
    pub fn dir(&self, base: &std::path::Path) -> PathBuf {
        base.join(&self.cluster).join(&self.topic)
    }
}

impl std::fmt::Display for ClusterTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cluster, self.topic)
    }
}

/// Open-state of a queue: its segment list, ordered by id. The first
/// element is the head, the last is the tail.
struct State {
    segments: Vec<Arc<Segment>>,
}

impl State {
    fn head(&self) -> &Arc<Segment> {
        // Non-empty by construction: open() creates segment 1 and trim_head
        // refuses to drop the last segment.
        &self.segments[0]
    }

    fn tail(&self) -> &Arc<Segment> {
        &self.segments[self.segments.len() - 1]
    }

    fn disk_usage(&self) -> u64 {
        self.segments.iter().map(|s| s.disk_usage()).sum()
    }
}

/// A bounded, disk-backed FIFO for one (cluster, topic).
pub struct Queue {
    ct: ClusterTopic,
    dir: PathBuf,
    config: Config,

    state: RwLock<Option<State>>,
    cursor: Mutex<Option<Cursor>>,
    cursor_segment_id: AtomicU64,

    inflights: AtomicI64,
    append_n: AtomicI64,
    deliver_n: AtomicI64,
    lost_bytes: AtomicU64,
    empty_inflight: AtomicBool,

    quit: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Queue {
    pub fn new(ct: ClusterTopic, config: Config) -> Self {
        let dir = ct.dir(&config.base_dir);
        Self {
            ct,
            dir,
            config,
            state: RwLock::new(None),
            cursor: Mutex::new(None),
            cursor_segment_id: AtomicU64::new(0),
            inflights: AtomicI64::new(0),
            append_n: AtomicI64::new(0),
            deliver_n: AtomicI64::new(0),
            lost_bytes: AtomicU64::new(0),
            empty_inflight: AtomicBool::new(false),
            quit: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn cluster_topic(&self) -> &ClusterTopic {
        &self.ct
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Queue identity for logs: its directory path.
    pub fn ident(&self) -> String {
        self.dir.display().to_string()
    }

    /// Open the queue for reading and writing: load on-disk segments from
    /// the cursor checkpoint forward, creating segment 1 when none exist,
    /// and resolve the cursor position.
    pub async fn open(&self) -> Result<()> {
        let mut cursor_guard = self.cursor.lock().await;
        let mut state_guard = self.state.write().await;
        if state_guard.is_some() {
            return Err(Error::QueueOpen);
        }

        tokio::fs::create_dir_all(&self.dir).await?;

        let checkpoint = match Cursor::load(&self.dir).await {
            Ok(pos) => Some(pos),
            Err(e) => {
                // Missing or corrupt checkpoint: replay from head. Duplicate
                // deliveries here are within the at-least-once contract.
                warn!(
                    queue = %self.ident(),
                    error = %e,
                    "cursor checkpoint unreadable, replaying from head"
                );
                None
            }
        };

        let min_id = checkpoint.map(|p| p.segment_id).unwrap_or(0);
        let mut segments = self.load_segments(min_id).await?;
        if segments.is_empty() {
            let id = self.next_segment_id().await?;
            let seg =
                Segment::open(id, self.dir.join(segment_file_name(id)), self.config.segment_max_size)
                    .await?;
            segments.push(Arc::new(seg));
        }

        let cursor = Cursor::init(&self.dir, &segments, checkpoint).await?;
        self.cursor_segment_id
            .store(cursor.pos.segment_id, Ordering::Release);

        let tail = &segments[segments.len() - 1];
        let at_end = cursor.pos.segment_id == tail.id()
            && cursor.pos.offset as u64 == tail.disk_usage();
        self.empty_inflight.store(at_end, Ordering::Release);

        info!(
            queue = %self.ident(),
            segments = segments.len(),
            cursor_segment = cursor.pos.segment_id,
            cursor_offset = cursor.pos.offset,
            "queue opened"
        );

        *state_guard = Some(State { segments });
        *cursor_guard = Some(cursor);
        Ok(())
    }

    /// Spawn the pump and housekeeper for this queue.
    pub async fn start(self: &Arc<Self>, sink: Arc<dyn Sink>) {
        let (tx, rx) = watch::channel(false);
        *self.quit.lock().await = Some(tx);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(pump::run(self.clone(), sink, rx.clone())));
        tasks.push(tokio::spawn(housekeeper::run(self.clone(), rx)));
    }

    /// Stop background tasks, dump the cursor, and release all segments.
    /// Closing a closed queue is a no-op.
    pub async fn close(&self) -> Result<()> {
        if let Some(tx) = self.quit.lock().await.take() {
            let _ = tx.send(true);
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        drop(tasks);

        let mut cursor_guard = self.cursor.lock().await;
        let mut state_guard = self.state.write().await;
        if let Some(cursor) = cursor_guard.as_ref() {
            debug!(queue = %self.ident(), "dumping cursor");
            cursor.dump().await?;
        }
        *cursor_guard = None;
        if state_guard.take().is_some() {
            info!(queue = %self.ident(), "queue closed");
        }
        Ok(())
    }

    /// Delete every file-based resource of this queue. The queue must be
    /// closed first.
    pub async fn remove(&self) -> Result<()> {
        let state_guard = self.state.write().await;
        if state_guard.is_some() {
            return Err(Error::QueueOpen);
        }
        tokio::fs::remove_dir_all(&self.dir).await?;
        self.empty_inflight.store(true, Ordering::Release);
        Ok(())
    }

    /// Append a block at the tail, rolling to a new segment when the tail
    /// is full (one retry). Rejects with `QueueFull` when the queue's byte
    /// cap would be exceeded.
    pub async fn append(&self, b: &Block) -> Result<()> {
        let mut state_guard = self.state.write().await;
        let state = state_guard.as_mut().ok_or(Error::QueueNotOpen)?;

        if self.config.max_queue_size > 0
            && state.disk_usage() + b.size() > self.config.max_queue_size as u64
        {
            return Err(Error::QueueFull);
        }

        let appended = state.tail().append(b).await;
        match appended {
            Ok(()) => {}
            Err(Error::SegmentFull) => {
                let seg = self.add_segment(state).await?;
                debug!(queue = %self.ident(), segment = seg.id(), "rolled to new tail");
                seg.append(b).await?;
            }
            Err(e) => return Err(e),
        }

        self.empty_inflight.store(false, Ordering::Release);
        self.append_n.fetch_add(1, Ordering::AcqRel);
        self.inflights.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Read the next block at the cursor into `b`, crossing segment
    /// boundaries and skipping corrupt remainders as needed.
    ///
    /// Returns `Error::Eoq` when everything written has been consumed.
    /// Only the pump calls this.
    pub async fn next(&self, b: &mut Block) -> Result<()> {
        let mut cursor_guard = self.cursor.lock().await;
        let cursor = cursor_guard.as_mut().ok_or(Error::QueueNotOpen)?;

        loop {
            let read = cursor.seg.read_one(b).await;
            match read {
                Ok(()) => {
                    self.empty_inflight.store(false, Ordering::Release);
                    cursor.advance_offset(b.size() as i64)?;
                    return Ok(());
                }

                Err(Error::SegmentEof) => {
                    // End of the current segment, or end of tail.
                    if !self.advance_cursor(cursor).await? {
                        self.empty_inflight.store(true, Ordering::Release);
                        return Err(Error::Eoq);
                    }
                }

                Err(Error::SegmentCorrupt) => {
                    let lost = cursor
                        .seg
                        .disk_usage()
                        .saturating_sub(cursor.pos.offset as u64);
                    self.lost_bytes.fetch_add(lost, Ordering::AcqRel);
                    warn!(
                        target: "hh_audit",
                        queue = %self.ident(),
                        segment = cursor.pos.segment_id,
                        path = %cursor.seg.path().display(),
                        offset = cursor.pos.offset,
                        lost_bytes = lost,
                        "segment corrupt, abandoning remainder"
                    );

                    {
                        let mut state_guard = self.state.write().await;
                        let state = state_guard.as_mut().ok_or(Error::QueueNotOpen)?;
                        if state.tail().id() == cursor.seg.id() {
                            // The corrupt segment is the tail: direct all
                            // further appends to a fresh file. Reads stay on
                            // the old tail until they hit EOF or corruption.
                            let seg = self.add_segment(state).await?;
                            warn!(
                                queue = %self.ident(),
                                segment = seg.id(),
                                "tail corrupt, appends directed to new segment"
                            );
                        }
                    }

                    if !self.advance_cursor(cursor).await? {
                        self.empty_inflight.store(true, Ordering::Release);
                        return Err(Error::Eoq);
                    }
                }

                // ShortRead and I/O errors surface unchanged; the pump
                // treats them as transient and re-reads the same position.
                Err(e) => return Err(e),
            }
        }
    }

    /// Rewind the cursor over the block just returned by `next`, so it is
    /// redelivered before anything newer. Valid only while that block is
    /// the single outstanding read.
    pub async fn rollback(&self, b: &Block) -> Result<()> {
        let mut cursor_guard = self.cursor.lock().await;
        let cursor = cursor_guard.as_mut().ok_or(Error::QueueNotOpen)?;

        cursor.advance_offset(-(b.size() as i64))?;
        self.empty_inflight.store(false, Ordering::Release);
        cursor.seg.seek(cursor.pos.offset).await
    }

    /// Drop fully-consumed segments older than `max_age` from the head.
    pub async fn purge(&self) -> Result<()> {
        let cursor_segment = self.cursor_segment_id.load(Ordering::Acquire);
        let max_age_ms = self.config.max_age.as_millis() as i64;

        let mut state_guard = self.state.write().await;
        let Some(state) = state_guard.as_mut() else {
            return Ok(());
        };

        while state.segments.len() > 1 {
            let head = state.head();
            if cursor_segment > head.id() && head.last_modified_ms() + max_age_ms < now_ms() {
                self.trim_head(state).await?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Checkpoint the cursor. Called by the pump every `dump_per_blocks`
    /// deliveries and by the housekeeper on every cycle.
    pub async fn dump_cursor(&self) -> Result<()> {
        let cursor_guard = self.cursor.lock().await;
        match cursor_guard.as_ref() {
            Some(cursor) => cursor.dump().await,
            None => Ok(()),
        }
    }

    /// Whether the queue currently has nothing waiting for delivery.
    pub fn empty_inflight(&self) -> bool {
        self.empty_inflight.load(Ordering::Acquire)
    }

    /// Appended but not yet delivered.
    pub fn inflights(&self) -> i64 {
        self.inflights.load(Ordering::Acquire)
    }

    pub fn append_n(&self) -> i64 {
        self.append_n.load(Ordering::Acquire)
    }

    pub fn deliver_n(&self) -> i64 {
        self.deliver_n.load(Ordering::Acquire)
    }

    /// Bytes abandoned to corrupt segments since open.
    pub fn lost_bytes(&self) -> u64 {
        self.lost_bytes.load(Ordering::Acquire)
    }

    pub fn reset_counters(&self) {
        self.append_n.store(0, Ordering::Release);
        self.deliver_n.store(0, Ordering::Release);
    }

    /// Last time the tail was written, as milliseconds since the epoch.
    pub async fn last_modified_ms(&self) -> Result<i64> {
        let state_guard = self.state.read().await;
        let state = state_guard.as_ref().ok_or(Error::QueueNotOpen)?;
        Ok(state.tail().last_modified_ms())
    }

    /// Total bytes across all loaded segments.
    pub async fn disk_usage(&self) -> u64 {
        let state_guard = self.state.read().await;
        state_guard.as_ref().map(|s| s.disk_usage()).unwrap_or(0)
    }

    pub(crate) fn note_delivered(&self) -> i64 {
        self.inflights.fetch_sub(1, Ordering::AcqRel);
        self.deliver_n.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Advance the cursor to the next segment, refreshing the mirrored id.
    async fn advance_cursor(&self, cursor: &mut Cursor) -> Result<bool> {
        let segments = {
            let state_guard = self.state.read().await;
            state_guard
                .as_ref()
                .ok_or(Error::QueueNotOpen)?
                .segments
                .clone()
        };
        if !cursor.advance_segment(&segments).await? {
            return Ok(false);
        }
        self.cursor_segment_id
            .store(cursor.pos.segment_id, Ordering::Release);
        Ok(true)
    }

    /// Create the next segment file and make it the tail. Caller holds the
    /// state write lock.
    async fn add_segment(&self, state: &mut State) -> Result<Arc<Segment>> {
        let id = self.next_segment_id().await?;
        let seg = Arc::new(
            Segment::open(id, self.dir.join(segment_file_name(id)), self.config.segment_max_size)
                .await?,
        );
        state.segments.push(seg.clone());
        Ok(seg)
    }

    /// Drop the head segment and delete its file.
    async fn trim_head(&self, state: &mut State) -> Result<()> {
        if state.segments.len() <= 1 {
            return Err(Error::HeadIsTail);
        }
        let head = state.segments.remove(0);
        head.remove().await?;
        info!(
            queue = %self.ident(),
            segment = head.id(),
            "purged head segment"
        );
        Ok(())
    }

    /// Scan the queue directory for segments with id >= `min_id`, oldest
    /// first. Files with ids behind the cursor checkpoint are stale and are
    /// left on disk untouched.
    async fn load_segments(&self, min_id: u64) -> Result<Vec<Arc<Segment>>> {
        let mut segments = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(CURSOR_FILE) {
                continue;
            }

            let Ok(id) = name.parse::<u64>() else {
                warn!(queue = %self.ident(), file = name, "unexpected file in queue dir");
                continue;
            };
            if id < min_id {
                debug!(queue = %self.ident(), segment = id, "skipping stale segment");
                continue;
            }

            let seg = Segment::open(id, entry.path(), self.config.segment_max_size).await?;
            segments.push(Arc::new(seg));
        }

        segments.sort_by_key(|s| s.id());
        Ok(segments)
    }

    /// Smallest id not yet used by any file in the queue directory.
    async fn next_segment_id(&self) -> Result<u64> {
        let mut max_id = 0u64;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = name.parse::<u64>() {
                    max_id = max_id.max(id);
                }
            }
        }
        Ok(max_id + 1)
    }
}
