//! Durable Cursor
//!
//! The cursor is the queue's single read pointer: the segment id and byte
//! offset of the next record to consume. It is checkpointed to `cursor.dmp`
//! in the queue directory as a small JSON document:
//!
//! ```text
//! {"SegmentID":3,"Offset":1024}
//! ```
//!
//! The checkpoint is written with a temp-file-plus-rename so a crash can
//! never leave a torn file, and it always holds the current position or a
//! strictly older one. Checkpointing is deliberately not transactional with
//! delivery: on restart the pump may redeliver up to `dump_per_blocks`
//! records, which the at-least-once contract allows.
//!
//! A missing or unparseable checkpoint is a recoverable condition — the queue
//! logs a warning and replays from the head of the earliest segment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::segment::Segment;

/// Checkpoint file name inside a queue directory.
pub(crate) const CURSOR_FILE: &str = "cursor.dmp";

/// A durable read position. Field names are fixed by the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "SegmentID")]
    pub segment_id: u64,
    #[serde(rename = "Offset")]
    pub offset: i64,
}

/// The queue's read pointer: a position plus the segment it points into.
pub(crate) struct Cursor {
    checkpoint: PathBuf,
    pub pos: Position,
    pub seg: Arc<Segment>,
}

impl Cursor {
    /// Read the checkpoint file under `dir`. Errors here (missing file,
    /// parse failure) mean "replay from head", decided by the caller.
    pub async fn load(dir: &Path) -> Result<Position> {
        let raw = tokio::fs::read(dir.join(CURSOR_FILE)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Resolve a loaded (or absent) position against the queue's segment
    /// list and seek the chosen segment.
    ///
    /// A checkpoint naming a segment that no longer exists advances to the
    /// oldest segment with id >= the checkpointed id, at offset 0; a
    /// checkpoint past the end of its segment is clamped.
    pub async fn init(
        dir: &Path,
        segments: &[Arc<Segment>],
        checkpoint: Option<Position>,
    ) -> Result<Cursor> {
        let head = segments.first().cloned().ok_or(Error::QueueNotOpen)?;

        let (seg, offset) = match checkpoint {
            None => (head, 0),
            Some(pos) => {
                if let Some(seg) = segments.iter().find(|s| s.id() == pos.segment_id) {
                    let mut offset = pos.offset.max(0);
                    if offset as u64 > seg.disk_usage() {
                        warn!(
                            segment = pos.segment_id,
                            offset,
                            disk_usage = seg.disk_usage(),
                            "cursor checkpoint past end of segment, clamping"
                        );
                        offset = seg.disk_usage() as i64;
                    }
                    (seg.clone(), offset)
                } else if let Some(seg) = segments.iter().find(|s| s.id() >= pos.segment_id) {
                    warn!(
                        checkpointed = pos.segment_id,
                        resolved = seg.id(),
                        "cursor checkpoint names a purged segment, advancing"
                    );
                    (seg.clone(), 0)
                } else {
                    warn!(
                        checkpointed = pos.segment_id,
                        "cursor checkpoint newer than any segment, replaying from head"
                    );
                    (head, 0)
                }
            }
        };

        seg.seek(offset).await?;
        Ok(Cursor {
            checkpoint: dir.join(CURSOR_FILE),
            pos: Position {
                segment_id: seg.id(),
                offset,
            },
            seg,
        })
    }

    /// Move the offset by `delta`: positive after a successful read,
    /// negative on rollback. Never below zero.
    pub fn advance_offset(&mut self, delta: i64) -> Result<()> {
        let next = self.pos.offset + delta;
        if next < 0 {
            return Err(Error::CursorOutOfRange);
        }
        self.pos.offset = next;
        Ok(())
    }

    /// Move to the next segment with id strictly greater than the current
    /// one, at offset 0. Returns `false` when there is none (queue drained).
    pub async fn advance_segment(&mut self, segments: &[Arc<Segment>]) -> Result<bool> {
        let Some(next) = segments.iter().find(|s| s.id() > self.pos.segment_id) else {
            return Ok(false);
        };
        let next = next.clone();
        next.seek(0).await?;
        self.pos = Position {
            segment_id: next.id(),
            offset: 0,
        };
        self.seg = next;
        Ok(true)
    }

    /// Atomically persist the current position: write a temp file, then
    /// rename over the checkpoint.
    pub async fn dump(&self) -> Result<()> {
        let tmp = self.checkpoint.with_extension("dmp.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&self.pos)?).await?;
        tokio::fs::rename(&tmp, &self.checkpoint).await?;
        Ok(())
    }
}
