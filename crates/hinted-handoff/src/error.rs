//! Error Types
//!
//! All queue operations return `Result<T>` aliased to `Result<T, Error>`.
//!
//! ## Error Categories
//!
//! ### Surfaced to producers
//! - `QueueFull`: admission rejected, the queue's size cap would be exceeded
//! - `ValueTooBig`: framed block exceeds the maximum block size
//! - `QueueNotOpen` / `QueueOpen`: lifecycle misuse
//!
//! ### Internal control flow
//! - `SegmentFull`: tail is at its soft cap, handled by rollover
//! - `SegmentEof`: clean end of a segment, handled by cursor advance
//! - `Eoq`: nothing to read right now, the pump sleeps on it
//! - `HeadIsTail`: purge attempted with a single segment, treated as a no-op
//!
//! ### Detected by reads
//! - `SegmentCorrupt`: magic/CRC mismatch, recovered by skipping the segment
//! - `ShortRead`: a record claims more bytes than remain, retried later

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The queue's total on-disk size cap would be exceeded.
    #[error("queue is full")]
    QueueFull,

    /// The framed block is larger than the configured maximum block size.
    #[error("block of {0} bytes exceeds max block size")]
    ValueTooBig(u64),

    /// Operation requires an open queue.
    #[error("queue is not open")]
    QueueNotOpen,

    /// Operation requires a closed queue.
    #[error("queue is open")]
    QueueOpen,

    /// The segment has reached its soft size cap.
    #[error("segment is full")]
    SegmentFull,

    /// Magic bytes or CRC32 did not match on read.
    #[error("segment corrupt")]
    SegmentCorrupt,

    /// A record's length fields claim more bytes than remain in the segment.
    #[error("short read: record extends past end of segment")]
    ShortRead,

    /// Clean end of the current segment.
    #[error("end of segment")]
    SegmentEof,

    /// End of queue: the cursor has consumed everything written so far.
    #[error("end of queue")]
    Eoq,

    /// The head segment is also the tail, nothing to trim.
    #[error("head segment is the tail")]
    HeadIsTail,

    /// A cursor move would land before the start of the segment.
    #[error("cursor offset out of range")]
    CursorOutOfRange,

    #[error("cursor checkpoint: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
