//! Segment Files
//!
//! A segment is one append-only file in a queue's directory, holding framed
//! blocks back-to-back. Segments are identified by a monotonically increasing
//! 64-bit id and named as the 20-digit zero-padded decimal of that id, so
//! lexical order equals numeric order:
//!
//! ```text
//! <base_dir>/<cluster>/<topic>/
//!   cursor.dmp
//!   00000000000000000001
//!   00000000000000000002
//! ```
//!
//! Writes go to the end of the file through a dedicated append handle; the
//! single consumer reads through an independent handle with its own position
//! (shared with the cursor). Bytes already written are never overwritten —
//! space is reclaimed only by deleting whole segments.
//!
//! Appends are flushed to the OS but not fsynced; losing the final bytes of
//! the tail on a hard crash is an accepted trade (the read path reports the
//! torn record as a short read and the remainder is dropped with the
//! segment).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::block::{checksum, Block, BLOCK_HEADER_LEN, BLOCK_MAGIC, BLOCK_TRAILER_LEN};
use crate::error::{Error, Result};

/// File name for a segment id: 20-digit zero-padded decimal.
pub(crate) fn segment_file_name(id: u64) -> String {
    format!("{:020}", id)
}

/// Current time as milliseconds since the epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Read side of a segment: an independent file handle plus the byte position
/// of the next record. Only the cursor moves it.
struct SegmentReader {
    file: File,
    pos: u64,
}

/// One append-only segment file with a soft size cap.
pub struct Segment {
    id: u64,
    path: PathBuf,
    max_size: u64,

    /// Bytes written so far. Also the clean-EOF boundary for the reader.
    disk_usage: AtomicU64,

    /// Milliseconds since epoch of the last append (file mtime at open).
    last_modified: AtomicI64,

    /// Latched once an append would exceed `max_size`; the segment never
    /// accepts another append afterwards.
    full: AtomicBool,

    writer: Mutex<File>,
    reader: Mutex<SegmentReader>,
}

impl Segment {
    /// Open (or create) the segment file at `path`.
    pub async fn open(id: u64, path: impl Into<PathBuf>, max_size: u64) -> Result<Self> {
        let path = path.into();

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let meta = writer.metadata().await?;
        let disk_usage = meta.len();
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_else(now_ms);

        let reader = File::open(&path).await?;

        Ok(Self {
            id,
            path,
            max_size,
            disk_usage: AtomicU64::new(disk_usage),
            last_modified: AtomicI64::new(mtime),
            full: AtomicBool::new(false),
            writer: Mutex::new(writer),
            reader: Mutex::new(SegmentReader { file: reader, pos: 0 }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to this segment so far.
    pub fn disk_usage(&self) -> u64 {
        self.disk_usage.load(Ordering::Acquire)
    }

    /// Milliseconds since epoch of the last append.
    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified.load(Ordering::Acquire)
    }

    /// Append one framed block to the end of the file.
    ///
    /// Returns `Error::SegmentFull` without writing when the block would push
    /// the segment past its soft cap; once full, always full.
    pub async fn append(&self, b: &Block) -> Result<()> {
        if self.full.load(Ordering::Acquire) {
            return Err(Error::SegmentFull);
        }

        let size = b.size();
        if self.disk_usage() + size > self.max_size {
            self.full.store(true, Ordering::Release);
            return Err(Error::SegmentFull);
        }

        let mut buf = BytesMut::new();
        b.encode(&mut buf);

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        // Push through tokio's internal buffer so the read handle sees the
        // record; durability past the OS page cache is not required.
        writer.flush().await?;
        drop(writer);

        self.disk_usage.fetch_add(size, Ordering::AcqRel);
        self.last_modified.store(now_ms(), Ordering::Release);
        Ok(())
    }

    /// Read exactly one framed block at the current read position into `b`,
    /// advancing the position on success.
    ///
    /// - `Error::SegmentEof`: clean end, every written byte consumed
    /// - `Error::ShortRead`: the frame claims more bytes than were written
    /// - `Error::SegmentCorrupt`: magic or CRC mismatch
    pub async fn read_one(&self, b: &mut Block) -> Result<()> {
        let mut reader = self.reader.lock().await;

        let remaining = self.disk_usage().saturating_sub(reader.pos);
        if remaining == 0 {
            return Err(Error::SegmentEof);
        }
        if remaining < (BLOCK_HEADER_LEN + BLOCK_TRAILER_LEN) as u64 {
            return Err(Error::ShortRead);
        }

        let mut header = [0u8; BLOCK_HEADER_LEN];
        reader.file.read_exact(&mut header).await?;

        if header[0..2] != BLOCK_MAGIC {
            // Leave the position where it was: the caller abandons the
            // segment, it does not resynchronize.
            let pos = reader.pos;
            reader.file.seek(SeekFrom::Start(pos)).await?;
            return Err(Error::SegmentCorrupt);
        }

        let key_len = u32::from_be_bytes(header[2..6].try_into().unwrap()) as usize;
        let value_len = u32::from_be_bytes(header[6..10].try_into().unwrap()) as usize;
        let framed = (BLOCK_HEADER_LEN + key_len + value_len + BLOCK_TRAILER_LEN) as u64;

        if framed > remaining {
            let pos = reader.pos;
            reader.file.seek(SeekFrom::Start(pos)).await?;
            return Err(Error::ShortRead);
        }

        let mut payload = vec![0u8; key_len + value_len];
        reader.file.read_exact(&mut payload).await?;
        let mut crc_buf = [0u8; BLOCK_TRAILER_LEN];
        reader.file.read_exact(&mut crc_buf).await?;

        let payload = Bytes::from(payload);
        let key = payload.slice(0..key_len);
        let value = payload.slice(key_len..);

        if u32::from_be_bytes(crc_buf) != checksum(&key, &value) {
            let pos = reader.pos;
            reader.file.seek(SeekFrom::Start(pos)).await?;
            return Err(Error::SegmentCorrupt);
        }

        reader.pos += framed;
        b.fill(key, value);
        Ok(())
    }

    /// Move the read position. Used at open and on rollback.
    pub async fn seek(&self, offset: i64) -> Result<()> {
        let mut reader = self.reader.lock().await;
        reader.file.seek(SeekFrom::Start(offset as u64)).await?;
        reader.pos = offset as u64;
        Ok(())
    }

    /// Delete the underlying file.
    pub async fn remove(&self) -> Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block(key: &'static [u8], value: &'static [u8]) -> Block {
        Block::new(Bytes::from_static(key), Bytes::from_static(value))
    }

    #[tokio::test]
    async fn append_then_read_back_in_order() {
        let dir = TempDir::new().unwrap();
        let seg = Segment::open(1, dir.path().join(segment_file_name(1)), 1 << 20)
            .await
            .unwrap();

        seg.append(&block(b"a", b"one")).await.unwrap();
        seg.append(&block(b"b", b"two")).await.unwrap();

        let mut b = Block::default();
        seg.read_one(&mut b).await.unwrap();
        assert_eq!(b.key(), b"a");
        assert_eq!(b.value(), b"one");
        seg.read_one(&mut b).await.unwrap();
        assert_eq!(b.key(), b"b");
        assert_eq!(b.value(), b"two");

        assert!(matches!(
            seg.read_one(&mut b).await,
            Err(Error::SegmentEof)
        ));
    }

    #[tokio::test]
    async fn full_segment_rejects_appends_forever() {
        let dir = TempDir::new().unwrap();
        // Cap fits exactly one 45-byte frame (10 + 1 + 30 + 4).
        let seg = Segment::open(1, dir.path().join(segment_file_name(1)), 64)
            .await
            .unwrap();

        let b = block(b"a", &[0u8; 30]);
        seg.append(&b).await.unwrap();
        assert!(matches!(seg.append(&b).await, Err(Error::SegmentFull)));

        // Latched: even a tiny block is refused now.
        let tiny = block(b"", b"");
        assert!(matches!(seg.append(&tiny).await, Err(Error::SegmentFull)));
        assert_eq!(seg.disk_usage(), 45);
    }

    #[tokio::test]
    async fn crc_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(segment_file_name(1));
        {
            let seg = Segment::open(1, &path, 1 << 20).await.unwrap();
            seg.append(&block(b"a", b"payload")).await.unwrap();
        }

        // Flip the last CRC byte on disk.
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        let seg = Segment::open(1, &path, 1 << 20).await.unwrap();
        let mut b = Block::default();
        assert!(matches!(
            seg.read_one(&mut b).await,
            Err(Error::SegmentCorrupt)
        ));
    }

    #[tokio::test]
    async fn truncated_record_is_short_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(segment_file_name(1));
        {
            let seg = Segment::open(1, &path, 1 << 20).await.unwrap();
            seg.append(&block(b"k", b"a longer value body")).await.unwrap();
        }

        // Drop the trailing 6 bytes, as if the process died mid-append.
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() - 6]).unwrap();

        let seg = Segment::open(1, &path, 1 << 20).await.unwrap();
        let mut b = Block::default();
        assert!(matches!(seg.read_one(&mut b).await, Err(Error::ShortRead)));
    }

    #[tokio::test]
    async fn seek_rewinds_the_read_position() {
        let dir = TempDir::new().unwrap();
        let seg = Segment::open(1, dir.path().join(segment_file_name(1)), 1 << 20)
            .await
            .unwrap();

        let first = block(b"x", b"1");
        seg.append(&first).await.unwrap();
        seg.append(&block(b"y", b"2")).await.unwrap();

        let mut b = Block::default();
        seg.read_one(&mut b).await.unwrap();
        assert_eq!(b.key(), b"x");

        seg.seek(0).await.unwrap();
        seg.read_one(&mut b).await.unwrap();
        assert_eq!(b.key(), b"x");

        seg.seek(first.size() as i64).await.unwrap();
        seg.read_one(&mut b).await.unwrap();
        assert_eq!(b.key(), b"y");
    }
}
