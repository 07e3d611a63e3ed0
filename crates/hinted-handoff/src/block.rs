//! Block Codec
//!
//! A block is one key/value record framed on disk. Records are laid out
//! back-to-back in a segment with no padding:
//!
//! ```text
//! offset   size       field
//!   0       2         magic ({0x00, 0x00})
//!   2       4         key length   (big-endian u32)
//!   6       4         value length (big-endian u32)
//!  10       key_len   key
//!  10+kL    value_len value
//!  10+kL+vL 4         crc32(key_len || value_len || key || value), big-endian
//! ```
//!
//! The CRC covers the length fields and both payloads, so a flipped bit
//! anywhere but the magic is caught on read. `size()` is the full framed
//! length including magic and CRC, which is also the amount the cursor
//! advances per consumed record.

use bytes::{BufMut, Bytes, BytesMut};

/// Magic bytes prefixed to every framed block.
pub const BLOCK_MAGIC: [u8; 2] = [0x00, 0x00];

/// Framed bytes before the key: magic + key length + value length.
pub const BLOCK_HEADER_LEN: usize = 10;

/// Framed bytes after the value: the CRC32.
pub const BLOCK_TRAILER_LEN: usize = 4;

/// One key/value record.
///
/// The pump reuses a single `Block` as scratch across reads, so both fields
/// are cheap-to-replace `Bytes`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    key: Bytes,
    value: Bytes,
}

impl Block {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Total framed length on disk, including magic and CRC.
    pub fn size(&self) -> u64 {
        (BLOCK_HEADER_LEN + self.key.len() + self.value.len() + BLOCK_TRAILER_LEN) as u64
    }

    /// Encode the framed record into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.size() as usize);
        buf.put_slice(&BLOCK_MAGIC);
        buf.put_u32(self.key.len() as u32);
        buf.put_u32(self.value.len() as u32);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        buf.put_u32(checksum(&self.key, &self.value));
    }

    /// Replace the payload in place. Used by the segment read path once the
    /// CRC has been verified.
    pub(crate) fn fill(&mut self, key: Bytes, value: Bytes) {
        self.key = key;
        self.value = value;
    }
}

/// CRC32 over `key_len || value_len || key || value`, matching the on-disk
/// frame layout.
pub fn checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut crc = crc32fast::Hasher::new();
    crc.update(&(key.len() as u32).to_be_bytes());
    crc.update(&(value.len() as u32).to_be_bytes());
    crc.update(key);
    crc.update(value);
    crc.finalize()
}
