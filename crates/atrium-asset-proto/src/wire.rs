// SPDX-License-Identifier: Apache-2.0
//! Little-endian wire primitives and `kind + length` framing.
//!
//! [`WireWriter`] and [`WireReader`] are deliberately tiny: fixed-width
//! integers, raw hashes, and length-prefixed strings. Everything the codec
//! needs, nothing serde.

use crate::MessageKind;
use atrium_cas::{AssetHash, SHA256_HASH_LENGTH};

/// Bytes occupied by the frame header: `u8` kind + `u32` payload length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Errors produced while decoding wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The buffer ended before a fixed-width field was complete.
    #[error("[WIRE_SHORT_READ] needed {needed} more bytes, {remaining} remaining")]
    ShortRead {
        /// How many bytes the field still required.
        needed: usize,
        /// How many bytes were left in the buffer.
        remaining: usize,
    },
    /// A length-prefixed string held invalid UTF-8.
    #[error("[WIRE_BAD_UTF8] string payload is not valid UTF-8")]
    BadUtf8,
    /// A count or length field held a value that cannot be represented.
    #[error("[WIRE_BAD_LENGTH] length field {value} is out of range")]
    BadLength {
        /// The rejected raw value.
        value: i64,
    },
    /// The frame header named a payload larger than the configured cap.
    #[error("[WIRE_FRAME_TOO_LARGE] frame payload of {len} bytes exceeds cap of {cap}")]
    FrameTooLarge {
        /// Declared payload length.
        len: usize,
        /// Configured maximum payload length.
        cap: usize,
    },
    /// Unknown message kind byte.
    #[error("[WIRE_UNKNOWN_KIND] unknown message kind {0}")]
    UnknownMessageKind(u8),
    /// Unknown error-code byte in a reply.
    #[error("[WIRE_UNKNOWN_ERROR_CODE] unknown error code {0}")]
    UnknownErrorCode(u8),
    /// Unknown mapping-operation byte.
    #[error("[WIRE_UNKNOWN_OP] unknown mapping operation {0}")]
    UnknownOpKind(u8),
    /// Unknown baking-status byte in a GetAll reply.
    #[error("[WIRE_UNKNOWN_STATUS] unknown baking status {0}")]
    UnknownBakingStatus(u8),
}

/// Append-only encoder for message payloads.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with `capacity` bytes pre-reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Finish and take the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a little-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian `i32`.
    pub fn put_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian `u64`.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian `i64`.
    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append raw bytes with no length prefix.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a raw 32-byte hash.
    pub fn put_hash(&mut self, hash: &AssetHash) {
        self.buf.extend_from_slice(hash.as_bytes());
    }

    /// Append a `u32` length-prefixed UTF-8 string.
    pub fn put_string(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }
}

/// Cursor-style decoder over a payload slice.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Wrap a payload slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::ShortRead {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.take(n)
    }

    /// Read a raw 32-byte hash.
    pub fn read_hash(&mut self) -> Result<AssetHash, WireError> {
        let bytes = self.take(SHA256_HASH_LENGTH)?;
        let mut raw = [0u8; SHA256_HASH_LENGTH];
        raw.copy_from_slice(bytes);
        Ok(AssetHash(raw))
    }

    /// Read a `u32` length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadUtf8)
    }
}

/// Encode a complete frame: `u8` kind, `u32` little-endian payload length,
/// payload bytes.
pub fn encode_frame(kind: MessageKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.push(kind as u8);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Try to split one frame off the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
/// On success returns the raw kind byte, the payload slice, and the total
/// bytes consumed (header included). Payloads longer than `max_payload` are
/// rejected before any allocation happens.
pub fn decode_frame(
    buf: &[u8],
    max_payload: usize,
) -> Result<Option<(u8, &[u8], usize)>, WireError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let kind = buf[0];
    let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > max_payload {
        return Err(WireError::FrameTooLarge {
            len,
            cap: max_payload,
        });
    }
    let total = FRAME_HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some((kind, &buf[FRAME_HEADER_LEN..total], total)))
}
