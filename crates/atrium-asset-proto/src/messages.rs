// SPDX-License-Identifier: Apache-2.0
//! Request and reply payloads with bit-exact encode/decode.
//!
//! Field order in every `encode`/`decode` pair below mirrors the wire layout
//! exactly; do not reorder writes. Replies to a mapping operation have an
//! op-dependent body, so [`MappingOperationReply::decode`] takes the op kind
//! the caller originally sent.

use crate::wire::{WireError, WireReader, WireWriter};
use crate::{BakingStatus, ErrorCode, MappingOpKind};
use atrium_cas::AssetHash;

/// Message kind carried in the frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Ranged content read request.
    AssetGet = 1,
    /// Reply to [`MessageKind::AssetGet`].
    AssetGetReply = 2,
    /// Content size query.
    AssetGetInfo = 3,
    /// Reply to [`MessageKind::AssetGetInfo`].
    AssetGetInfoReply = 4,
    /// Whole-content upload.
    AssetUpload = 5,
    /// Reply to [`MessageKind::AssetUpload`].
    AssetUploadReply = 6,
    /// Mapping directory operation.
    AssetMappingOperation = 7,
    /// Reply to [`MessageKind::AssetMappingOperation`].
    AssetMappingOperationReply = 8,
}

impl MessageKind {
    /// Decode from the frame header byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::AssetGet),
            2 => Some(Self::AssetGetReply),
            3 => Some(Self::AssetGetInfo),
            4 => Some(Self::AssetGetInfoReply),
            5 => Some(Self::AssetUpload),
            6 => Some(Self::AssetUploadReply),
            7 => Some(Self::AssetMappingOperation),
            8 => Some(Self::AssetMappingOperationReply),
            _ => None,
        }
    }
}

/// Ranged read request for a content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGet {
    /// Correlation id echoed in the reply.
    pub message_id: u32,
    /// Content hash to read.
    pub hash: AssetHash,
    /// Range start, inclusive. Negative means offset from the end.
    pub from_inclusive: i64,
    /// Range end, exclusive.
    pub to_exclusive: i64,
}

impl AssetGet {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(4 + 32 + 8 + 8);
        w.put_u32(self.message_id);
        w.put_hash(&self.hash);
        w.put_i64(self.from_inclusive);
        w.put_i64(self.to_exclusive);
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        Ok(Self {
            message_id: r.read_u32()?,
            hash: r.read_hash()?,
            from_inclusive: r.read_i64()?,
            to_exclusive: r.read_i64()?,
        })
    }
}

/// Reply to [`AssetGet`]. The hash leads the payload so receivers can route
/// multi-part deliveries before the correlation id arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGetReply {
    /// Echoed content hash.
    pub hash: AssetHash,
    /// Echoed correlation id.
    pub message_id: u32,
    /// Outcome of the read.
    pub error: ErrorCode,
    /// Range bytes; empty unless `error` is [`ErrorCode::NoError`].
    pub payload: Vec<u8>,
}

impl AssetGetReply {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(32 + 4 + 1 + 8 + self.payload.len());
        w.put_hash(&self.hash);
        w.put_u32(self.message_id);
        w.put_u8(self.error as u8);
        if self.error == ErrorCode::NoError {
            w.put_i64(self.payload.len() as i64);
            w.put_bytes(&self.payload);
        }
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated, the error code is
    /// unknown, or the declared payload size is negative.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        let hash = r.read_hash()?;
        let message_id = r.read_u32()?;
        let code = r.read_u8()?;
        let error = ErrorCode::from_u8(code).ok_or(WireError::UnknownErrorCode(code))?;
        let payload = if error == ErrorCode::NoError {
            let size = r.read_i64()?;
            let size = usize::try_from(size).map_err(|_| WireError::BadLength { value: size })?;
            r.read_bytes(size)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Self {
            hash,
            message_id,
            error,
            payload,
        })
    }
}

/// Content size query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGetInfo {
    /// Correlation id echoed in the reply.
    pub message_id: u32,
    /// Content hash to stat.
    pub hash: AssetHash,
}

impl AssetGetInfo {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(4 + 32);
        w.put_u32(self.message_id);
        w.put_hash(&self.hash);
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        Ok(Self {
            message_id: r.read_u32()?,
            hash: r.read_hash()?,
        })
    }
}

/// Reply to [`AssetGetInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetGetInfoReply {
    /// Echoed correlation id.
    pub message_id: u32,
    /// Echoed content hash.
    pub hash: AssetHash,
    /// Outcome of the stat.
    pub error: ErrorCode,
    /// File size in bytes; present iff `error` is [`ErrorCode::NoError`].
    pub size: Option<i64>,
}

impl AssetGetInfoReply {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(4 + 32 + 1 + 8);
        w.put_u32(self.message_id);
        w.put_hash(&self.hash);
        w.put_u8(self.error as u8);
        if self.error == ErrorCode::NoError {
            w.put_i64(self.size.unwrap_or(0));
        }
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated or the error code is
    /// unknown.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        let message_id = r.read_u32()?;
        let hash = r.read_hash()?;
        let code = r.read_u8()?;
        let error = ErrorCode::from_u8(code).ok_or(WireError::UnknownErrorCode(code))?;
        let size = if error == ErrorCode::NoError {
            Some(r.read_i64()?)
        } else {
            None
        };
        Ok(Self {
            message_id,
            hash,
            error,
            size,
        })
    }
}

/// Whole-content upload. The payload arrives in a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    /// Correlation id echoed in the reply.
    pub message_id: u32,
    /// Full content bytes.
    pub payload: Vec<u8>,
}

impl AssetUpload {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(4 + 8 + self.payload.len());
        w.put_u32(self.message_id);
        w.put_u64(self.payload.len() as u64);
        w.put_bytes(&self.payload);
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated or the declared
    /// payload size does not fit in memory.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        let message_id = r.read_u32()?;
        let size = r.read_u64()?;
        let size = usize::try_from(size).map_err(|_| WireError::BadLength {
            value: i64::MAX,
        })?;
        let payload = r.read_bytes(size)?.to_vec();
        Ok(Self {
            message_id,
            payload,
        })
    }
}

/// Reply to [`AssetUpload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUploadReply {
    /// Echoed correlation id.
    pub message_id: u32,
    /// Outcome of the upload.
    pub error: ErrorCode,
    /// Content hash; present iff `error` is [`ErrorCode::NoError`].
    pub hash: Option<AssetHash>,
}

impl AssetUploadReply {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(4 + 1 + 32);
        w.put_u32(self.message_id);
        w.put_u8(self.error as u8);
        if self.error == ErrorCode::NoError {
            w.put_hash(&self.hash.unwrap_or(AssetHash([0; 32])));
        }
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated or the error code is
    /// unknown.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        let message_id = r.read_u32()?;
        let code = r.read_u8()?;
        let error = ErrorCode::from_u8(code).ok_or(WireError::UnknownErrorCode(code))?;
        let hash = if error == ErrorCode::NoError {
            Some(r.read_hash()?)
        } else {
            None
        };
        Ok(Self {
            message_id,
            error,
            hash,
        })
    }
}

/// Body of a mapping operation, one variant per op kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingOp {
    /// Look up one path. The path may carry a `?query` suffix.
    Get {
        /// Path to resolve.
        path: String,
    },
    /// Enumerate every mapping with its baking status.
    GetAll,
    /// Bind `path` to `hash`.
    Set {
        /// Destination path.
        path: String,
        /// Content hash to bind.
        hash: AssetHash,
    },
    /// Remove paths; a trailing-slash path removes its whole subtree.
    Delete {
        /// Paths to remove.
        paths: Vec<String>,
    },
    /// Rename a file, or a folder subtree when both paths end in `/`.
    Rename {
        /// Existing path.
        old_path: String,
        /// Replacement path.
        new_path: String,
    },
}

impl MappingOp {
    /// Wire discriminant for this operation.
    pub fn kind(&self) -> MappingOpKind {
        match self {
            Self::Get { .. } => MappingOpKind::Get,
            Self::GetAll => MappingOpKind::GetAll,
            Self::Set { .. } => MappingOpKind::Set,
            Self::Delete { .. } => MappingOpKind::Delete,
            Self::Rename { .. } => MappingOpKind::Rename,
        }
    }
}

/// A mapping directory operation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOperation {
    /// Correlation id echoed in the reply.
    pub message_id: u32,
    /// The operation to perform.
    pub op: MappingOp,
}

impl MappingOperation {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(self.message_id);
        w.put_u8(self.op.kind() as u8);
        match &self.op {
            MappingOp::Get { path } => w.put_string(path),
            MappingOp::GetAll => {}
            MappingOp::Set { path, hash } => {
                w.put_string(path);
                w.put_hash(hash);
            }
            MappingOp::Delete { paths } => {
                w.put_i32(paths.len() as i32);
                for path in paths {
                    w.put_string(path);
                }
            }
            MappingOp::Rename { old_path, new_path } => {
                w.put_string(old_path);
                w.put_string(new_path);
            }
        }
        w.into_bytes()
    }

    /// Decode a payload body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated, the op byte is
    /// unknown, or a delete count is negative.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        let message_id = r.read_u32()?;
        let raw_op = r.read_u8()?;
        let kind = MappingOpKind::from_u8(raw_op).ok_or(WireError::UnknownOpKind(raw_op))?;
        let op = match kind {
            MappingOpKind::Get => MappingOp::Get {
                path: r.read_string()?,
            },
            MappingOpKind::GetAll => MappingOp::GetAll,
            MappingOpKind::Set => MappingOp::Set {
                path: r.read_string()?,
                hash: r.read_hash()?,
            },
            MappingOpKind::Delete => {
                let count = r.read_i32()?;
                let count = usize::try_from(count).map_err(|_| WireError::BadLength {
                    value: i64::from(count),
                })?;
                let mut paths = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    paths.push(r.read_string()?);
                }
                MappingOp::Delete { paths }
            }
            MappingOpKind::Rename => MappingOp::Rename {
                old_path: r.read_string()?,
                new_path: r.read_string()?,
            },
        };
        Ok(Self { message_id, op })
    }
}

/// One entry in a GetAll reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Mapped path.
    pub path: String,
    /// Mapped content hash.
    pub hash: AssetHash,
    /// Bake progress for the mapped hash.
    pub status: BakingStatus,
}

/// Op-dependent body of a mapping operation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingReplyBody {
    /// Set/Delete/Rename replies and every error reply carry no body.
    None,
    /// Body of a successful Get.
    Get {
        /// Resolved hash (the baked hash when redirected).
        hash: AssetHash,
        /// True when the reply points at a baked derivative.
        was_redirected: bool,
        /// Baked mapping path; present iff `was_redirected`.
        redirected_path: Option<String>,
    },
    /// Body of a successful GetAll.
    GetAll {
        /// Every mapping with its baking status.
        entries: Vec<MappingEntry>,
    },
}

/// Reply to a [`MappingOperation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOperationReply {
    /// Echoed correlation id.
    pub message_id: u32,
    /// Outcome of the operation.
    pub error: ErrorCode,
    /// Op-dependent body; [`MappingReplyBody::None`] on error.
    pub body: MappingReplyBody,
}

impl MappingOperationReply {
    /// Encode the payload body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(self.message_id);
        w.put_u8(self.error as u8);
        match &self.body {
            MappingReplyBody::None => {}
            MappingReplyBody::Get {
                hash,
                was_redirected,
                redirected_path,
            } => {
                w.put_hash(hash);
                w.put_u8(u8::from(*was_redirected));
                if *was_redirected {
                    w.put_string(redirected_path.as_deref().unwrap_or(""));
                }
            }
            MappingReplyBody::GetAll { entries } => {
                w.put_i32(entries.len() as i32);
                for entry in entries {
                    w.put_string(&entry.path);
                    w.put_hash(&entry.hash);
                    w.put_u8(entry.status as u8);
                }
            }
        }
        w.into_bytes()
    }

    /// Decode a payload body. The reply layout depends on which operation
    /// was requested, so the caller supplies the op kind it sent.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] when the body is truncated or carries an
    /// unknown error code, status byte, or negative count.
    pub fn decode(body: &[u8], op: MappingOpKind) -> Result<Self, WireError> {
        let mut r = WireReader::new(body);
        let message_id = r.read_u32()?;
        let code = r.read_u8()?;
        let error = ErrorCode::from_u8(code).ok_or(WireError::UnknownErrorCode(code))?;
        let body = if error != ErrorCode::NoError {
            MappingReplyBody::None
        } else {
            match op {
                MappingOpKind::Get => {
                    let hash = r.read_hash()?;
                    let was_redirected = r.read_u8()? != 0;
                    let redirected_path = if was_redirected {
                        Some(r.read_string()?)
                    } else {
                        None
                    };
                    MappingReplyBody::Get {
                        hash,
                        was_redirected,
                        redirected_path,
                    }
                }
                MappingOpKind::GetAll => {
                    let count = r.read_i32()?;
                    let count = usize::try_from(count).map_err(|_| WireError::BadLength {
                        value: i64::from(count),
                    })?;
                    let mut entries = Vec::with_capacity(count.min(1024));
                    for _ in 0..count {
                        let path = r.read_string()?;
                        let hash = r.read_hash()?;
                        let raw = r.read_u8()?;
                        let status = BakingStatus::from_u8(raw)
                            .ok_or(WireError::UnknownBakingStatus(raw))?;
                        entries.push(MappingEntry { path, hash, status });
                    }
                    MappingReplyBody::GetAll { entries }
                }
                MappingOpKind::Set | MappingOpKind::Delete | MappingOpKind::Rename => {
                    MappingReplyBody::None
                }
            }
        };
        Ok(Self {
            message_id,
            error,
            body,
        })
    }
}

/// Any request the server accepts, demultiplexed by frame kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Ranged content read.
    Get(AssetGet),
    /// Content size query.
    GetInfo(AssetGetInfo),
    /// Whole-content upload.
    Upload(AssetUpload),
    /// Mapping directory operation.
    Mapping(MappingOperation),
}

impl Request {
    /// Frame kind for this request.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Get(_) => MessageKind::AssetGet,
            Self::GetInfo(_) => MessageKind::AssetGetInfo,
            Self::Upload(_) => MessageKind::AssetUpload,
            Self::Mapping(_) => MessageKind::AssetMappingOperation,
        }
    }

    /// Encode the payload body (header not included).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Get(msg) => msg.encode(),
            Self::GetInfo(msg) => msg.encode(),
            Self::Upload(msg) => msg.encode(),
            Self::Mapping(msg) => msg.encode(),
        }
    }

    /// Decode a request body for a frame kind.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownMessageKind`] for reply kinds (a client
    /// must never send those) and decode errors for truncated bodies.
    pub fn decode(kind: MessageKind, body: &[u8]) -> Result<Self, WireError> {
        match kind {
            MessageKind::AssetGet => Ok(Self::Get(AssetGet::decode(body)?)),
            MessageKind::AssetGetInfo => Ok(Self::GetInfo(AssetGetInfo::decode(body)?)),
            MessageKind::AssetUpload => Ok(Self::Upload(AssetUpload::decode(body)?)),
            MessageKind::AssetMappingOperation => {
                Ok(Self::Mapping(MappingOperation::decode(body)?))
            }
            other => Err(WireError::UnknownMessageKind(other as u8)),
        }
    }
}
