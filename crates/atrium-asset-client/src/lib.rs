// SPDX-License-Identifier: Apache-2.0
//! Client helper for talking to the Atrium asset server.
//!
//! [`AssetClient`] owns one framed connection. Requests carry a client-chosen
//! message id; a background reader task routes each reply frame to the
//! pending request with the matching id, so any number of requests can be in
//! flight concurrently. Server-reported failures surface as [`ServerError`]
//! inside the `anyhow` chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use atrium_asset_proto::wire::{decode_frame, encode_frame};
use atrium_asset_proto::{
    AssetGet, AssetGetInfo, AssetGetInfoReply, AssetGetReply, AssetUpload, AssetUploadReply,
    ErrorCode, MappingEntry, MappingOp, MappingOperation, MappingOperationReply,
    MappingReplyBody, MessageKind, MAX_UPLOAD_SIZE,
};
use atrium_cas::AssetHash;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

/// How long a request waits for its reply before giving up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_REPLY_PAYLOAD: usize = (MAX_UPLOAD_SIZE as usize) + 64;

/// An error code reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerError {
    /// The wire error code.
    pub code: ErrorCode,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "asset server error: {}", self.code)
    }
}

impl std::error::Error for ServerError {}

fn check(code: ErrorCode) -> Result<()> {
    if code == ErrorCode::NoError {
        Ok(())
    } else {
        Err(ServerError { code }.into())
    }
}

/// Result of a mapping Get: the resolved hash, possibly redirected to a
/// baked derivative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingLookup {
    /// The resolved content hash (the baked one when redirected).
    pub hash: AssetHash,
    /// True when the server redirected to a baked derivative.
    pub was_redirected: bool,
    /// Baked mapping path; present iff `was_redirected`.
    pub redirected_path: Option<String>,
}

struct ReplyFrame {
    kind: u8,
    body: Vec<u8>,
}

struct ClientInner {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<ReplyFrame>>>,
    writer: Mutex<OwnedWriteHalf>,
}

/// One framed connection to the asset server.
#[derive(Clone)]
pub struct AssetClient {
    inner: Arc<ClientInner>,
    request_timeout: Duration,
}

impl AssetClient {
    /// Connect to the server and start the reply reader.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("connecting to asset server")?;
        let (read_half, write_half) = stream.into_split();
        let inner = Arc::new(ClientInner {
            next_id: AtomicU32::new(0),
            pending: Mutex::new(HashMap::new()),
            writer: Mutex::new(write_half),
        });
        tokio::spawn(run_reader(inner.clone(), read_half));
        Ok(Self {
            inner,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Use a non-default reply timeout.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn next_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(
        &self,
        kind: MessageKind,
        body: Vec<u8>,
        message_id: u32,
    ) -> Result<ReplyFrame> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(message_id, tx);

        let frame = encode_frame(kind, &body);
        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(err) = writer.write_all(&frame).await {
                self.inner.pending.lock().await.remove(&message_id);
                return Err(err).context("sending request");
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => bail!("connection closed before reply (message {message_id})"),
            Err(_) => {
                self.inner.pending.lock().await.remove(&message_id);
                bail!("timed out waiting for reply (message {message_id})")
            }
        }
    }

    /// Upload full content bytes; returns the server-computed hash.
    pub async fn upload(&self, payload: Vec<u8>) -> Result<AssetHash> {
        let message_id = self.next_id();
        let body = AssetUpload {
            message_id,
            payload,
        }
        .encode();
        let reply = self
            .request(MessageKind::AssetUpload, body, message_id)
            .await?;
        ensure!(
            reply.kind == MessageKind::AssetUploadReply as u8,
            "unexpected reply kind {}",
            reply.kind
        );
        let reply = AssetUploadReply::decode(&reply.body).context("decoding upload reply")?;
        check(reply.error)?;
        reply.hash.context("upload reply missing hash")
    }

    /// Size in bytes of the content stored under `hash`.
    pub async fn get_info(&self, hash: AssetHash) -> Result<i64> {
        let message_id = self.next_id();
        let body = AssetGetInfo { message_id, hash }.encode();
        let reply = self
            .request(MessageKind::AssetGetInfo, body, message_id)
            .await?;
        ensure!(
            reply.kind == MessageKind::AssetGetInfoReply as u8,
            "unexpected reply kind {}",
            reply.kind
        );
        let reply = AssetGetInfoReply::decode(&reply.body).context("decoding info reply")?;
        check(reply.error)?;
        reply.size.context("info reply missing size")
    }

    /// Read `[from, to)` of the content stored under `hash`. A negative
    /// `from` addresses from the end of the file.
    pub async fn get(&self, hash: AssetHash, from_inclusive: i64, to_exclusive: i64) -> Result<Vec<u8>> {
        let message_id = self.next_id();
        let body = AssetGet {
            message_id,
            hash,
            from_inclusive,
            to_exclusive,
        }
        .encode();
        let reply = self.request(MessageKind::AssetGet, body, message_id).await?;
        ensure!(
            reply.kind == MessageKind::AssetGetReply as u8,
            "unexpected reply kind {}",
            reply.kind
        );
        let reply = AssetGetReply::decode(&reply.body).context("decoding get reply")?;
        check(reply.error)?;
        Ok(reply.payload)
    }

    async fn mapping_request(&self, op: MappingOp) -> Result<MappingOperationReply> {
        let op_kind = op.kind();
        let message_id = self.next_id();
        let body = MappingOperation { message_id, op }.encode();
        let reply = self
            .request(MessageKind::AssetMappingOperation, body, message_id)
            .await?;
        ensure!(
            reply.kind == MessageKind::AssetMappingOperationReply as u8,
            "unexpected reply kind {}",
            reply.kind
        );
        MappingOperationReply::decode(&reply.body, op_kind).context("decoding mapping reply")
    }

    /// Resolve `path` to a hash. The path may carry a query suffix (e.g.
    /// `?skybox` to opt a texture into baking).
    pub async fn get_mapping(&self, path: &str) -> Result<MappingLookup> {
        let reply = self
            .mapping_request(MappingOp::Get {
                path: path.to_owned(),
            })
            .await?;
        check(reply.error)?;
        match reply.body {
            MappingReplyBody::Get {
                hash,
                was_redirected,
                redirected_path,
            } => Ok(MappingLookup {
                hash,
                was_redirected,
                redirected_path,
            }),
            _ => bail!("malformed get-mapping reply body"),
        }
    }

    /// Fetch every mapping with its baking status.
    pub async fn get_all_mappings(&self) -> Result<Vec<MappingEntry>> {
        let reply = self.mapping_request(MappingOp::GetAll).await?;
        check(reply.error)?;
        match reply.body {
            MappingReplyBody::GetAll { entries } => Ok(entries),
            _ => bail!("malformed get-all reply body"),
        }
    }

    /// Bind `path` to `hash`.
    pub async fn set_mapping(&self, path: &str, hash: AssetHash) -> Result<()> {
        let reply = self
            .mapping_request(MappingOp::Set {
                path: path.to_owned(),
                hash,
            })
            .await?;
        check(reply.error)
    }

    /// Delete paths; a trailing-slash path deletes its whole subtree.
    pub async fn delete_mappings(&self, paths: Vec<String>) -> Result<()> {
        let reply = self.mapping_request(MappingOp::Delete { paths }).await?;
        check(reply.error)
    }

    /// Rename a file mapping, or a folder subtree when both end in `/`.
    pub async fn rename_mapping(&self, old_path: &str, new_path: &str) -> Result<()> {
        let reply = self
            .mapping_request(MappingOp::Rename {
                old_path: old_path.to_owned(),
                new_path: new_path.to_owned(),
            })
            .await?;
        check(reply.error)
    }
}

/// Where the echoed message id sits in each reply body.
fn reply_message_id(kind: u8, body: &[u8]) -> Option<u32> {
    let offset = match MessageKind::from_u8(kind)? {
        // The get reply leads with the 32-byte hash.
        MessageKind::AssetGetReply => 32,
        MessageKind::AssetGetInfoReply
        | MessageKind::AssetUploadReply
        | MessageKind::AssetMappingOperationReply => 0,
        _ => return None,
    };
    let bytes = body.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

async fn run_reader(inner: Arc<ClientInner>, mut reader: OwnedReadHalf) {
    let mut read_buf = vec![0u8; 64 * 1024];
    let mut acc: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut read_buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        acc.extend_from_slice(&read_buf[..n]);

        loop {
            match decode_frame(&acc, MAX_REPLY_PAYLOAD) {
                Ok(Some((kind, body, used))) => {
                    let body = body.to_vec();
                    acc.drain(..used);
                    let Some(message_id) = reply_message_id(kind, &body) else {
                        debug!(kind, "dropping reply frame with no message id");
                        continue;
                    };
                    if let Some(pending) = inner.pending.lock().await.remove(&message_id) {
                        let _ = pending.send(ReplyFrame { kind, body });
                    } else {
                        debug!(message_id, "dropping reply with no pending request");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // A garbled stream is unrecoverable; fail everything.
                    inner.pending.lock().await.clear();
                    return;
                }
            }
        }
    }
    // Connection closed: wake every waiter with an error.
    inner.pending.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── 1. reply message ids are found at the right offsets ──────────────

    #[test]
    fn reply_id_offsets() {
        let get_reply = AssetGetReply {
            hash: AssetHash([9; 32]),
            message_id: 77,
            error: ErrorCode::AssetNotFound,
            payload: Vec::new(),
        }
        .encode();
        assert_eq!(
            reply_message_id(MessageKind::AssetGetReply as u8, &get_reply),
            Some(77)
        );

        let upload_reply = AssetUploadReply {
            message_id: 12,
            error: ErrorCode::NoError,
            hash: Some(AssetHash([1; 32])),
        }
        .encode();
        assert_eq!(
            reply_message_id(MessageKind::AssetUploadReply as u8, &upload_reply),
            Some(12)
        );

        // Truncated bodies and request kinds yield nothing.
        assert_eq!(reply_message_id(MessageKind::AssetGetReply as u8, &[0; 8]), None);
        assert_eq!(reply_message_id(MessageKind::AssetGet as u8, &upload_reply), None);
    }

    // ── 2. server errors surface as typed ServerError ────────────────────

    #[test]
    fn server_error_downcast() {
        let err = check(ErrorCode::PermissionDenied).unwrap_err();
        let server_err = err.downcast_ref::<ServerError>().unwrap();
        assert_eq!(server_err.code, ErrorCode::PermissionDenied);
        assert!(check(ErrorCode::NoError).is_ok());
    }
}
