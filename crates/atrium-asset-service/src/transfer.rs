// SPDX-License-Identifier: Apache-2.0
//! Bounded transfer pool and the GET/UPLOAD jobs it executes.
//!
//! The work is I/O bound — reading content files and pushing reply frames —
//! so the pool is wide (50 by default) and bounded by a semaphore: when
//! every permit is taken, dispatch awaits, which backpressures the
//! connection that is flooding us.

use atrium_asset_proto::wire::encode_frame;
use atrium_asset_proto::{
    AssetGet, AssetGetReply, AssetUpload, AssetUploadReply, ErrorCode, MessageKind,
};
use atrium_cas::{ByteRange, CasError, ContentStore};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::session::SessionHandle;

/// Default pool width. The jobs block on disk, so the ideal is well above
/// the machine's core count.
pub const DEFAULT_TRANSFER_WORKERS: usize = 50;

/// Semaphore-bounded job pool for asset transfers.
#[derive(Clone)]
pub struct TransferPool {
    permits: Arc<Semaphore>,
}

impl TransferPool {
    /// Create a pool with `workers` concurrent job slots.
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run `job` on the pool. Awaits a free slot first, so a saturated pool
    /// backpressures the dispatching connection.
    pub async fn dispatch<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            // The semaphore is never closed while the pool is alive.
            return;
        };
        tokio::spawn(async move {
            let _permit = permit;
            job.await;
        });
    }
}

/// Serve a ranged GET: open the content file, apply the byte range, reply
/// on the sender's stream.
pub async fn send_asset(store: ContentStore, request: AssetGet, session: SessionHandle) {
    let range = ByteRange::new(request.from_inclusive, request.to_exclusive);
    debug!(
        hash = %request.hash,
        message_id = request.message_id,
        from = range.from_inclusive,
        to = range.to_exclusive,
        "serving asset request"
    );

    let reply = if !range.is_set() {
        AssetGetReply {
            hash: request.hash,
            message_id: request.message_id,
            error: ErrorCode::InvalidByteRange,
            payload: Vec::new(),
        }
    } else {
        let hash = request.hash;
        let read = tokio::task::spawn_blocking(move || store.open_range(&hash, range)).await;
        match read {
            Ok(Ok(payload)) => AssetGetReply {
                hash: request.hash,
                message_id: request.message_id,
                error: ErrorCode::NoError,
                payload,
            },
            Ok(Err(err)) => {
                let code = match err {
                    CasError::NotFound { .. } => ErrorCode::AssetNotFound,
                    CasError::InvalidRange { .. } => ErrorCode::InvalidByteRange,
                    _ => ErrorCode::FileOperationFailed,
                };
                debug!(hash = %request.hash, %err, "asset request failed");
                AssetGetReply {
                    hash: request.hash,
                    message_id: request.message_id,
                    error: code,
                    payload: Vec::new(),
                }
            }
            Err(err) => {
                warn!(%err, "send task panicked or was cancelled");
                AssetGetReply {
                    hash: request.hash,
                    message_id: request.message_id,
                    error: ErrorCode::FileOperationFailed,
                    payload: Vec::new(),
                }
            }
        }
    };

    session
        .send(encode_frame(MessageKind::AssetGetReply, &reply.encode()))
        .await;
}

/// Ingest an upload: enforce the size cap, hash, deduplicate, write with
/// read-back verification, reply with the hash or an error.
pub async fn upload_asset(
    store: ContentStore,
    request: AssetUpload,
    session: SessionHandle,
    filesize_limit: u64,
) {
    let size = request.payload.len() as u64;
    debug!(
        message_id = request.message_id,
        size,
        session = session.id,
        "upload task reading file"
    );

    let reply = if size > filesize_limit {
        AssetUploadReply {
            message_id: request.message_id,
            error: ErrorCode::AssetTooLarge,
            hash: None,
        }
    } else {
        let payload = request.payload;
        let stored = tokio::task::spawn_blocking(move || store.put(&payload)).await;
        match stored {
            Ok(Ok(hash)) => {
                debug!(%hash, "upload complete");
                AssetUploadReply {
                    message_id: request.message_id,
                    error: ErrorCode::NoError,
                    hash: Some(hash),
                }
            }
            Ok(Err(err)) => {
                warn!(%err, "failed to write uploaded asset");
                AssetUploadReply {
                    message_id: request.message_id,
                    error: ErrorCode::FileOperationFailed,
                    hash: None,
                }
            }
            Err(err) => {
                warn!(%err, "upload task panicked or was cancelled");
                AssetUploadReply {
                    message_id: request.message_id,
                    error: ErrorCode::FileOperationFailed,
                    hash: None,
                }
            }
        }
    };

    session
        .send(encode_frame(MessageKind::AssetUploadReply, &reply.encode()))
        .await;
}
