// SPDX-License-Identifier: Apache-2.0
//! Request router: demultiplex inbound frames, enforce capabilities,
//! execute mapping operations serially, hand transfers to the pool.
//!
//! Mapping operations hold the control lock for their full duration so a
//! sender's ops apply in arrival order. GETs and UPLOADs never take that
//! lock; they run on the transfer pool against the immutable content files.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use atrium_asset_proto::wire::encode_frame;
use atrium_asset_proto::{
    baked_artifact_path, is_baked_path, AssetGetInfo, AssetGetInfoReply, AssetUploadReply,
    ErrorCode, MappingEntry, MappingOp, MappingOperation, MappingOperationReply, MappingReplyBody,
    MessageKind, Request,
};
use atrium_cas::{AssetHash, CasError};
use tracing::{debug, warn};

use crate::bake::{bakeable_artifact_name, baking_status};
use crate::orphans;
use crate::server::{AssetServer, ServerState};
use crate::session::SessionHandle;
use crate::transfer;

/// Handle one decoded frame from `session`.
///
/// # Errors
///
/// Returns an error for undecodable frames; the connection layer drops the
/// sender in response.
pub async fn handle_frame(
    server: &Arc<AssetServer>,
    session: &SessionHandle,
    kind: u8,
    body: &[u8],
) -> anyhow::Result<()> {
    let kind = MessageKind::from_u8(kind).ok_or_else(|| anyhow!("unknown message kind {kind}"))?;
    let request = Request::decode(kind, body).context("failed to decode request")?;

    match request {
        Request::Get(request) => {
            let store = server.store.clone();
            let session = session.clone();
            server
                .transfer
                .dispatch(transfer::send_asset(store, request, session))
                .await;
        }
        Request::GetInfo(request) => handle_get_info(server, session, request).await,
        Request::Upload(request) => {
            if !session.can_write {
                // The domain denied this sender write access; it may not
                // add assets either.
                debug!(session = session.id, "rejecting upload without write capability");
                let reply = AssetUploadReply {
                    message_id: request.message_id,
                    error: ErrorCode::PermissionDenied,
                    hash: None,
                };
                session
                    .send(encode_frame(MessageKind::AssetUploadReply, &reply.encode()))
                    .await;
            } else {
                let store = server.store.clone();
                let session = session.clone();
                let limit = server.config.filesize_limit;
                server
                    .transfer
                    .dispatch(transfer::upload_asset(store, request, session, limit))
                    .await;
            }
        }
        Request::Mapping(request) => handle_mapping_operation(server, session, request).await,
    }
    Ok(())
}

/// GetInfo is answered synchronously; a stat is cheap enough for the
/// control path.
async fn handle_get_info(server: &Arc<AssetServer>, session: &SessionHandle, request: AssetGetInfo) {
    let reply = match server.store.size(&request.hash) {
        Ok(size) => AssetGetInfoReply {
            message_id: request.message_id,
            hash: request.hash,
            error: ErrorCode::NoError,
            size: Some(size as i64),
        },
        Err(CasError::NotFound { .. }) => {
            debug!(hash = %request.hash, "asset not found");
            AssetGetInfoReply {
                message_id: request.message_id,
                hash: request.hash,
                error: ErrorCode::AssetNotFound,
                size: None,
            }
        }
        Err(err) => {
            warn!(hash = %request.hash, %err, "failed to stat asset");
            AssetGetInfoReply {
                message_id: request.message_id,
                hash: request.hash,
                error: ErrorCode::FileOperationFailed,
                size: None,
            }
        }
    };
    session
        .send(encode_frame(MessageKind::AssetGetInfoReply, &reply.encode()))
        .await;
}

async fn handle_mapping_operation(
    server: &Arc<AssetServer>,
    session: &SessionHandle,
    request: MappingOperation,
) {
    let MappingOperation { message_id, op } = request;

    let reply = {
        let mut state = server.state.lock().await;
        match op {
            MappingOp::Get { path } => handle_get_mapping(server, &mut state, message_id, &path),
            MappingOp::GetAll => handle_get_all_mappings(server, &state, message_id),
            MappingOp::Set { path, hash } => {
                if session.can_write {
                    handle_set_mapping(server, &mut state, message_id, &path, hash)
                } else {
                    denied(message_id)
                }
            }
            MappingOp::Delete { paths } => {
                if session.can_write {
                    handle_delete_mappings(server, &mut state, message_id, &paths)
                } else {
                    denied(message_id)
                }
            }
            MappingOp::Rename { old_path, new_path } => {
                if session.can_write {
                    handle_rename_mapping(&mut state, message_id, &old_path, &new_path)
                } else {
                    denied(message_id)
                }
            }
        }
    };

    session
        .send(encode_frame(
            MessageKind::AssetMappingOperationReply,
            &reply.encode(),
        ))
        .await;
}

fn denied(message_id: u32) -> MappingOperationReply {
    MappingOperationReply {
        message_id,
        error: ErrorCode::PermissionDenied,
        body: MappingReplyBody::None,
    }
}

fn failed(message_id: u32) -> MappingOperationReply {
    MappingOperationReply {
        message_id,
        error: ErrorCode::MappingOperationFailed,
        body: MappingReplyBody::None,
    }
}

/// Split an optional `?query` suffix off a requested path.
fn split_query(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    }
}

/// True if the query string carries `flag` (bare or with a value).
fn query_has_flag(query: Option<&str>, flag: &str) -> bool {
    let Some(query) = query else { return false };
    query
        .split('&')
        .any(|pair| pair == flag || pair.strip_prefix(flag).is_some_and(|rest| rest.starts_with('=')))
}

fn handle_get_mapping(
    server: &Arc<AssetServer>,
    state: &mut ServerState,
    message_id: u32,
    raw_path: &str,
) -> MappingOperationReply {
    let (path, query) = split_query(raw_path);
    let Some(&hash) = state.mappings.get(path) else {
        return MappingOperationReply {
            message_id,
            error: ErrorCode::AssetNotFound,
            body: MappingReplyBody::None,
        };
    };

    // If this extension class can have a baked derivative, prefer serving it.
    if let Some(artifact) = bakeable_artifact_name(path, &server.config.texture_formats) {
        let baked_path = baked_artifact_path(&hash, artifact);
        if let Some(&baked_hash) = state.mappings.get(&baked_path) {
            debug!(%path, %baked_path, "redirecting to baked asset");
            return MappingOperationReply {
                message_id,
                error: ErrorCode::NoError,
                body: MappingReplyBody::Get {
                    hash: baked_hash,
                    was_redirected: true,
                    redirected_path: Some(baked_path),
                },
            };
        }
        debug!(%path, hash = %hash, "no baked version for asset");
    }

    // Skybox opt-in: create the meta record and re-evaluate the predicate,
    // which makes the texture eligible for its first bake.
    if query_has_flag(query, "skybox") {
        match server.create_meta_record_locked(state, &hash) {
            Ok(()) => server.maybe_bake_locked(state, path, &hash),
            Err(err) => warn!(%path, %err, "failed to create meta record for skybox opt-in"),
        }
    }

    MappingOperationReply {
        message_id,
        error: ErrorCode::NoError,
        body: MappingReplyBody::Get {
            hash,
            was_redirected: false,
            redirected_path: None,
        },
    }
}

fn handle_get_all_mappings(
    server: &Arc<AssetServer>,
    state: &ServerState,
    message_id: u32,
) -> MappingOperationReply {
    let entries = state
        .mappings
        .sorted_entries()
        .into_iter()
        .map(|(path, hash)| {
            let status = baking_status(
                &state.mappings,
                &state.bake,
                &server.config.texture_formats,
                &path,
                &hash,
            );
            MappingEntry { path, hash, status }
        })
        .collect();
    MappingOperationReply {
        message_id,
        error: ErrorCode::NoError,
        body: MappingReplyBody::GetAll { entries },
    }
}

fn handle_set_mapping(
    server: &Arc<AssetServer>,
    state: &mut ServerState,
    message_id: u32,
    path: &str,
    hash: AssetHash,
) -> MappingOperationReply {
    let trimmed = path.trim();
    if is_baked_path(trimmed) {
        warn!(path = %trimmed, "rejecting set inside the reserved baked namespace");
        return failed(message_id);
    }
    match state.mappings.set(trimmed, hash) {
        Ok(()) => {
            server.maybe_bake_locked(state, trimmed, &hash);
            MappingOperationReply {
                message_id,
                error: ErrorCode::NoError,
                body: MappingReplyBody::None,
            }
        }
        Err(err) => {
            debug!(path = %trimmed, %err, "set mapping failed");
            failed(message_id)
        }
    }
}

fn handle_delete_mappings(
    server: &Arc<AssetServer>,
    state: &mut ServerState,
    message_id: u32,
    paths: &[String],
) -> MappingOperationReply {
    if paths.iter().any(|path| is_baked_path(path.trim())) {
        warn!("rejecting delete inside the reserved baked namespace");
        return failed(message_id);
    }
    match state.mappings.delete(paths) {
        Ok(outcome) => {
            if !outcome.orphan_candidates.is_empty() {
                orphans::collect(&server.store, &outcome.orphan_candidates);
            }
            MappingOperationReply {
                message_id,
                error: ErrorCode::NoError,
                body: MappingReplyBody::None,
            }
        }
        Err(err) => {
            debug!(%err, "delete mappings failed");
            failed(message_id)
        }
    }
}

fn handle_rename_mapping(
    state: &mut ServerState,
    message_id: u32,
    old_path: &str,
    new_path: &str,
) -> MappingOperationReply {
    if is_baked_path(old_path.trim()) || is_baked_path(new_path.trim()) {
        warn!("rejecting rename touching the reserved baked namespace");
        return failed(message_id);
    }
    match state.mappings.rename(old_path, new_path) {
        Ok(()) => MappingOperationReply {
            message_id,
            error: ErrorCode::NoError,
            body: MappingReplyBody::None,
        },
        Err(err) => {
            debug!(%old_path, %new_path, %err, "rename mapping failed");
            failed(message_id)
        }
    }
}
