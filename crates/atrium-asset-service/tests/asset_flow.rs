// SPDX-License-Identifier: Apache-2.0
//! End-to-end transfer scenarios: upload, stat, ranged reads, capability
//! enforcement — a real server on a real socket, driven by the client crate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use atrium_asset_client::{AssetClient, ServerError};
use atrium_asset_service::bakers::Bakers;
use atrium_asset_service::net::{Listener, ListenerConfig};
use atrium_asset_service::{AssetServer, ServerConfig};
use atrium_asset_proto::ErrorCode;
use atrium_cas::hash_data;

async fn start_server(root: &Path, allow_writes: bool) -> (Arc<AssetServer>, AssetClient) {
    let mut config = ServerConfig::new(root);
    config.stats_interval = None;
    let server = AssetServer::start(config, Bakers::none()).await.unwrap();

    let mut listener_config = ListenerConfig::new("127.0.0.1:0");
    listener_config.allow_writes = allow_writes;
    let listener = Listener::bind(server.clone(), listener_config)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve());

    let client = AssetClient::connect(addr)
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(5));
    (server, client)
}

fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.downcast_ref::<ServerError>().map(|e| e.code)
}

#[tokio::test]
async fn upload_then_get_by_hash() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let hash = client.upload(b"hello".to_vec()).await.unwrap();
    assert_eq!(
        hash.to_hex(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );

    assert_eq!(client.get_info(hash).await.unwrap(), 5);
    assert_eq!(client.get(hash, 0, 5).await.unwrap(), b"hello");
}

#[tokio::test]
async fn byte_range_forms() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let payload: Vec<u8> = (0u8..100).collect();
    let hash = client.upload(payload.clone()).await.unwrap();

    // Whole file, forward and tail forms.
    assert_eq!(client.get(hash, 0, 100).await.unwrap(), payload);
    assert_eq!(client.get(hash, -100, 0).await.unwrap(), payload);
    // Last ten bytes.
    assert_eq!(client.get(hash, -10, 0).await.unwrap(), &payload[90..]);
    // Interior window.
    assert_eq!(client.get(hash, 10, 20).await.unwrap(), &payload[10..20]);
}

#[tokio::test]
async fn range_and_lookup_errors() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let hash = client.upload(vec![0u8; 100]).await.unwrap();

    let err = client.get(hash, 0, 101).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::InvalidByteRange));

    let err = client.get(hash, 0, 0).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::InvalidByteRange));

    let missing = hash_data(b"never uploaded");
    let err = client.get(missing, 0, 1).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AssetNotFound));

    let err = client.get_info(missing).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AssetNotFound));
}

#[tokio::test]
async fn upload_deduplicates_on_disk() {
    let root = tempfile::tempdir().unwrap();
    let (server, client) = start_server(root.path(), true).await;

    let a = client.upload(b"same payload".to_vec()).await.unwrap();
    let b = client.upload(b"same payload".to_vec()).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(server.store().list_all_hashes().unwrap().len(), 1);
}

#[tokio::test]
async fn upload_without_capability_is_denied() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), false).await;

    let err = client.upload(b"contraband".to_vec()).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::new(root.path());
    config.stats_interval = None;
    config.filesize_limit = 16;
    let server = AssetServer::start(config, Bakers::none()).await.unwrap();
    let listener = Listener::bind(server, ListenerConfig::new("127.0.0.1:0"))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.serve());
    let client = AssetClient::connect(addr).await.unwrap();

    let err = client.upload(vec![0u8; 32]).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AssetTooLarge));
}

#[tokio::test]
async fn concurrent_requests_on_one_connection() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    // Fire a batch of uploads concurrently over the same connection; reply
    // correlation must route every answer to its request.
    let mut tasks = Vec::new();
    for i in 0u8..16 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let payload = vec![i; 64];
            let hash = client.upload(payload.clone()).await.unwrap();
            assert_eq!(hash, hash_data(&payload));
            let got = client.get(hash, 0, 64).await.unwrap();
            assert_eq!(got, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}
