// SPDX-License-Identifier: Apache-2.0
//! End-to-end mapping scenarios: set/get/get-all, subtree delete with
//! orphan collection, folder rename, and namespace enforcement.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use atrium_asset_client::{AssetClient, ServerError};
use atrium_asset_service::bakers::Bakers;
use atrium_asset_service::net::{Listener, ListenerConfig};
use atrium_asset_service::{AssetServer, ServerConfig};
use atrium_asset_proto::{BakingStatus, ErrorCode};

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
async fn set_then_get_mapping() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let hash = client.upload(b"hello".to_vec()).await.unwrap();
    client.set_mapping("/greet.txt", hash).await.unwrap();

    let lookup = client.get_mapping("/greet.txt").await.unwrap();
    assert_eq!(lookup.hash, hash);
    assert!(!lookup.was_redirected);
    assert!(lookup.redirected_path.is_none());

    let all = client.get_all_mappings().await.unwrap();
    let entry = all.iter().find(|e| e.path == "/greet.txt").unwrap();
    assert_eq!(entry.hash, hash);
    assert_eq!(entry.status, BakingStatus::NotBaked);
}

#[tokio::test]
async fn get_missing_mapping() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let err = client.get_mapping("/nothing-here").await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AssetNotFound));
}

#[tokio::test]
async fn delete_subtree_and_collect() {
    let root = tempfile::tempdir().unwrap();
    let (server, client) = start_server(root.path(), true).await;

    let ax = client.upload(b"payload a/x".to_vec()).await.unwrap();
    let ay = client.upload(b"payload a/y".to_vec()).await.unwrap();
    let bz = client.upload(b"payload b/z".to_vec()).await.unwrap();
    client.set_mapping("/a/x", ax).await.unwrap();
    client.set_mapping("/a/y", ay).await.unwrap();
    client.set_mapping("/b/z", bz).await.unwrap();

    client.delete_mappings(vec!["/a/".to_owned()]).await.unwrap();

    let all = client.get_all_mappings().await.unwrap();
    let paths: Vec<&str> = all.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/b/z"]);

    // The two orphaned content files are gone; the survivor remains.
    assert!(!server.store().exists(&ax));
    assert!(!server.store().exists(&ay));
    assert!(server.store().exists(&bz));
}

#[tokio::test]
async fn delete_keeps_content_shared_with_surviving_mapping() {
    let root = tempfile::tempdir().unwrap();
    let (server, client) = start_server(root.path(), true).await;

    let shared = client.upload(b"shared payload".to_vec()).await.unwrap();
    client.set_mapping("/one", shared).await.unwrap();
    client.set_mapping("/two", shared).await.unwrap();

    client.delete_mappings(vec!["/one".to_owned()]).await.unwrap();
    assert!(server.store().exists(&shared));
    assert_eq!(client.get_mapping("/two").await.unwrap().hash, shared);
}

#[tokio::test]
async fn rename_folder_subtree() {
    let root = tempfile::tempdir().unwrap();
    let (server, client) = start_server(root.path(), true).await;

    let one = client.upload(b"one".to_vec()).await.unwrap();
    let two = client.upload(b"two".to_vec()).await.unwrap();
    client.set_mapping("/old/one", one).await.unwrap();
    client.set_mapping("/old/two", two).await.unwrap();

    client.rename_mapping("/old/", "/new/").await.unwrap();

    assert_eq!(client.get_mapping("/new/one").await.unwrap().hash, one);
    assert_eq!(client.get_mapping("/new/two").await.unwrap().hash, two);

    let err = client.get_mapping("/old/one").await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AssetNotFound));

    // Content files are untouched by renames.
    assert!(server.store().exists(&one));
    assert!(server.store().exists(&two));
}

#[tokio::test]
async fn rename_file_overwrites_destination() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let src = client.upload(b"source".to_vec()).await.unwrap();
    let dst = client.upload(b"destination".to_vec()).await.unwrap();
    client.set_mapping("/src.txt", src).await.unwrap();
    client.set_mapping("/dst.txt", dst).await.unwrap();

    client.rename_mapping("/src.txt", "/dst.txt").await.unwrap();
    assert_eq!(client.get_mapping("/dst.txt").await.unwrap().hash, src);
    let err = client.get_mapping("/src.txt").await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::AssetNotFound));
}

#[tokio::test]
async fn rename_rejects_folder_file_mismatch_and_missing_source() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let hash = client.upload(b"x".to_vec()).await.unwrap();
    client.set_mapping("/dir/file", hash).await.unwrap();

    let err = client.rename_mapping("/dir/", "/plain").await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::MappingOperationFailed));

    let err = client.rename_mapping("/absent", "/anywhere").await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::MappingOperationFailed));
}

#[tokio::test]
async fn set_rejects_reserved_namespace() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), true).await;

    let hash = client.upload(b"sneaky".to_vec()).await.unwrap();
    let err = client
        .set_mapping("/.baked/0000/asset.fbx", hash)
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::MappingOperationFailed));

    let err = client
        .delete_mappings(vec!["/.baked/0000/".to_owned()])
        .await
        .unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::MappingOperationFailed));
}

#[tokio::test]
async fn mutating_ops_require_write_capability() {
    let root = tempfile::tempdir().unwrap();
    let (_server, client) = start_server(root.path(), false).await;

    let hash = atrium_cas::hash_data(b"anything");
    let err = client.set_mapping("/x", hash).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));

    let err = client.delete_mappings(vec!["/x".to_owned()]).await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));

    let err = client.rename_mapping("/x", "/y").await.unwrap_err();
    assert_eq!(error_code(&err), Some(ErrorCode::PermissionDenied));

    // Reads stay open.
    assert!(client.get_all_mappings().await.unwrap().is_empty());
}

#[tokio::test]
async fn mappings_survive_restart() {
    let root = tempfile::tempdir().unwrap();
    let hash;
    {
        let (_server, client) = start_server(root.path(), true).await;
        hash = client.upload(b"durable".to_vec()).await.unwrap();
        client.set_mapping("/durable.bin", hash).await.unwrap();
    }

    // A second server over the same storage root sees the same directory.
    let (_server, client) = start_server(root.path(), true).await;
    assert_eq!(client.get_mapping("/durable.bin").await.unwrap().hash, hash);
    assert_eq!(client.get(hash, 0, 7).await.unwrap(), b"durable");
}
