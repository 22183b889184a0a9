// SPDX-License-Identifier: Apache-2.0
//! Minimal CLI uploader for exercising the asset server.
//!
//! Connects to the server, uploads a local file, maps it at the given
//! virtual path, then reads the mapping back (following any bake redirect)
//! and prints what the server would serve. Handy for verifying that
//! `atrium-asset-service` is alive without a full world client.

use anyhow::{Context, Result};
use atrium_asset_client::AssetClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let addr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:28890".to_string());
    let file = args.next().context("usage: upload_map <addr> <file> <virtual-path>")?;
    let virtual_path = args
        .next()
        .context("usage: upload_map <addr> <file> <virtual-path>")?;

    let payload = std::fs::read(&file).with_context(|| format!("read {file}"))?;
    let size = payload.len();

    let client = AssetClient::connect(&addr)
        .await
        .with_context(|| format!("connect {addr}"))?;

    let hash = client.upload(payload).await.context("upload")?;
    println!("uploaded {size} bytes as {hash}");

    client
        .set_mapping(&virtual_path, hash)
        .await
        .context("set mapping")?;
    println!("mapped {virtual_path} => {hash}");

    let lookup = client.get_mapping(&virtual_path).await.context("get mapping")?;
    if lookup.was_redirected {
        println!(
            "server redirects to baked artifact {} ({})",
            lookup.redirected_path.as_deref().unwrap_or("?"),
            lookup.hash
        );
    } else {
        let info = client.get_info(lookup.hash).await.context("get info")?;
        println!("server reports {info} bytes at {}", lookup.hash);
    }

    Ok(())
}
