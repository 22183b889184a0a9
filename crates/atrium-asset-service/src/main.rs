// SPDX-License-Identifier: Apache-2.0
//! Asset server daemon entry point.
//!
//! Boot order mirrors the assignment lifecycle: acquire settings from the
//! external source, resolve the storage root, start the core, then serve
//! the transport adapter. A settings failure aborts the boot — there is no
//! storage root to invent.

use anyhow::Context;
use atrium_asset_service::bakers::Bakers;
use atrium_asset_service::net::{Listener, ListenerConfig};
use atrium_asset_service::settings::{self, FileSettingsSource, SettingsSource};
use atrium_asset_service::{AssetServer, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:28890";
const DEFAULT_SETTINGS_PATH: &str = "settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ATRIUM_SETTINGS").ok())
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_owned());
    let listen_addr =
        std::env::var("ATRIUM_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_owned());

    let settings = FileSettingsSource::new(&settings_path)
        .fetch()
        .context("asset server assignment will not continue without settings")?;
    let storage_root = settings::resolve_assets_path(&settings.assets_path)
        .context("resolving storage root")?;
    info!(root = %storage_root.display(), "using storage root");

    // Concrete bakers are deployment-specific plugins; the stock daemon
    // serves and maps without baking.
    let server = AssetServer::start(ServerConfig::new(storage_root), Bakers::none()).await?;

    let listener = Listener::bind(
        server,
        ListenerConfig {
            addr: listen_addr,
            allow_writes: true,
            max_bandwidth_bps: settings.max_bandwidth_bps(),
        },
    )
    .await?;
    listener.serve().await
}
