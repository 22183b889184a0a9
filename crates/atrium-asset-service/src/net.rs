// SPDX-License-Identifier: Apache-2.0
//! Framed TCP listener adapter.
//!
//! The reliable-datagram transport proper (retransmit, flow control, sender
//! attestation) is an external collaborator; this adapter stands in for it
//! with length-prefixed frames over TCP. Each connection gets a reader loop
//! that accumulates frames and a writer task draining the session outbox.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use atrium_asset_proto::wire::decode_frame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::router;
use crate::server::AssetServer;

/// Listener construction parameters.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address, e.g. `127.0.0.1:28890`.
    pub addr: String,
    /// Write capability granted to connecting senders. A real transport
    /// attaches this per sender from the domain's permission attestations.
    pub allow_writes: bool,
    /// Per-connection bandwidth cap in bits/s, enforced by the transport
    /// layer below this adapter; recorded here for the boot log.
    pub max_bandwidth_bps: Option<u64>,
}

impl ListenerConfig {
    /// Config for `addr` with writes allowed and no bandwidth cap.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            allow_writes: true,
            max_bandwidth_bps: None,
        }
    }
}

/// A bound listener ready to serve.
pub struct Listener {
    server: Arc<AssetServer>,
    listener: TcpListener,
    config: ListenerConfig,
}

impl Listener {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound.
    pub async fn bind(server: Arc<AssetServer>, config: ListenerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.addr)
            .await
            .with_context(|| format!("binding {}", config.addr))?;
        Ok(Self {
            server,
            listener,
            config,
        })
    }

    /// The actually-bound address (useful with a `:0` port).
    ///
    /// # Errors
    ///
    /// Propagates the socket's local-address lookup failure.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr().context("reading local address")
    }

    /// Accept connections forever.
    ///
    /// # Errors
    ///
    /// Returns only when accepting fails fatally.
    pub async fn serve(self) -> anyhow::Result<()> {
        if let Some(bps) = self.config.max_bandwidth_bps {
            info!(
                bits_per_second = bps,
                "set maximum bandwidth per connection"
            );
        }
        info!(addr = %self.local_addr()?, "asset server listening");

        loop {
            let (stream, _) = self.listener.accept().await?;
            let server = self.server.clone();
            let allow_writes = self.config.allow_writes;
            tokio::spawn(async move {
                if let Err(err) = handle_connection(server, stream, allow_writes).await {
                    warn!(%err, "connection handler error");
                }
            });
        }
    }
}

async fn handle_connection(
    server: Arc<AssetServer>,
    stream: TcpStream,
    allow_writes: bool,
) -> anyhow::Result<()> {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let session = server.register_session(allow_writes, tx).await;
    info!(session = session.id, ?peer, "client connected");

    // Writer task drains the session outbox; a failed write ends it and the
    // reader loop notices on the next inbound byte or reply attempt.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let max_payload = (server.config().filesize_limit as usize).saturating_add(64);
    let mut read_buf = vec![0u8; 64 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(128 * 1024);

    let result: anyhow::Result<()> = async {
        loop {
            let n = reader.read(&mut read_buf).await?;
            if n == 0 {
                break;
            }
            session.counters.record_in(n as u64, 0);
            acc.extend_from_slice(&read_buf[..n]);

            // Process as many complete frames as the buffer holds.
            loop {
                let frame = match decode_frame(&acc, max_payload) {
                    Ok(Some((kind, body, used))) => Some((kind, body.to_vec(), used)),
                    Ok(None) => None,
                    Err(err) => {
                        warn!(session = session.id, %err, "dropping connection on bad frame");
                        return Ok(());
                    }
                };
                let Some((kind, body, used)) = frame else {
                    break;
                };
                acc.drain(..used);
                session.counters.record_in(0, 1);
                router::handle_frame(&server, &session, kind, &body).await?;
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = &result {
        warn!(session = session.id, %err, "client handler error");
    }
    info!(session = session.id, "client disconnected");
    server.unregister_session(session.id).await;
    writer_task.abort();
    Ok(())
}
