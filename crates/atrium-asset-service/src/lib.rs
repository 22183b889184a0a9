// SPDX-License-Identifier: Apache-2.0
//! Atrium asset server.
//!
//! A content-addressed asset plane for a networked virtual world: clients
//! upload opaque blobs (models, textures, scripts) and retrieve them by
//! SHA-256 content hash or by a human-readable virtual path. The server owns
//! a crash-consistent path→hash mapping directory, deduplicates content by
//! hash, bakes eligible assets into optimized derivatives under the hidden
//! `/.baked/` namespace, and serves ranged reads over a framed message
//! transport.
//!
//! Control flow: the router demultiplexes inbound frames. Mapping operations
//! run serially against the control state; GET and UPLOAD jobs go to a
//! bounded transfer pool; a single dedicated worker drains the bake queue
//! and commits its outputs back through the mapping store.

pub mod bake;
pub mod bakers;
pub mod mappings;
pub mod net;
pub mod orphans;
pub mod router;
pub mod server;
pub mod session;
pub mod settings;
pub mod stats;
pub mod transfer;

pub use server::{AssetServer, ServerConfig};
