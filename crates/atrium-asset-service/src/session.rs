// SPDX-License-Identifier: Apache-2.0
//! Per-sender session state: capability bits, reply outbox, transport
//! counters.
//!
//! The transport attaches exactly one capability to a sender — "may write to
//! the asset store" — which the handlers consume as input. Identity and
//! attestation live below this layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Logical session identifier, unique per process lifetime.
pub type SessionId = u64;

/// Monotonic transport counters for one session.
#[derive(Debug, Default)]
pub struct TransferCounters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
}

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Total bytes received from the sender.
    pub bytes_in: u64,
    /// Total bytes queued toward the sender.
    pub bytes_out: u64,
    /// Total inbound messages.
    pub messages_in: u64,
    /// Total outbound messages.
    pub messages_out: u64,
}

impl TransferCounters {
    /// Record inbound traffic.
    pub fn record_in(&self, bytes: u64, messages: u64) {
        self.bytes_in.fetch_add(bytes, Ordering::Relaxed);
        self.messages_in.fetch_add(messages, Ordering::Relaxed);
    }

    /// Record outbound traffic.
    pub fn record_out(&self, bytes: u64, messages: u64) {
        self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
        self.messages_out.fetch_add(messages, Ordering::Relaxed);
    }

    /// Copy the current totals.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
        }
    }
}

/// Cheap handle to one connected sender.
#[derive(Clone)]
pub struct SessionHandle {
    /// Session identifier.
    pub id: SessionId,
    /// Whether the transport granted this sender the write capability.
    pub can_write: bool,
    /// Transport counters shared with the connection tasks.
    pub counters: Arc<TransferCounters>,
    outbox: mpsc::Sender<Vec<u8>>,
}

impl SessionHandle {
    /// Queue an encoded frame toward the sender.
    ///
    /// A disconnected sender drops the frame silently; the caller has no
    /// recovery beyond what the next request's timeout gives the client.
    pub async fn send(&self, frame: Vec<u8>) {
        self.counters.record_out(frame.len() as u64, 1);
        let _ = self.outbox.send(frame).await;
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("can_write", &self.can_write)
            .finish_non_exhaustive()
    }
}

/// Registry of live sessions, owned by the control state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: SessionId,
    sessions: HashMap<SessionId, SessionHandle>,
}

impl SessionRegistry {
    /// Register a new sender and hand back its session handle.
    pub fn register(&mut self, can_write: bool, outbox: mpsc::Sender<Vec<u8>>) -> SessionHandle {
        let id = self.next_id;
        self.next_id += 1;
        let handle = SessionHandle {
            id,
            can_write,
            counters: Arc::new(TransferCounters::default()),
            outbox,
        };
        self.sessions.insert(id, handle.clone());
        handle
    }

    /// Drop a sender on disconnect.
    pub fn unregister(&mut self, id: SessionId) {
        self.sessions.remove(&id);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot the live handles, sorted by id.
    pub fn handles(&self) -> Vec<SessionHandle> {
        let mut out: Vec<_> = self.sessions.values().cloned().collect();
        out.sort_by_key(|handle| handle.id);
        out
    }
}
