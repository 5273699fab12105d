//! Shared gateway state.
//!
//! Connections are isolated from one another; the only cross-connection
//! mutable state is the atomic active-connection counter and the registry
//! the idle sweep reads.

use crate::guard::ContentGuard;
use crate::memory::MemoryStore;
use crate::session::SessionIssuer;
use aria_core::config::RelayConfig;
use aria_core::session::Session;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Why a connection is being told to shut down from outside its pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Idle beyond the sweep threshold.
    Idle,
    /// Gateway is shutting down.
    Shutdown,
}

/// Registry entry for one live connection.
pub struct ConnectionEntry {
    /// Unix seconds of the last message on either leg.
    pub last_activity: Arc<AtomicI64>,
    /// Signal the pump to tear the connection down.
    pub close_tx: mpsc::Sender<CloseReason>,
}

/// Process-wide gateway state shared by the HTTP and WebSocket surfaces.
pub struct AppState {
    pub config: RelayConfig,
    pub issuer: SessionIssuer,
    pub guard: Arc<dyn ContentGuard>,
    pub memory: Arc<dyn MemoryStore>,
    /// Issued, not-yet-claimed sessions. Claiming removes the entry:
    /// tokens are single-use per connection.
    pub sessions: DashMap<Uuid, Session>,
    /// Live connections, for the idle sweep and diagnostics.
    pub connections: DashMap<Uuid, ConnectionEntry>,
    active: AtomicUsize,
}

impl AppState {
    pub fn new(
        config: RelayConfig,
        guard: Arc<dyn ContentGuard>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        let issuer = SessionIssuer::new(config.clone());
        Self {
            config,
            issuer,
            guard,
            memory,
            sessions: DashMap::new(),
            connections: DashMap::new(),
            active: AtomicUsize::new(0),
        }
    }

    /// Reserve a connection slot. `false` means the gateway is at capacity
    /// and the accept must be rejected with an explicit terminal error.
    pub fn try_acquire_slot(&self) -> bool {
        let max = self.config.max_connections;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < max {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Release a slot acquired with [`AppState::try_acquire_slot`].
    pub fn release_slot(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop issued-but-unclaimed sessions whose deadline passed.
    pub fn sweep_expired_sessions(&self) {
        self.sessions.retain(|_, s| !s.is_expired());
    }
}
