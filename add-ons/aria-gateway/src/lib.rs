//! # Aria Gateway — the server side of the voice relay
//!
//! One [`relay::ConnectionRelay`] per accepted client WebSocket bridges the
//! client leg and the upstream realtime leg, enforcing the turn-taking
//! invariants as the authoritative side. Session issuance, heartbeat
//! supervision, the idle sweep, and the collaborator interfaces
//! (ContentGuard, MemoryStore) live here too.

pub mod guard;
pub mod heartbeat;
pub mod memory;
pub mod relay;
pub mod session;
pub mod state;

pub use guard::{ContentGuard, GuardVerdict, KeywordGuard, PlaceholderGuard};
pub use heartbeat::{HeartbeatAction, HeartbeatSupervisor};
pub use memory::{InMemoryStore, MemoryError, MemoryStore, SledMemoryStore};
pub use relay::{ConnStats, RelayCore, RelayOutput};
pub use session::{SessionIssuer, SessionRequest, SessionResponse};
pub use state::AppState;
