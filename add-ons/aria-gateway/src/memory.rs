//! MemoryStore — fire-and-forget conversation persistence.
//!
//! Sled long-term storage with a DashMap hot cache for the most recent
//! entry per connection. The relay invokes `save_message` off the pump
//! (spawned), so a slow disk never stalls audio forwarding.

use aria_core::protocol::Role;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_STORE_PATH: &str = "./data/aria_messages";

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One persisted utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedMessage {
    pub connection: Uuid,
    pub role: Role,
    pub text: String,
    pub meta: serde_json::Value,
    pub saved_at: chrono::DateTime<Utc>,
}

/// Collaborator interface consumed by the relay. Synchronous ack-or-error;
/// callers are expected to invoke it fire-and-forget.
pub trait MemoryStore: Send + Sync {
    fn save_message(
        &self,
        connection: Uuid,
        role: Role,
        text: &str,
        meta: serde_json::Value,
    ) -> Result<(), MemoryError>;
}

/// Sled-backed store with a hot cache of each connection's latest message.
pub struct SledMemoryStore {
    db: sled::Db,
    /// connection id -> latest message, checked before sled on reads.
    cache: DashMap<Uuid, SavedMessage>,
    seq: AtomicU64,
}

impl SledMemoryStore {
    /// Opens or creates the store at `./data/aria_messages`.
    pub fn new() -> Result<Self, MemoryError> {
        Self::open_path(DEFAULT_STORE_PATH)
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, MemoryError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            cache: DashMap::new(),
            seq: AtomicU64::new(0),
        })
    }

    /// Latest message saved for a connection, from the hot cache.
    pub fn latest(&self, connection: &Uuid) -> Option<SavedMessage> {
        self.cache.get(connection).map(|m| m.value().clone())
    }
}

impl MemoryStore for SledMemoryStore {
    fn save_message(
        &self,
        connection: Uuid,
        role: Role,
        text: &str,
        meta: serde_json::Value,
    ) -> Result<(), MemoryError> {
        let message = SavedMessage {
            connection,
            role,
            text: text.to_string(),
            meta,
            saved_at: Utc::now(),
        };
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}:{:020}", connection, seq);
        self.db.insert(key.as_bytes(), serde_json::to_vec(&message)?)?;
        self.cache.insert(connection, message);
        Ok(())
    }
}

/// In-memory store for tests and credential-less local runs.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<SavedMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SavedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl MemoryStore for InMemoryStore {
    fn save_message(
        &self,
        connection: Uuid,
        role: Role,
        text: &str,
        meta: serde_json::Value,
    ) -> Result<(), MemoryError> {
        self.messages.lock().unwrap().push(SavedMessage {
            connection,
            role,
            text: text.to_string(),
            meta,
            saved_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_records_in_order() {
        let store = InMemoryStore::new();
        let conn = Uuid::new_v4();
        store
            .save_message(conn, Role::User, "hello", serde_json::json!({}))
            .unwrap();
        store
            .save_message(conn, Role::Assistant, "hi there", serde_json::json!({}))
            .unwrap();

        let msgs = store.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].text, "hi there");
    }

    #[test]
    fn sled_store_round_trips_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledMemoryStore::open_path(dir.path()).unwrap();
        let conn = Uuid::new_v4();

        store
            .save_message(conn, Role::User, "first", serde_json::json!({"n": 1}))
            .unwrap();
        store
            .save_message(conn, Role::User, "second", serde_json::json!({"n": 2}))
            .unwrap();

        let latest = store.latest(&conn).unwrap();
        assert_eq!(latest.text, "second");
        assert_eq!(latest.meta["n"], 2);
    }
}
