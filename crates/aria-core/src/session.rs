//! Session record issued by the gateway's credential exchange.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A short-lived upstream session. Immutable after issue except for the
/// expiry check; destroyed on expiry or when its owning connection closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    /// Ephemeral upstream token. Single-use per connection; never logged in
    /// full — use [`Session::redacted_token`].
    pub upstream_token: String,
    pub model: String,
    pub voice: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Hard ceiling on session lifetime, independent of activity.
    pub max_duration_seconds: u64,
}

impl Session {
    pub fn new(upstream_token: String, model: String, voice: String, max_duration_seconds: u64) -> Self {
        let created_at = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            upstream_token,
            model,
            voice,
            created_at,
            expires_at: created_at + Duration::seconds(max_duration_seconds as i64),
            max_duration_seconds,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds until the hard deadline, zero if already past.
    pub fn remaining_seconds(&self) -> u64 {
        (self.expires_at - Utc::now()).num_seconds().max(0) as u64
    }

    /// Token prefix safe for logs.
    pub fn redacted_token(&self) -> String {
        redact_token(&self.upstream_token)
    }
}

/// Keep the first few characters so operators can correlate, drop the rest.
pub fn redact_token(token: &str) -> String {
    let visible = token.chars().take(6).collect::<String>();
    format!("{}…", visible)
}
