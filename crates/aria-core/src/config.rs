//! Relay configuration loaded from the environment.
//!
//! The gateway binary calls `dotenvy::dotenv()` before this, so a local
//! `.env` works the same as real environment variables.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | ARIA_UPSTREAM_API_KEY | — | Upstream credential. Required to issue sessions. |
//! | ARIA_UPSTREAM_URL | wss://api.openai.com/v1/realtime | Upstream realtime endpoint. |
//! | ARIA_SESSION_URL | https://api.openai.com/v1/realtime/sessions | Upstream credential-exchange endpoint. |
//! | ARIA_MODEL | gpt-4o-realtime-preview | Default model for new sessions. |
//! | ARIA_VOICE | alloy | Default voice for new sessions. |
//! | ARIA_MAX_SESSION_MINUTES | 30 | Hard session lifetime ceiling. |
//! | ARIA_MAX_CONNECTIONS | 64 | Concurrent connection capacity; excess rejected at accept. |
//! | ARIA_HEARTBEAT_SECS | 25 | Ping interval per leg; two misses force-close. |
//! | ARIA_IDLE_SWEEP_SECS | 300 | Close connections idle beyond this. |
//! | ARIA_BIND_ADDR | 127.0.0.1:8020 | Gateway listen address. |

use serde::{Deserialize, Serialize};

/// Everything the relay needs to run, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upstream credential. `None` means session issuance fails with a
    /// configuration error; the server still boots so health checks work.
    pub upstream_api_key: Option<String>,
    pub upstream_url: String,
    pub session_url: String,
    pub model: String,
    pub voice: String,
    pub max_session_minutes: u64,
    pub max_connections: usize,
    pub heartbeat_secs: u64,
    pub idle_sweep_secs: u64,
    pub bind_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_api_key: None,
            upstream_url: "wss://api.openai.com/v1/realtime".to_string(),
            session_url: "https://api.openai.com/v1/realtime/sessions".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "alloy".to_string(),
            max_session_minutes: 30,
            max_connections: 64,
            heartbeat_secs: 25,
            idle_sweep_secs: 300,
            bind_addr: "127.0.0.1:8020".to_string(),
        }
    }
}

impl RelayConfig {
    /// Resolve from environment. Unset or unparsable values fall back to
    /// defaults (see the module table); only the API key stays `None`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            upstream_api_key: env_opt("ARIA_UPSTREAM_API_KEY"),
            upstream_url: env_or("ARIA_UPSTREAM_URL", &d.upstream_url),
            session_url: env_or("ARIA_SESSION_URL", &d.session_url),
            model: env_or("ARIA_MODEL", &d.model),
            voice: env_or("ARIA_VOICE", &d.voice),
            max_session_minutes: env_parsed("ARIA_MAX_SESSION_MINUTES", d.max_session_minutes),
            max_connections: env_parsed("ARIA_MAX_CONNECTIONS", d.max_connections),
            heartbeat_secs: env_parsed("ARIA_HEARTBEAT_SECS", d.heartbeat_secs),
            idle_sweep_secs: env_parsed("ARIA_IDLE_SWEEP_SECS", d.idle_sweep_secs),
            bind_addr: env_or("ARIA_BIND_ADDR", &d.bind_addr),
        }
    }

    pub fn max_session_seconds(&self) -> u64 {
        self.max_session_minutes * 60
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(v) => parse_or(&v, default),
        None => default,
    }
}

fn parse_or<T: std::str::FromStr + Copy>(value: &str, default: T) -> T {
    value.trim().parse().unwrap_or(default)
}
