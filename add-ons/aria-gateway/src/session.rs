//! Session issuance: exchange the server credential for a short-lived
//! upstream token.
//!
//! `POST /session {model?, voice?}` → `{session_id, token, expires_at,
//! model, voice}`. The ephemeral token means the client never holds the
//! long-lived API key. Tokens are single-use per connection and appear in
//! logs only as a redacted prefix.

use crate::state::AppState;
use aria_core::error::{CoreError, CoreResult};
use aria_core::session::{redact_token, Session};
use aria_core::RelayConfig;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Body of `POST /session`. Absent fields fall back to configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRequest {
    pub model: Option<String>,
    pub voice: Option<String>,
}

/// What the client gets back and later presents at the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub model: String,
    pub voice: String,
}

/// Upstream credential-exchange response. Tolerant: different upstreams
/// nest the secret differently.
#[derive(Debug, Deserialize)]
struct UpstreamSessionResponse {
    #[serde(default)]
    client_secret: Option<UpstreamClientSecret>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamClientSecret {
    value: String,
}

/// Exchanges server credentials for ephemeral upstream session tokens.
pub struct SessionIssuer {
    http: reqwest::Client,
    config: RelayConfig,
}

impl SessionIssuer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Issue one session. `ConfigurationError` when the server credential
    /// is absent (checked before any network I/O); `UpstreamUnavailable`
    /// when the exchange fails.
    pub async fn create_session(
        &self,
        model: Option<String>,
        voice: Option<String>,
    ) -> CoreResult<Session> {
        let api_key = self.config.upstream_api_key.as_deref().ok_or_else(|| {
            CoreError::Configuration("ARIA_UPSTREAM_API_KEY is not set".to_string())
        })?;

        let model = model.unwrap_or_else(|| self.config.model.clone());
        let voice = voice.unwrap_or_else(|| self.config.voice.clone());

        let response = self
            .http
            .post(&self.config.session_url)
            .timeout(Duration::from_secs(15))
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "model": model, "voice": voice }))
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable {
                message: e.to_string(),
                retry_after: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::UpstreamUnavailable {
                message: format!("credential exchange returned {}: {}", status, body),
                retry_after,
            });
        }

        let parsed: UpstreamSessionResponse =
            response
                .json()
                .await
                .map_err(|e| CoreError::UpstreamUnavailable {
                    message: format!("credential exchange response unreadable: {}", e),
                    retry_after: None,
                })?;

        let token = parsed
            .client_secret
            .map(|s| s.value)
            .or(parsed.token)
            .ok_or_else(|| CoreError::UpstreamUnavailable {
                message: "credential exchange response carried no token".to_string(),
                retry_after: None,
            })?;

        let session = Session::new(token, model, voice, self.config.max_session_seconds());
        info!(
            target: "aria::session",
            session_id = %session.session_id,
            token = %redact_token(&session.upstream_token),
            expires_at = %session.expires_at,
            "session issued"
        );
        Ok(session)
    }
}

/// `POST /session` handler: issue and register one session.
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .issuer
        .create_session(request.model, request.voice)
        .await?;

    let response = SessionResponse {
        session_id: session.session_id,
        token: session.upstream_token.clone(),
        expires_at: session.expires_at,
        model: session.model.clone(),
        voice: session.voice.clone(),
    };
    state.sessions.insert(session.session_id, session);
    Ok(Json(response))
}

/// HTTP-facing error wrapper around the core taxonomy.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self.0 {
            CoreError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            CoreError::UpstreamUnavailable { retry_after, .. } => {
                (StatusCode::BAD_GATEWAY, *retry_after)
            }
            CoreError::SessionExpired => (StatusCode::GONE, None),
            _ => (StatusCode::BAD_REQUEST, None),
        };
        warn!(target: "aria::session", status = %status, "request failed: {}", self.0);

        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let Some(secs) = retry_after {
            body["retry_after"] = secs.into();
        }
        (status, Json(body)).into_response()
    }
}
