//! ConnectionRelay — one per accepted client, bridging the client leg and
//! the upstream leg.
//!
//! Accept order: capacity gate → session claim (single-use) → expiry check
//! → upstream dial. An expired session never opens an upstream leg.
//!
//! The pump is a single select loop consuming one inbound channel per leg;
//! socket reader tasks feed the channels, so no handler ever touches shared
//! mutable state from two contexts. All protocol decisions live in
//! [`RelayCore`], which owns the authoritative [`TurnMachine`] and is
//! testable without any socket.

use crate::guard::ContentGuard;
use crate::heartbeat::{HeartbeatAction, HeartbeatSupervisor};
use crate::memory::MemoryStore;
use crate::state::{AppState, CloseReason, ConnectionEntry};
use aria_core::protocol::{ClientEvent, Role, ServerEvent};
use aria_core::session::Session;
use aria_core::turn::{TurnAction, TurnInput, TurnMachine, TurnState};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message as UpMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type UpstreamWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest a connection may sit in Thinking before the pending reply is
/// abandoned with an explicit error.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection counters, finalized (logged) on every exit path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub errors: u64,
}

/// Side effects the pump carries out for one inbound event, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutput {
    ToUpstream(ClientEvent),
    ToClient(ServerEvent),
    /// Hand a completed utterance to the MemoryStore, fire-and-forget.
    Save { role: Role, text: String },
}

/// Protocol brain of one connection: the authoritative turn machine plus
/// stats and the ContentGuard hook. No sockets, no clocks.
pub struct RelayCore {
    turn: TurnMachine,
    stats: ConnStats,
    guard: Arc<dyn ContentGuard>,
}

impl RelayCore {
    pub fn new(guard: Arc<dyn ContentGuard>) -> Self {
        Self {
            turn: TurnMachine::new(),
            stats: ConnStats::default(),
            guard,
        }
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.state()
    }

    pub fn reply_pending(&self) -> bool {
        self.turn.reply_pending()
    }

    pub fn stats(&self) -> ConnStats {
        self.stats
    }

    pub fn note_protocol_error(&mut self) {
        self.stats.errors += 1;
    }

    /// One inbound message from the client leg.
    pub fn on_client_event(&mut self, event: ClientEvent) -> Vec<RelayOutput> {
        let mut out = Vec::new();
        match event {
            ClientEvent::InputAudioAppend { audio } => {
                self.stats.frames_in += 1;
                self.stats.bytes_in += audio.len() as u64;
                out.push(RelayOutput::ToUpstream(ClientEvent::InputAudioAppend {
                    audio,
                }));
            }
            ClientEvent::InputAudioCommit => {
                out.push(RelayOutput::ToUpstream(ClientEvent::InputAudioCommit));
            }
            ClientEvent::SpeechStarted => {
                // Barge-in cancel (if any) goes upstream before the boundary.
                out.extend(map_actions(self.apply(TurnInput::SpeechStarted)));
                out.push(RelayOutput::ToUpstream(ClientEvent::SpeechStarted));
            }
            ClientEvent::SpeechStopped => {
                out.push(RelayOutput::ToUpstream(ClientEvent::SpeechStopped));
                out.extend(map_actions(self.apply(TurnInput::SpeechStopped)));
            }
            // The relay, not the client, decides whether a reply request
            // actually goes upstream.
            ClientEvent::ResponseCreate => {
                out.extend(map_actions(self.apply(TurnInput::ReplyRequested)));
            }
            ClientEvent::ResponseCancel => {
                out.extend(map_actions(self.apply(TurnInput::CancelRequested)));
            }
            ClientEvent::Error { message } => {
                warn!(target: "aria::relay", "client reported error: {}", message);
                self.stats.errors += 1;
            }
        }
        out
    }

    /// One inbound event from the upstream leg.
    pub fn on_upstream_event(&mut self, event: ServerEvent) -> Vec<RelayOutput> {
        let mut out = Vec::new();
        match event {
            ServerEvent::ResponseCreated => {
                out.push(RelayOutput::ToClient(ServerEvent::ResponseCreated));
            }
            ServerEvent::AudioDelta { delta } => {
                self.stats.frames_out += 1;
                self.stats.bytes_out += delta.len() as u64;
                self.note_reply_payload();
                out.push(RelayOutput::ToClient(ServerEvent::AudioDelta { delta }));
            }
            ServerEvent::OutputTextDelta { delta } => {
                self.note_reply_payload();
                out.push(RelayOutput::ToClient(ServerEvent::OutputTextDelta { delta }));
            }
            ServerEvent::ResponseCompleted { output_text } => {
                out.extend(map_actions(self.apply(TurnInput::ReplyCompleted)));
                out.push(RelayOutput::ToClient(ServerEvent::ResponseCompleted {
                    output_text: output_text.clone(),
                }));
                if !output_text.trim().is_empty() {
                    out.push(RelayOutput::Save {
                        role: Role::Assistant,
                        text: output_text,
                    });
                }
            }
            ServerEvent::TranscriptionCompleted { transcript } => {
                out.push(RelayOutput::ToClient(ServerEvent::TranscriptionCompleted {
                    transcript: transcript.clone(),
                }));
                // Synchronous by design; a flagged verdict adds the side
                // channel but never suppresses the reply.
                let verdict = self.guard.analyze(&transcript);
                if !verdict.safe {
                    out.push(RelayOutput::ToClient(ServerEvent::ModerationFlagged {
                        flags: verdict.flags,
                    }));
                }
                out.push(RelayOutput::Save {
                    role: Role::User,
                    text: transcript,
                });
            }
            // Upstream VAD keeps the machine honest even when the client's
            // detector missed a boundary. The client's own VAD remains the
            // low-latency playback kill path.
            ServerEvent::SpeechStarted => {
                out.extend(map_actions(self.apply(TurnInput::SpeechStarted)));
                out.push(RelayOutput::ToClient(ServerEvent::SpeechStarted));
            }
            ServerEvent::SpeechStopped => {
                out.push(RelayOutput::ToClient(ServerEvent::SpeechStopped));
                out.extend(map_actions(self.apply(TurnInput::SpeechStopped)));
            }
            ServerEvent::Error { message } => {
                self.stats.errors += 1;
                self.apply(TurnInput::Error);
                out.push(RelayOutput::ToClient(ServerEvent::Error { message }));
            }
            // Not something upstreams send; pass through if one ever does.
            other @ (ServerEvent::ModerationFlagged { .. } | ServerEvent::SessionExpired) => {
                out.push(RelayOutput::ToClient(other));
            }
        }
        out
    }

    fn apply(&mut self, input: TurnInput) -> Vec<TurnAction> {
        self.turn.apply(input)
    }

    /// First payload of a reply moves Thinking → Speaking.
    fn note_reply_payload(&mut self) {
        if self.turn.state() == TurnState::Thinking {
            self.turn.apply(TurnInput::ReplyStarted);
        }
    }

    /// A reply request produced no payload within the deadline: resolve to
    /// an explicit error instead of an indefinite "thinking" hang.
    pub fn on_reply_timeout(&mut self) -> Vec<RelayOutput> {
        self.stats.errors += 1;
        self.turn.apply(TurnInput::Error);
        vec![
            RelayOutput::ToUpstream(ClientEvent::ResponseCancel),
            RelayOutput::ToClient(ServerEvent::Error {
                message: "reply timed out".to_string(),
            }),
        ]
    }
}

/// Translate turn-machine actions into pump outputs.
fn map_actions(actions: Vec<TurnAction>) -> Vec<RelayOutput> {
    actions
        .into_iter()
        .filter_map(|action| match action {
            TurnAction::RequestReply => Some(RelayOutput::ToUpstream(ClientEvent::ResponseCreate)),
            TurnAction::CancelReply => Some(RelayOutput::ToUpstream(ClientEvent::ResponseCancel)),
            // Playback is client-local; its own VAD already cut it.
            TurnAction::StopPlayback => None,
        })
        .collect()
}

/// Query parameters of the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub session_id: Uuid,
    pub token: String,
}

/// Why an accept was refused. Always explicit, never silently queued.
#[derive(Debug, PartialEq, Eq)]
pub enum AcceptError {
    /// Concurrent-connection capacity reached.
    AtCapacity,
    /// Unknown session id or token mismatch (claims are single-use).
    InvalidSession,
    /// The session's deadline already passed.
    Expired,
}

impl IntoResponse for AcceptError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AcceptError::AtCapacity => (StatusCode::SERVICE_UNAVAILABLE, "at capacity"),
            AcceptError::InvalidSession => (StatusCode::FORBIDDEN, "invalid session"),
            AcceptError::Expired => (StatusCode::GONE, "session expired"),
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Accept-time validation: capacity, claim, expiry — in that order, all
/// before any upstream dial. On success the slot stays acquired and must
/// be released by the connection teardown.
pub fn validate_accept(state: &AppState, params: &WsParams) -> Result<Session, AcceptError> {
    if !state.try_acquire_slot() {
        return Err(AcceptError::AtCapacity);
    }

    let claimed = state
        .sessions
        .remove_if(&params.session_id, |_, s| s.upstream_token == params.token);
    let session = match claimed {
        Some((_, session)) => session,
        None => {
            state.release_slot();
            return Err(AcceptError::InvalidSession);
        }
    };

    if session.is_expired() {
        state.release_slot();
        return Err(AcceptError::Expired);
    }
    Ok(session)
}

/// `GET /session/ws` — upgrade into the relay.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match validate_accept(&state, &params) {
        Ok(session) => ws.on_upgrade(move |socket| run_connection(socket, session, state)),
        Err(e) => {
            warn!(target: "aria::relay", "accept rejected: {:?}", e);
            e.into_response()
        }
    }
}

/// What a leg reader hands the pump.
enum LegInbound<E> {
    Event(E),
    Malformed(String),
    Pong,
    Closed,
}

async fn read_client_leg(
    mut source: SplitStream<WebSocket>,
    tx: mpsc::Sender<LegInbound<ClientEvent>>,
) {
    while let Some(msg) = source.next().await {
        let inbound = match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                Ok(event) => LegInbound::Event(event),
                Err(e) => LegInbound::Malformed(e.to_string()),
            },
            // Binary framing variant: a raw PCM16 frame, same boundaries.
            Ok(WsMessage::Binary(audio)) => {
                LegInbound::Event(ClientEvent::InputAudioAppend { audio })
            }
            Ok(WsMessage::Pong(_)) => LegInbound::Pong,
            // axum answers pings on its own.
            Ok(WsMessage::Ping(_)) => continue,
            Ok(WsMessage::Close(_)) | Err(_) => LegInbound::Closed,
        };
        let closing = matches!(inbound, LegInbound::Closed);
        if tx.send(inbound).await.is_err() || closing {
            return;
        }
    }
    let _ = tx.send(LegInbound::Closed).await;
}

async fn read_upstream_leg(
    mut source: SplitStream<UpstreamWs>,
    tx: mpsc::Sender<LegInbound<ServerEvent>>,
) {
    while let Some(msg) = source.next().await {
        let inbound = match msg {
            Ok(UpMessage::Text(text)) => match serde_json::from_str(&text) {
                Ok(event) => LegInbound::Event(event),
                Err(e) => LegInbound::Malformed(e.to_string()),
            },
            Ok(UpMessage::Pong(_)) => LegInbound::Pong,
            Ok(UpMessage::Ping(_) | UpMessage::Binary(_) | UpMessage::Frame(_)) => continue,
            Ok(UpMessage::Close(_)) | Err(_) => LegInbound::Closed,
        };
        let closing = matches!(inbound, LegInbound::Closed);
        if tx.send(inbound).await.is_err() || closing {
            return;
        }
    }
    let _ = tx.send(LegInbound::Closed).await;
}

async fn dial_upstream(state: &AppState, session: &Session) -> Result<UpstreamWs, String> {
    let url = format!("{}?model={}", state.config.upstream_url, session.model);
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    let bearer = format!("Bearer {}", session.upstream_token)
        .parse()
        .map_err(|_| "token is not a valid header value".to_string())?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    match connect_async(request).await {
        Ok((ws, _)) => Ok(ws),
        Err(e) => Err(e.to_string()),
    }
}

/// Owns one connection from upgrade to teardown. Every exit path releases
/// the slot, removes the registry entry, and logs finalized stats.
pub async fn run_connection(socket: WebSocket, session: Session, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let last_activity = Arc::new(AtomicI64::new(Utc::now().timestamp()));
    let (close_tx, close_rx) = mpsc::channel(1);
    state.connections.insert(
        connection_id,
        ConnectionEntry {
            last_activity: Arc::clone(&last_activity),
            close_tx,
        },
    );
    info!(
        target: "aria::relay",
        connection = %connection_id,
        session = %session.session_id,
        "connection accepted"
    );

    let stats = drive_connection(socket, &session, &state, connection_id, last_activity, close_rx)
        .await;

    state.connections.remove(&connection_id);
    state.release_slot();
    info!(
        target: "aria::relay",
        connection = %connection_id,
        frames_in = stats.frames_in,
        frames_out = stats.frames_out,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        errors = stats.errors,
        "connection closed"
    );
}

async fn drive_connection(
    socket: WebSocket,
    session: &Session,
    state: &AppState,
    connection_id: Uuid,
    last_activity: Arc<AtomicI64>,
    mut close_rx: mpsc::Receiver<CloseReason>,
) -> ConnStats {
    let (mut client_sink, client_source) = socket.split();

    let upstream = match dial_upstream(state, session).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(target: "aria::relay", connection = %connection_id, "upstream dial failed: {}", e);
            let _ = send_client(
                &mut client_sink,
                &ServerEvent::Error {
                    message: "upstream unavailable".to_string(),
                },
            )
            .await;
            let _ = client_sink.close().await;
            return ConnStats {
                errors: 1,
                ..ConnStats::default()
            };
        }
    };
    let (mut upstream_sink, upstream_source) = upstream.split();

    let (client_tx, mut client_rx) = mpsc::channel(64);
    let (upstream_tx, mut upstream_rx) = mpsc::channel(64);
    let client_reader = tokio::spawn(read_client_leg(client_source, client_tx));
    let upstream_reader = tokio::spawn(read_upstream_leg(upstream_source, upstream_tx));

    let mut core = RelayCore::new(Arc::clone(&state.guard));
    let mut hb_client = HeartbeatSupervisor::new("client");
    let mut hb_upstream = HeartbeatSupervisor::new("upstream");
    let mut heartbeat = tokio::time::interval(Duration::from_secs(state.config.heartbeat_secs));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.reset(); // first tick after one full interval, not immediately

    // Hard deadline regardless of activity.
    let expiry = tokio::time::sleep(Duration::from_secs(session.remaining_seconds()));
    tokio::pin!(expiry);

    let touch = |last: &AtomicI64| last.store(Utc::now().timestamp(), Ordering::Relaxed);
    // When the machine entered Thinking; None otherwise.
    let mut thinking_since: Option<Instant> = None;

    loop {
        tokio::select! {
            Some(reason) = close_rx.recv() => {
                info!(target: "aria::relay", connection = %connection_id, ?reason, "externally closed");
                let _ = send_client(&mut client_sink, &ServerEvent::Error {
                    message: "connection closed: idle timeout".to_string(),
                }).await;
                break;
            }

            _ = &mut expiry => {
                info!(target: "aria::relay", connection = %connection_id, "session deadline reached");
                let _ = send_client(&mut client_sink, &ServerEvent::SessionExpired).await;
                break;
            }

            _ = heartbeat.tick() => {
                if thinking_since.is_some_and(|since| since.elapsed() >= REPLY_TIMEOUT) {
                    warn!(target: "aria::relay", connection = %connection_id, "pending reply timed out");
                    let outputs = core.on_reply_timeout();
                    let _ = dispatch(outputs, &mut client_sink, &mut upstream_sink, state, connection_id).await;
                    thinking_since = None;
                }
                match hb_client.on_tick() {
                    HeartbeatAction::Ping => {
                        let _ = client_sink.send(WsMessage::Ping(Vec::new())).await;
                    }
                    HeartbeatAction::ForceClose => {
                        warn!(target: "aria::relay", connection = %connection_id, "client leg dead");
                        break;
                    }
                }
                match hb_upstream.on_tick() {
                    HeartbeatAction::Ping => {
                        let _ = upstream_sink.send(UpMessage::Ping(Vec::new())).await;
                    }
                    HeartbeatAction::ForceClose => {
                        warn!(target: "aria::relay", connection = %connection_id, "upstream leg dead");
                        break;
                    }
                }
            }

            inbound = client_rx.recv() => match inbound {
                Some(LegInbound::Event(event)) => {
                    touch(&last_activity);
                    let outputs = core.on_client_event(event);
                    if dispatch(outputs, &mut client_sink, &mut upstream_sink, state, connection_id)
                        .await
                        .is_err()
                    {
                        break;
                    }
                    thinking_since = track_thinking(core.turn_state(), thinking_since);
                }
                Some(LegInbound::Malformed(e)) => {
                    debug!(target: "aria::relay", connection = %connection_id, "malformed client message: {}", e);
                    core.note_protocol_error();
                    let _ = send_client(&mut client_sink, &ServerEvent::Error {
                        message: format!("malformed message: {}", e),
                    }).await;
                }
                Some(LegInbound::Pong) => hb_client.on_pong(),
                Some(LegInbound::Closed) | None => {
                    debug!(target: "aria::relay", connection = %connection_id, "client leg closed");
                    break;
                }
            },

            inbound = upstream_rx.recv() => match inbound {
                Some(LegInbound::Event(event)) => {
                    touch(&last_activity);
                    let outputs = core.on_upstream_event(event);
                    if dispatch(outputs, &mut client_sink, &mut upstream_sink, state, connection_id)
                        .await
                        .is_err()
                    {
                        break;
                    }
                    thinking_since = track_thinking(core.turn_state(), thinking_since);
                }
                Some(LegInbound::Malformed(e)) => {
                    debug!(target: "aria::relay", connection = %connection_id, "malformed upstream message: {}", e);
                    core.note_protocol_error();
                }
                Some(LegInbound::Pong) => hb_upstream.on_pong(),
                Some(LegInbound::Closed) | None => {
                    debug!(target: "aria::relay", connection = %connection_id, "upstream leg closed");
                    break;
                }
            },
        }
    }

    // Cascade: closing one leg always closes the other.
    let _ = client_sink.close().await;
    let _ = upstream_sink.send(UpMessage::Close(None)).await;
    client_reader.abort();
    upstream_reader.abort();

    core.stats()
}

/// Keep the Thinking timer armed exactly while the machine is in Thinking.
fn track_thinking(state: TurnState, current: Option<Instant>) -> Option<Instant> {
    match (state, current) {
        (TurnState::Thinking, None) => Some(Instant::now()),
        (TurnState::Thinking, some) => some,
        (_, _) => None,
    }
}

async fn send_client(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}

async fn send_upstream(
    sink: &mut SplitSink<UpstreamWs, UpMessage>,
    event: &ClientEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(UpMessage::Text(json)).await.map_err(|_| ())
}

/// Carry out one event's outputs in order. A failed send means the leg is
/// gone; the caller tears the connection down.
async fn dispatch(
    outputs: Vec<RelayOutput>,
    client_sink: &mut SplitSink<WebSocket, WsMessage>,
    upstream_sink: &mut SplitSink<UpstreamWs, UpMessage>,
    state: &AppState,
    connection_id: Uuid,
) -> Result<(), ()> {
    for output in outputs {
        match output {
            RelayOutput::ToClient(event) => send_client(client_sink, &event).await?,
            RelayOutput::ToUpstream(event) => send_upstream(upstream_sink, &event).await?,
            RelayOutput::Save { role, text } => {
                let memory = Arc::clone(&state.memory);
                // Fire-and-forget: persistence never blocks the pump.
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = memory.save_message(
                        connection_id,
                        role,
                        &text,
                        serde_json::Value::Null,
                    ) {
                        warn!(target: "aria::relay", "save_message failed: {}", e);
                    }
                });
            }
        }
    }
    Ok(())
}

/// Periodic maintenance: drop expired unclaimed sessions and close
/// connections idle beyond the configured threshold. Runs independently of
/// heartbeats.
pub async fn run_sweeper(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        state.sweep_expired_sessions();

        let idle_cutoff = Utc::now().timestamp() - state.config.idle_sweep_secs as i64;
        for entry in state.connections.iter() {
            if entry.last_activity.load(Ordering::Relaxed) < idle_cutoff {
                let _ = entry.close_tx.try_send(CloseReason::Idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{KeywordGuard, PlaceholderGuard};

    fn core() -> RelayCore {
        RelayCore::new(Arc::new(PlaceholderGuard))
    }

    fn reply_creates(outputs: &[RelayOutput]) -> usize {
        outputs
            .iter()
            .filter(|o| **o == RelayOutput::ToUpstream(ClientEvent::ResponseCreate))
            .count()
    }

    #[test]
    fn scenario_a_one_utterance_one_reply_request() {
        let mut core = core();
        let mut outputs = Vec::new();

        outputs.extend(core.on_client_event(ClientEvent::SpeechStarted));
        for i in 0..3u8 {
            outputs.extend(core.on_client_event(ClientEvent::InputAudioAppend {
                audio: vec![i; 4],
            }));
        }
        outputs.extend(core.on_client_event(ClientEvent::SpeechStopped));

        assert_eq!(reply_creates(&outputs), 1);
        assert_eq!(core.turn_state(), TurnState::Thinking);
        assert_eq!(core.stats().frames_in, 3);
    }

    #[test]
    fn client_reply_requests_are_deduplicated() {
        let mut core = core();
        core.on_client_event(ClientEvent::SpeechStarted);
        let outputs = core.on_client_event(ClientEvent::SpeechStopped);
        assert_eq!(reply_creates(&outputs), 1);

        // A pushy client hammers response.create; nothing more goes out.
        for _ in 0..5 {
            let outputs = core.on_client_event(ClientEvent::ResponseCreate);
            assert_eq!(reply_creates(&outputs), 0);
        }
    }

    #[test]
    fn audio_frames_forward_upstream_in_capture_order() {
        let mut core = core();
        let mut forwarded = Vec::new();
        for i in 0..10u8 {
            for output in core.on_client_event(ClientEvent::InputAudioAppend {
                audio: vec![i; 2],
            }) {
                if let RelayOutput::ToUpstream(ClientEvent::InputAudioAppend { audio }) = output {
                    forwarded.push(audio[0]);
                }
            }
        }
        assert_eq!(forwarded, (0..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn scenario_b_barge_in_cancels_and_clears_pending() {
        let mut core = core();
        core.on_client_event(ClientEvent::SpeechStarted);
        core.on_client_event(ClientEvent::SpeechStopped);
        core.on_upstream_event(ServerEvent::AudioDelta { delta: vec![0; 4] });
        assert_eq!(core.turn_state(), TurnState::Speaking);

        let outputs = core.on_client_event(ClientEvent::SpeechStarted);
        assert!(outputs.contains(&RelayOutput::ToUpstream(ClientEvent::ResponseCancel)));
        assert_eq!(core.turn_state(), TurnState::Listening);
        assert!(!core.reply_pending());

        // Next completed utterance may request again.
        let outputs = core.on_client_event(ClientEvent::SpeechStopped);
        assert_eq!(reply_creates(&outputs), 1);
    }

    #[test]
    fn cancel_precedes_boundary_forward_on_barge_in() {
        let mut core = core();
        core.on_client_event(ClientEvent::SpeechStarted);
        core.on_client_event(ClientEvent::SpeechStopped);
        core.on_upstream_event(ServerEvent::OutputTextDelta { delta: "hi".into() });

        let outputs = core.on_client_event(ClientEvent::SpeechStarted);
        let cancel_pos = outputs
            .iter()
            .position(|o| *o == RelayOutput::ToUpstream(ClientEvent::ResponseCancel))
            .unwrap();
        let boundary_pos = outputs
            .iter()
            .position(|o| *o == RelayOutput::ToUpstream(ClientEvent::SpeechStarted))
            .unwrap();
        assert!(cancel_pos < boundary_pos);
    }

    #[test]
    fn flagged_transcript_adds_side_channel_but_keeps_reply() {
        let mut core = RelayCore::new(Arc::new(KeywordGuard::new(vec!["forbidden".into()])));
        let outputs =
            core.on_upstream_event(ServerEvent::TranscriptionCompleted {
                transcript: "something forbidden".into(),
            });

        // Transcript still forwarded, flag added, utterance saved.
        assert!(matches!(
            outputs[0],
            RelayOutput::ToClient(ServerEvent::TranscriptionCompleted { .. })
        ));
        assert!(outputs.iter().any(|o| matches!(
            o,
            RelayOutput::ToClient(ServerEvent::ModerationFlagged { .. })
        )));
        assert!(outputs.iter().any(|o| matches!(
            o,
            RelayOutput::Save { role: Role::User, .. }
        )));
    }

    #[test]
    fn completed_reply_is_saved_for_the_assistant() {
        let mut core = core();
        core.on_client_event(ClientEvent::SpeechStarted);
        core.on_client_event(ClientEvent::SpeechStopped);
        core.on_upstream_event(ServerEvent::AudioDelta { delta: vec![0; 2] });

        let outputs = core.on_upstream_event(ServerEvent::ResponseCompleted {
            output_text: "hello there".into(),
        });
        assert!(outputs.iter().any(|o| matches!(
            o,
            RelayOutput::Save { role: Role::Assistant, .. }
        )));
        assert_eq!(core.turn_state(), TurnState::Idle);
        assert!(!core.reply_pending());
    }

    #[test]
    fn upstream_vad_can_drive_the_machine_too() {
        let mut core = core();
        let outputs = core.on_upstream_event(ServerEvent::SpeechStarted);
        assert_eq!(core.turn_state(), TurnState::Listening);
        assert!(outputs.contains(&RelayOutput::ToClient(ServerEvent::SpeechStarted)));

        let outputs = core.on_upstream_event(ServerEvent::SpeechStopped);
        assert_eq!(reply_creates(&outputs), 1);

        // Client boundary arriving late does not double-request.
        let outputs = core.on_client_event(ClientEvent::SpeechStopped);
        assert_eq!(reply_creates(&outputs), 0);
    }

    #[test]
    fn reply_timeout_resolves_to_an_explicit_error() {
        let mut core = core();
        core.on_client_event(ClientEvent::SpeechStarted);
        core.on_client_event(ClientEvent::SpeechStopped);
        assert_eq!(core.turn_state(), TurnState::Thinking);

        let outputs = core.on_reply_timeout();
        assert!(outputs.contains(&RelayOutput::ToUpstream(ClientEvent::ResponseCancel)));
        assert!(outputs
            .iter()
            .any(|o| matches!(o, RelayOutput::ToClient(ServerEvent::Error { .. }))));
        assert_eq!(core.turn_state(), TurnState::Idle);
        assert!(!core.reply_pending());
    }

    #[test]
    fn upstream_error_resets_the_turn() {
        let mut core = core();
        core.on_client_event(ClientEvent::SpeechStarted);
        let outputs = core.on_upstream_event(ServerEvent::Error {
            message: "boom".into(),
        });
        assert_eq!(core.turn_state(), TurnState::Idle);
        assert!(matches!(
            outputs[0],
            RelayOutput::ToClient(ServerEvent::Error { .. })
        ));
        assert_eq!(core.stats().errors, 1);
    }
}
