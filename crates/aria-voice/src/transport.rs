//! Duplex channel to the relay.
//!
//! Owns exactly one WebSocket per connection. The socket lives in a
//! supervisor task; callers hold a sender for outbound [`ClientEvent`]s and
//! a receiver of inbound [`TransportEvent`]s, so sending and receiving
//! never contend for the socket. On an unexpected close the supervisor
//! attempts exactly one reconnect after a fixed backoff, provided the
//! session has not expired; otherwise a terminal event surfaces upward.

use crate::error::{VoiceError, VoiceResult};
use aria_core::protocol::{ClientEvent, ServerEvent};
use aria_core::session::Session;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Relay WebSocket URL including session query parameters.
    pub url: String,
    /// Backoff before the single automatic reconnect (default: 2s).
    pub reconnect_backoff: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_backoff: Duration::from_secs(2),
        }
    }
}

/// What the supervisor hands the client loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// A parsed inbound message.
    Event(ServerEvent),
    /// The channel is gone for good. `error` is `None` on a clean,
    /// caller-initiated close.
    Closed { error: Option<VoiceError> },
}

/// Reconnect policy: exactly one automatic attempt, and only while the
/// session is still valid.
pub fn should_reconnect(already_attempted: bool, session_expired: bool) -> bool {
    !already_attempted && !session_expired
}

/// Outbound half: cheap to hand around, independent of the event receiver
/// so a select over inbound events can still send.
pub struct TransportHandle {
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl TransportHandle {
    /// Queue one outbound event. Ordering is preserved: frames go out in
    /// the order they were sent here.
    pub fn send(&self, event: ClientEvent) -> VoiceResult<()> {
        match &self.outbound {
            Some(tx) => tx
                .send(event)
                .map_err(|e| VoiceError::ChannelSend(e.to_string())),
            None => Err(VoiceError::TransportClosed("already closed".to_string())),
        }
    }

    /// Initiate a clean close: the supervisor sends a close frame and ends.
    pub fn close(&mut self) {
        // Dropping the outbound sender is the close signal the supervisor
        // watches for.
        self.outbound = None;
    }
}

/// One duplex channel per connection: `send`, `next_event`, `close`.
pub struct TransportSession {
    handle: TransportHandle,
    events: mpsc::Receiver<TransportEvent>,
}

impl TransportSession {
    /// Dial the relay and start the supervisor task. Fails fast if the
    /// initial handshake does not complete.
    pub async fn connect(config: TransportConfig, session: Session) -> VoiceResult<Self> {
        let ws = dial(&config.url).await?;
        info!(target: "aria::transport", url = %config.url, "transport connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(64);

        tokio::spawn(supervise(ws, config, session, outbound_rx, events_tx));

        Ok(Self {
            handle: TransportHandle {
                outbound: Some(outbound_tx),
            },
            events: events_rx,
        })
    }

    /// See [`TransportHandle::send`].
    pub fn send(&self, event: ClientEvent) -> VoiceResult<()> {
        self.handle.send(event)
    }

    /// Receive the next inbound event. `None` after a `Closed` has been
    /// delivered and the supervisor has gone away.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// See [`TransportHandle::close`].
    pub fn close(&mut self) {
        self.handle.close()
    }

    /// Split into the outbound handle and the inbound event stream, so a
    /// select over events can send without a second borrow of `self`.
    pub fn split(self) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        (self.handle, self.events)
    }
}

async fn dial(url: &str) -> VoiceResult<WsStream> {
    let (ws, _response) = connect_async(url).await?;
    Ok(ws)
}

async fn supervise(
    ws: WsStream,
    config: TransportConfig,
    session: Session,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    events_tx: mpsc::Sender<TransportEvent>,
) {
    let (mut sink, mut source) = ws.split();
    let mut reconnect_attempted = false;

    loop {
        tokio::select! {
            out = outbound_rx.recv() => match out {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!(target: "aria::transport", "outbound serialize failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        warn!(target: "aria::transport", "send failed: {}", e);
                        match try_reconnect(&config, &session, &mut reconnect_attempted).await {
                            Some(ws) => (sink, source) = ws.split(),
                            None => {
                                deliver_terminal(&events_tx, &session, e.into()).await;
                                return;
                            }
                        }
                    }
                }
                // Caller dropped the handle: clean close.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = events_tx.send(TransportEvent::Closed { error: None }).await;
                    return;
                }
            },

            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if events_tx.send(TransportEvent::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        // Connection-scoped: log and keep the pump alive.
                        Err(e) => {
                            warn!(target: "aria::transport", "unparseable inbound message: {}", e)
                        }
                    }
                }
                // Pings are answered by tungstenite on read; nothing to do.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!(target: "aria::transport", "transport closed by peer");
                    match try_reconnect(&config, &session, &mut reconnect_attempted).await {
                        Some(ws) => (sink, source) = ws.split(),
                        None => {
                            let error = VoiceError::TransportClosed("closed by peer".to_string());
                            deliver_terminal(&events_tx, &session, error).await;
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(target: "aria::transport", "transport error: {}", e);
                    match try_reconnect(&config, &session, &mut reconnect_attempted).await {
                        Some(ws) => (sink, source) = ws.split(),
                        None => {
                            deliver_terminal(&events_tx, &session, e.into()).await;
                            return;
                        }
                    }
                }
            },
        }
    }
}

/// One attempt, fixed backoff, gated on session expiry. Returns the fresh
/// socket or `None` when the policy says give up.
async fn try_reconnect(
    config: &TransportConfig,
    session: &Session,
    attempted: &mut bool,
) -> Option<WsStream> {
    if !should_reconnect(*attempted, session.is_expired()) {
        return None;
    }
    *attempted = true;

    info!(
        target: "aria::transport",
        backoff_ms = config.reconnect_backoff.as_millis() as u64,
        "attempting single reconnect"
    );
    tokio::time::sleep(config.reconnect_backoff).await;

    if session.is_expired() {
        return None;
    }
    match dial(&config.url).await {
        Ok(ws) => {
            info!(target: "aria::transport", "reconnect succeeded");
            Some(ws)
        }
        Err(e) => {
            warn!(target: "aria::transport", "reconnect failed: {}", e);
            None
        }
    }
}

async fn deliver_terminal(
    events_tx: &mpsc::Sender<TransportEvent>,
    session: &Session,
    error: VoiceError,
) {
    let error = if session.is_expired() {
        VoiceError::SessionExpired
    } else {
        error
    };
    let _ = events_tx
        .send(TransportEvent::Closed { error: Some(error) })
        .await;
}
