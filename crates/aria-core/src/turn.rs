//! Turn-taking state machine.
//!
//! One enumerated state plus a transition function, independently unit
//! testable from any transport. The relay's instance is authoritative: it
//! alone decides when a reply request goes upstream, so a buggy or
//! malicious client cannot issue duplicates. At most one reply is
//! outstanding per connection; a pending-reply flag gates emission and is
//! cleared on completion or cancellation.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Conversation state for one connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Nobody is speaking and no reply is in flight.
    Idle,
    /// The user is speaking.
    Listening,
    /// A reply was requested and the first payload has not arrived yet.
    Thinking,
    /// The reply is streaming/playing.
    Speaking,
}

/// Inputs the machine reacts to, regardless of which leg they arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnInput {
    /// VAD (either side) observed speech onset.
    SpeechStarted,
    /// VAD observed end of speech.
    SpeechStopped,
    /// An explicit `response.create` (client hint; deduplicated here).
    ReplyRequested,
    /// An explicit `response.cancel`.
    CancelRequested,
    /// First payload of the reply arrived.
    ReplyStarted,
    /// The reply finished streaming.
    ReplyCompleted,
    /// Fatal error or disconnect on either leg.
    Error,
}

/// Side effects the caller must carry out, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAction {
    /// Emit exactly one `response.create` upstream.
    RequestReply,
    /// Emit `response.cancel` upstream.
    CancelReply,
    /// Stop and flush local playback immediately (ahead of the upstream
    /// cancel round trip).
    StopPlayback,
}

/// The turn-taking engine. Pure state: no channels, no clocks, no I/O.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    state: TurnState,
    reply_pending: bool,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            reply_pending: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether a reply request is outstanding (requested but not yet
    /// completed or cancelled).
    pub fn reply_pending(&self) -> bool {
        self.reply_pending
    }

    /// Apply one input and return the actions to carry out, in order.
    pub fn apply(&mut self, input: TurnInput) -> Vec<TurnAction> {
        use TurnInput::*;
        use TurnState::*;

        match (self.state, input) {
            (Idle, SpeechStarted) => {
                self.state = Listening;
                vec![]
            }

            (Listening, SpeechStopped) => {
                self.state = Thinking;
                self.request_reply()
            }

            // Explicit client request: same gate as the VAD-driven path.
            (Idle | Listening, ReplyRequested) => {
                self.state = Thinking;
                self.request_reply()
            }
            (Thinking | Speaking, ReplyRequested) => {
                debug!(state = ?self.state, "duplicate reply request suppressed");
                vec![]
            }

            (Thinking, ReplyStarted) => {
                self.state = Speaking;
                vec![]
            }

            (Speaking, ReplyCompleted) => {
                self.state = Idle;
                self.reply_pending = false;
                vec![]
            }
            // A reply can complete (empty or cancelled upstream) before its
            // first payload ever arrived.
            (Thinking, ReplyCompleted) => {
                self.state = Idle;
                self.reply_pending = false;
                vec![]
            }

            // Barge-in: the user started talking over the reply. Local
            // playback stops first; the upstream cancel is best-effort and
            // eventual. The pending flag clears so the next completed
            // utterance may request a fresh reply.
            (Speaking, SpeechStarted) => {
                self.state = Listening;
                self.reply_pending = false;
                vec![TurnAction::StopPlayback, TurnAction::CancelReply]
            }

            (Speaking | Thinking, CancelRequested) => {
                self.state = Idle;
                self.reply_pending = false;
                vec![TurnAction::StopPlayback, TurnAction::CancelReply]
            }

            (_, Error) => {
                self.state = Idle;
                self.reply_pending = false;
                vec![]
            }

            (state, input) => {
                debug!(?state, ?input, "ignored turn input");
                vec![]
            }
        }
    }

    fn request_reply(&mut self) -> Vec<TurnAction> {
        if self.reply_pending {
            debug!("reply already pending; not re-requesting");
            return vec![];
        }
        self.reply_pending = true;
        vec![TurnAction::RequestReply]
    }
}
