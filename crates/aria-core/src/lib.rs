//! # Aria Core — shared protocol and turn-taking engine
//!
//! Types shared by the voice client (`aria-voice`) and the relay gateway
//! (`aria-gateway`): the duplex wire protocol, the PCM16 frame format, the
//! session record, the error taxonomy, and the authoritative
//! [`TurnMachine`].
//!
//! ```text
//! mic ──▶ encoder ──▶ transport ──▶ relay ──▶ upstream
//!                                    │
//!            playback ◀── transport ◀┘ (audio/text/control events)
//! ```
//!
//! The turn machine lives here because both sides reason about the same
//! `{Idle, Listening, Thinking, Speaking}` state; the relay's instance is
//! authoritative for reply de-duplication.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod turn;

pub use config::RelayConfig;
pub use error::{CoreError, CoreResult};
pub use protocol::{
    ClientEvent, Role, ServerEvent, TranscriptEvent, FRAME_BYTES, FRAME_MS, FRAME_SAMPLES,
    SAMPLE_RATE,
};
pub use session::Session;
pub use turn::{TurnAction, TurnInput, TurnMachine, TurnState};
