//! # Aria Voice — client-side audio pipeline
//!
//! Real-time capture, local VAD for barge-in, ordered reply playback with
//! an interruption kill-switch, and the duplex transport to the relay.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Voice Loop                          │
//! │  ┌───────────┐   ┌───────────┐   ┌───────────────────┐  │
//! │  │  Mic In   │──▶│ Amplitude │──▶│ TransportSession  │  │
//! │  │  (cpal)   │   │    VAD    │   │ (one duplex WS)   │  │
//! │  └───────────┘   └───────────┘   └───────────────────┘  │
//! │        ▼                                    │            │
//! │  ┌───────────┐        kill signal           │            │
//! │  │ Playback  │◀────────────────────────────-┘            │
//! │  │  (rodio)  │     (barge-in interrupt)                  │
//! │  └───────────┘                                           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Turn-taking authority lives in the relay; the local detector exists so a
//! barge-in cuts playback in well under 100 ms instead of waiting out the
//! upstream cancel round trip.

pub mod audio;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;
pub mod vad;

pub use audio::{frame_peak, AudioConfig, FrameEncoder, MicCapture, MicSession};
pub use error::{VoiceError, VoiceResult};
pub use playback::{AudioSink, PlaybackQueue, RodioSink};
pub use session::{run_voice_loop, ClientNotice, OnInterruption, VoiceLoopConfig};
pub use transport::{
    should_reconnect, TransportConfig, TransportEvent, TransportHandle, TransportSession,
};
pub use vad::{VadConfig, VadDetector, VadEvent};
