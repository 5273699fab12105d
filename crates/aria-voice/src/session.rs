//! The client voice loop: mic → transport, transport → playback, with the
//! barge-in kill-switch.
//!
//! Speech onset during active playback stops local playback immediately
//! (well under the upstream cancel round trip) and then sends the cancel.
//! The select is biased toward the microphone side so an interrupt always
//! takes priority over enqueueing more reply audio. Run this on a
//! dedicated thread or current-thread runtime: the mic and playback
//! handles are not `Send`.

use crate::audio::{AudioConfig, FrameEncoder, MicSession};
use crate::error::{VoiceError, VoiceResult};
use crate::playback::PlaybackQueue;
use crate::transport::{TransportEvent, TransportHandle, TransportSession};
use crate::vad::{VadConfig, VadDetector, VadEvent};
use aria_core::protocol::{
    bytes_to_samples, samples_to_bytes, ClientEvent, Role, ServerEvent, TranscriptEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Optional callback when user speech interrupts reply playback.
pub type OnInterruption = Option<Arc<dyn Fn() + Send + Sync>>;

/// What the loop reports outward. Rendering is someone else's job.
#[derive(Debug, Clone)]
pub enum ClientNotice {
    /// A transcript update. Partials supersede the prior partial with the
    /// same id; a terminal event closes the utterance.
    Transcript(TranscriptEvent),
    /// ContentGuard side channel.
    Flagged(Vec<String>),
}

/// Configuration for one voice loop run.
#[derive(Debug, Clone, Default)]
pub struct VoiceLoopConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
}

/// Assembles reply text deltas into transcript events for one utterance at
/// a time.
struct TranscriptAssembler {
    reply_seq: u64,
    user_seq: u64,
    reply_text: String,
}

impl TranscriptAssembler {
    fn new() -> Self {
        Self {
            reply_seq: 0,
            user_seq: 0,
            reply_text: String::new(),
        }
    }

    fn reply_delta(&mut self, delta: &str) -> TranscriptEvent {
        self.reply_text.push_str(delta);
        TranscriptEvent {
            id: format!("reply-{}", self.reply_seq),
            text: self.reply_text.clone(),
            partial: true,
            role: Role::Assistant,
        }
    }

    fn reply_done(&mut self, output_text: String) -> TranscriptEvent {
        let text = if output_text.is_empty() {
            std::mem::take(&mut self.reply_text)
        } else {
            self.reply_text.clear();
            output_text
        };
        let event = TranscriptEvent {
            id: format!("reply-{}", self.reply_seq),
            text,
            partial: false,
            role: Role::Assistant,
        };
        self.reply_seq += 1;
        event
    }

    fn user_done(&mut self, transcript: String) -> TranscriptEvent {
        let event = TranscriptEvent {
            id: format!("utterance-{}", self.user_seq),
            text: transcript,
            partial: false,
            role: Role::User,
        };
        self.user_seq += 1;
        event
    }
}

/// Runs the voice loop until the transport closes or a terminal error.
///
/// Owns the microphone session and interrupts playback on every exit path,
/// so audio handles are released however the loop ends.
pub async fn run_voice_loop<F>(
    transport: TransportSession,
    mut mic_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    mic: MicSession,
    playback: &mut PlaybackQueue,
    config: VoiceLoopConfig,
    on_notice: F,
    on_interruption: OnInterruption,
) -> VoiceResult<()>
where
    F: Fn(ClientNotice),
{
    let _mic = mic;
    let (mut handle, mut events) = transport.split();
    let mut encoder = FrameEncoder::new(config.audio.frame_samples);
    let mut vad = VadDetector::new(config.vad);
    let mut transcripts = TranscriptAssembler::new();
    // Armed by `response.created`, cleared on completion or cancel; reply
    // audio arriving outside that window is a cancelled reply's tail and is
    // dropped.
    let mut reply_active = false;

    info!(target: "aria::client", "voice loop started");

    let result = loop {
        tokio::select! {
            // Mic side first: the interrupt must win over any pending enqueue.
            biased;

            chunk = mic_rx.recv() => match chunk {
                Some(chunk) => {
                    let sent = forward_mic_chunk(
                        &chunk,
                        &mut encoder,
                        &mut vad,
                        &handle,
                        playback,
                        &mut reply_active,
                        &on_interruption,
                    );
                    if let Err(e) = sent {
                        break Err(e);
                    }
                }
                None => break Err(VoiceError::AudioStream("capture ended".to_string())),
            },

            event = events.recv() => match event {
                Some(TransportEvent::Event(server_event)) => match server_event {
                    ServerEvent::ResponseCreated => {
                        reply_active = true;
                    }
                    ServerEvent::AudioDelta { delta } => {
                        if reply_active {
                            playback.enqueue(&bytes_to_samples(&delta));
                        }
                    }
                    ServerEvent::OutputTextDelta { delta } => {
                        on_notice(ClientNotice::Transcript(transcripts.reply_delta(&delta)));
                    }
                    ServerEvent::ResponseCompleted { output_text } => {
                        reply_active = false;
                        on_notice(ClientNotice::Transcript(transcripts.reply_done(output_text)));
                    }
                    ServerEvent::TranscriptionCompleted { transcript } => {
                        on_notice(ClientNotice::Transcript(transcripts.user_done(transcript)));
                    }
                    ServerEvent::ModerationFlagged { flags } => {
                        on_notice(ClientNotice::Flagged(flags));
                    }
                    // The relay consumes upstream VAD; nothing to do here.
                    ServerEvent::SpeechStarted | ServerEvent::SpeechStopped => {}
                    ServerEvent::SessionExpired => break Err(VoiceError::SessionExpired),
                    ServerEvent::Error { message } => {
                        warn!(target: "aria::client", "relay error: {}", message);
                    }
                },
                Some(TransportEvent::Closed { error: None }) | None => break Ok(()),
                Some(TransportEvent::Closed { error: Some(e) }) => break Err(e),
            },
        }
    };

    // Release audio on every exit path: the mic session drops with this
    // frame, playback is silenced here.
    playback.interrupt();
    handle.close();
    result
}

/// Frame, gate, and forward one capture chunk; fires barge-in when speech
/// onset lands during playback.
#[allow(clippy::too_many_arguments)]
fn forward_mic_chunk(
    chunk: &[f32],
    encoder: &mut FrameEncoder,
    vad: &mut VadDetector,
    transport: &TransportHandle,
    playback: &mut PlaybackQueue,
    reply_active: &mut bool,
    on_interruption: &OnInterruption,
) -> VoiceResult<()> {
    for frame in encoder.push(chunk) {
        if let Some(event) = vad.push_frame(&frame) {
            match event {
                VadEvent::SpeechStarted => {
                    if playback.is_playing() {
                        playback.interrupt();
                        *reply_active = false;
                        transport.send(ClientEvent::ResponseCancel)?;
                        info!(target: "aria::client", "barge-in: playback stopped, cancel sent");
                        if let Some(cb) = on_interruption {
                            cb();
                        }
                    }
                    transport.send(ClientEvent::SpeechStarted)?;
                }
                VadEvent::SpeechStopped => {
                    transport.send(ClientEvent::SpeechStopped)?;
                    transport.send(ClientEvent::InputAudioCommit)?;
                }
            }
        }
        // Quiet frames outside a speech segment stay local.
        if !vad.frame_droppable(&frame) {
            transport.send(ClientEvent::InputAudioAppend {
                audio: samples_to_bytes(&frame),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partials_supersede_then_terminal_closes() {
        let mut asm = TranscriptAssembler::new();

        let p1 = asm.reply_delta("Hel");
        let p2 = asm.reply_delta("lo");
        assert_eq!(p1.id, p2.id);
        assert!(p2.partial);
        assert_eq!(p2.text, "Hello");

        let done = asm.reply_done(String::new());
        assert_eq!(done.id, p2.id);
        assert!(!done.partial);
        assert_eq!(done.text, "Hello");

        // Next reply gets a fresh id.
        let next = asm.reply_delta("again");
        assert_ne!(next.id, done.id);
    }

    #[test]
    fn terminal_output_text_wins_over_accumulated_deltas() {
        let mut asm = TranscriptAssembler::new();
        asm.reply_delta("draft");
        let done = asm.reply_done("final text".into());
        assert_eq!(done.text, "final text");
    }

    #[test]
    fn user_utterances_are_terminal_and_numbered() {
        let mut asm = TranscriptAssembler::new();
        let a = asm.user_done("first".into());
        let b = asm.user_done("second".into());
        assert!(!a.partial);
        assert_eq!(a.role, Role::User);
        assert_ne!(a.id, b.id);
    }
}
