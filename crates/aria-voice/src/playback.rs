//! Reply playback and the interruption kill-switch.
//!
//! Decoded PCM16 buffers are appended in arrival order and played
//! sequentially. `interrupt()` stops the current sound and flushes
//! everything queued; it is callable at any time and idempotent. Queue
//! bookkeeping lives behind a small sink trait so ordering and interrupt
//! semantics are testable without an output device.

use crate::error::{VoiceError, VoiceResult};
use aria_core::protocol::SAMPLE_RATE;
use tracing::{debug, info};

/// Where queued samples actually go. `RodioSink` in production; a recording
/// fake in tests. Not `Send`: rodio's output stream is tied to the thread
/// that opened it, so the queue lives with the voice loop.
pub trait AudioSink {
    fn append_pcm(&mut self, samples: &[i16]);
    fn stop(&mut self);
    fn is_empty(&self) -> bool;
}

/// Default-output-device sink.
pub struct RodioSink {
    _stream: rodio::OutputStream,
    _handle: rodio::OutputStreamHandle,
    sink: rodio::Sink,
}

impl RodioSink {
    /// Acquire the default output device. The handle is scope-acquired for
    /// one connection and released on drop.
    pub fn new() -> VoiceResult<Self> {
        let (stream, handle) =
            rodio::OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
        let sink =
            rodio::Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        info!(target: "aria::playback", "output sink ready");
        Ok(Self {
            _stream: stream,
            _handle: handle,
            sink,
        })
    }
}

impl AudioSink for RodioSink {
    fn append_pcm(&mut self, samples: &[i16]) {
        let buf = rodio::buffer::SamplesBuffer::new(1, SAMPLE_RATE, samples.to_vec());
        self.sink.append(buf);
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn is_empty(&self) -> bool {
        self.sink.empty()
    }
}

/// Ordered playback queue with an idempotent interrupt.
pub struct PlaybackQueue {
    sink: Box<dyn AudioSink>,
    buffers_enqueued: u64,
    interrupts: u64,
}

impl PlaybackQueue {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            buffers_enqueued: 0,
            interrupts: 0,
        }
    }

    /// Open the default output device.
    pub fn with_default_output() -> VoiceResult<Self> {
        Ok(Self::new(Box::new(RodioSink::new()?)))
    }

    /// Append one decoded buffer. Buffers play in exactly the order they
    /// were enqueued.
    pub fn enqueue(&mut self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        self.sink.append_pcm(samples);
        self.buffers_enqueued += 1;
    }

    /// Stop current playback immediately and flush the queue. Safe to call
    /// at any time; calling it twice in a row equals calling it once.
    pub fn interrupt(&mut self) {
        self.sink.stop();
        self.interrupts += 1;
        debug!(target: "aria::playback", "playback interrupted and queue flushed");
    }

    pub fn is_playing(&self) -> bool {
        !self.sink.is_empty()
    }

    /// Total buffers accepted over the queue's lifetime (stats).
    pub fn buffers_enqueued(&self) -> u64 {
        self.buffers_enqueued
    }
}
