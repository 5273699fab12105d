//! Microphone capture and PCM16 framing.
//!
//! Captures 24 kHz mono via CPAL and packs the callback's f32 chunks into
//! fixed 960-sample (40 ms) PCM16 frames — the unit that travels the wire.
//! Frame boundaries are independent of whatever buffer sizes the device
//! callback happens to deliver.

use crate::error::{VoiceError, VoiceResult};
use aria_core::protocol::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration. Defaults match the wire format.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 24000, fixed by the wire format).
    pub sample_rate: u32,
    /// Number of channels (default: 1).
    pub channels: u16,
    /// Samples per emitted frame (default: 960 = 40ms at 24kHz).
    pub frame_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

/// Packs arbitrary f32 sample runs into fixed-size PCM16 frames.
///
/// Stateless apart from the carry buffer, so capture order in equals frame
/// order out.
#[derive(Debug)]
pub struct FrameEncoder {
    frame_samples: usize,
    carry: Vec<i16>,
}

impl FrameEncoder {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            carry: Vec::with_capacity(frame_samples),
        }
    }

    /// Convert and accumulate samples; returns every complete frame now
    /// available, in capture order.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<i16>> {
        let mut frames = Vec::new();
        for &s in samples {
            self.carry.push((s.clamp(-1.0, 1.0) * 32767.0) as i16);
            if self.carry.len() == self.frame_samples {
                frames.push(std::mem::replace(
                    &mut self.carry,
                    Vec::with_capacity(self.frame_samples),
                ));
            }
        }
        frames
    }

    /// Samples held back waiting for a full frame.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Peak absolute amplitude of a frame. Used by the silence gate and the VAD.
pub fn frame_peak(frame: &[i16]) -> i16 {
    frame
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0)
        .min(i16::MAX as u16) as i16
}

/// Microphone capture. One instance per connection; the returned stream
/// handle must stay alive for capture to continue and releases the device
/// when dropped.
pub struct MicCapture {
    config: AudioConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl MicCapture {
    pub fn new(config: AudioConfig) -> VoiceResult<Self> {
        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            VoiceError::MicrophonePermissionDenied("no input device available".to_string())
        })?;

        info!(
            target: "aria::audio",
            "using input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        // Probe the default config first so permission problems surface here
        // rather than mid-stream.
        let _ = device.default_input_config()?;

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start capturing. Raw f32 chunks flow to `chunk_tx` in capture order;
    /// framing happens on the consumer side so the realtime callback stays
    /// allocation-light.
    pub fn start(self, chunk_tx: mpsc::UnboundedSender<Vec<f32>>) -> VoiceResult<MicSession> {
        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if chunk_tx.send(data.to_vec()).is_err() {
                    // Receiver gone; the stream is about to be dropped.
                }
            },
            move |err| {
                warn!(target: "aria::audio", "input stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!(target: "aria::audio", "capture started ({}Hz mono)", self.config.sample_rate);

        Ok(MicSession { _stream: stream })
    }

    /// List available input devices (diagnostics).
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let mut names = Vec::new();
        for device in host.input_devices()? {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

/// Keeps the capture stream alive. Dropping it releases the microphone —
/// the scope-acquired handle the connection owns for its lifetime.
pub struct MicSession {
    _stream: Stream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_config_matches_wire_format() {
        let c = AudioConfig::default();
        assert_eq!(c.sample_rate, 24_000);
        assert_eq!(c.channels, 1);
        assert_eq!(c.frame_samples, 960);
    }

    #[test]
    fn encoder_reframes_across_chunk_boundaries() {
        let mut enc = FrameEncoder::new(4);
        assert!(enc.push(&[0.0, 0.1, 0.2]).is_empty());
        assert_eq!(enc.pending(), 3);

        let frames = enc.push(&[0.3, 0.4]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 4);
        assert_eq!(enc.pending(), 1);
    }

    #[test]
    fn encoder_preserves_capture_order() {
        let mut enc = FrameEncoder::new(2);
        let input: Vec<f32> = (0..6).map(|i| i as f32 / 32767.0).collect();
        let frames = enc.push(&input);
        let flat: Vec<i16> = frames.into_iter().flatten().collect();
        assert_eq!(flat, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn encoder_clamps_out_of_range_samples() {
        let mut enc = FrameEncoder::new(2);
        let frames = enc.push(&[2.0, -2.0]);
        assert_eq!(frames[0], vec![32767, -32767]);
    }

    #[test]
    fn peak_of_silence_is_zero() {
        assert_eq!(frame_peak(&[0, 0, 0]), 0);
        assert_eq!(frame_peak(&[10, -300, 20]), 300);
        assert_eq!(frame_peak(&[i16::MIN]), i16::MAX);
    }
}
