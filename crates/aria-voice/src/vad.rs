//! Local voice activity detection: amplitude threshold with debounce.
//!
//! This detector exists to trigger barge-in and to mark utterance
//! boundaries; it is not the authority on turn-taking (the relay is). Peak
//! amplitude per 40 ms frame, an onset count to reject clicks, and a
//! hangover count so mid-sentence pauses do not end the segment.

use crate::audio::frame_peak;

/// Configuration for the amplitude detector.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Peak amplitude at or above this counts as a speech frame
    /// (default: 1500 ≈ -27 dBFS).
    pub threshold: i16,
    /// Consecutive speech frames before onset fires (default: 2 = 80ms).
    pub onset_frames: u32,
    /// Consecutive silent frames before the segment closes (default: 15 = 600ms).
    pub hangover_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 1500,
            onset_frames: 2,
            hangover_frames: 15,
        }
    }
}

/// Boundary events. Emitted at most once per segment edge; never dropped,
/// whatever the silence gate does with the frames around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Silence,
    /// Loud frames seen, onset not yet confirmed.
    Onset(u32),
    Speech,
    /// Quiet frames seen inside a segment, stop not yet confirmed.
    Hangover(u32),
}

/// Amplitude-threshold voice activity detector.
#[derive(Debug)]
pub struct VadDetector {
    config: VadConfig,
    phase: Phase,
}

impl VadDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            phase: Phase::Silence,
        }
    }

    /// Feed one frame; returns a boundary event when one fires.
    pub fn push_frame(&mut self, frame: &[i16]) -> Option<VadEvent> {
        let loud = frame_peak(frame) >= self.config.threshold;
        match (self.phase, loud) {
            (Phase::Silence, true) => {
                if self.config.onset_frames <= 1 {
                    self.phase = Phase::Speech;
                    Some(VadEvent::SpeechStarted)
                } else {
                    self.phase = Phase::Onset(1);
                    None
                }
            }
            (Phase::Silence, false) => None,

            (Phase::Onset(n), true) => {
                if n + 1 >= self.config.onset_frames {
                    self.phase = Phase::Speech;
                    Some(VadEvent::SpeechStarted)
                } else {
                    self.phase = Phase::Onset(n + 1);
                    None
                }
            }
            // A click, not speech.
            (Phase::Onset(_), false) => {
                self.phase = Phase::Silence;
                None
            }

            (Phase::Speech, true) => None,
            (Phase::Speech, false) => {
                if self.config.hangover_frames <= 1 {
                    self.phase = Phase::Silence;
                    Some(VadEvent::SpeechStopped)
                } else {
                    self.phase = Phase::Hangover(1);
                    None
                }
            }

            // Speech resumed inside the hangover window.
            (Phase::Hangover(_), true) => {
                self.phase = Phase::Speech;
                None
            }
            (Phase::Hangover(n), false) => {
                if n + 1 >= self.config.hangover_frames {
                    self.phase = Phase::Silence;
                    Some(VadEvent::SpeechStopped)
                } else {
                    self.phase = Phase::Hangover(n + 1);
                    None
                }
            }
        }
    }

    /// Whether a speech segment is currently open (onset fired, stop not
    /// yet). Frames are never dropped by the silence gate while this holds.
    pub fn segment_open(&self) -> bool {
        matches!(self.phase, Phase::Speech | Phase::Hangover(_))
    }

    /// Silence-gate decision for an encoded frame: droppable only when no
    /// segment is open and the frame is below the threshold.
    pub fn frame_droppable(&self, frame: &[i16]) -> bool {
        !self.segment_open() && frame_peak(frame) < self.config.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> Vec<i16> {
        vec![4000; 8]
    }

    fn quiet() -> Vec<i16> {
        vec![50; 8]
    }

    fn detector() -> VadDetector {
        VadDetector::new(VadConfig {
            threshold: 1500,
            onset_frames: 2,
            hangover_frames: 3,
        })
    }

    #[test]
    fn onset_needs_consecutive_loud_frames() {
        let mut vad = detector();
        assert_eq!(vad.push_frame(&loud()), None);
        assert_eq!(vad.push_frame(&loud()), Some(VadEvent::SpeechStarted));
        assert!(vad.segment_open());
    }

    #[test]
    fn single_click_does_not_open_a_segment() {
        let mut vad = detector();
        assert_eq!(vad.push_frame(&loud()), None);
        assert_eq!(vad.push_frame(&quiet()), None);
        assert!(!vad.segment_open());
        // Needs a full onset run again.
        assert_eq!(vad.push_frame(&loud()), None);
    }

    #[test]
    fn stop_fires_after_hangover() {
        let mut vad = detector();
        vad.push_frame(&loud());
        vad.push_frame(&loud());

        assert_eq!(vad.push_frame(&quiet()), None);
        assert_eq!(vad.push_frame(&quiet()), None);
        assert_eq!(vad.push_frame(&quiet()), Some(VadEvent::SpeechStopped));
        assert!(!vad.segment_open());
    }

    #[test]
    fn pause_shorter_than_hangover_keeps_segment_open() {
        let mut vad = detector();
        vad.push_frame(&loud());
        vad.push_frame(&loud());

        vad.push_frame(&quiet());
        vad.push_frame(&loud());
        assert!(vad.segment_open());
    }

    #[test]
    fn boundary_events_fire_exactly_once_per_edge() {
        let mut vad = detector();
        let mut starts = 0;
        let mut stops = 0;
        let frames: Vec<Vec<i16>> = [
            quiet(), loud(), loud(), loud(), quiet(), quiet(), quiet(), quiet(),
        ]
        .to_vec();
        for f in &frames {
            match vad.push_frame(f) {
                Some(VadEvent::SpeechStarted) => starts += 1,
                Some(VadEvent::SpeechStopped) => stops += 1,
                None => {}
            }
        }
        assert_eq!((starts, stops), (1, 1));
    }

    #[test]
    fn quiet_frames_droppable_only_outside_segments() {
        let mut vad = detector();
        assert!(vad.frame_droppable(&quiet()));
        // Loud frames are never droppable, even before onset confirms.
        assert!(!vad.frame_droppable(&loud()));

        vad.push_frame(&loud());
        vad.push_frame(&loud());
        // Inside a segment nothing is droppable.
        assert!(!vad.frame_droppable(&quiet()));
    }
}
