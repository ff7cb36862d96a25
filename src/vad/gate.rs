//! Speech/silence state machine over per-slice detection results.
//!
//! The gate carries one `speech | silence` state across all slices of a
//! session so consecutive slices produce meaningful transitions:
//!
//! | prior state | speech? | emitted event   |
//! |-------------|---------|-----------------|
//! | silence     | true    | speech_start    |
//! | speech      | true    | speech_continue |
//! | speech      | false   | speech_end      |
//! | silence     | false   | silence         |

use crate::vad::SpeechSegment;
use serde::Serialize;
use std::time::Duration;

/// Transition emitted for one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VadEventKind {
    SpeechStart,
    SpeechContinue,
    SpeechEnd,
    Silence,
}

impl VadEventKind {
    /// True for speech_start and speech_continue.
    pub fn is_speech(self) -> bool {
        matches!(self, VadEventKind::SpeechStart | VadEventKind::SpeechContinue)
    }
}

/// Per-slice VAD classification. Transient; not persisted beyond the
/// decision it informs (and the transcribe event it is attached to).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VadEvent {
    pub kind: VadEventKind,
    /// Fraction of the slice covered by detected speech, clamped to [0, 1].
    pub confidence: f32,
    /// Session-absolute end of the most recent speech segment, if any was
    /// seen in this slice.
    pub last_speech_time: Option<Duration>,
    /// Audio duration of the classified slice.
    pub duration: Duration,
    pub slice_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Speech,
    Silence,
}

/// Session-wide speech/silence state machine.
///
/// Segment boundaries from the detector are relative to the slice they
/// were detected in; the gate accumulates classified audio into a session
/// offset so detections in different slices compare on one timeline.
pub struct VadGate {
    state: GateState,
    /// Total audio classified so far; start offset of the next slice.
    session_offset: Duration,
    /// Session-absolute end of the last recorded speech detection.
    last_speech_time: Option<Duration>,
}

impl VadGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Silence,
            session_offset: Duration::ZERO,
            last_speech_time: None,
        }
    }

    /// Classifies a slice from detector segments.
    ///
    /// `min_speech` is the orchestrator's minimum speech duration: a
    /// detection whose session-absolute end has not advanced past the
    /// previously recorded one by at least this much is a stale repeat and
    /// is downgraded to the corresponding non-speech transition with
    /// confidence 0.
    pub fn classify_detection(
        &mut self,
        segments: &[SpeechSegment],
        audio_duration: Duration,
        threshold: f32,
        min_speech: Duration,
        slice_index: u64,
    ) -> VadEvent {
        let total: Duration = segments.iter().map(SpeechSegment::len).sum();
        let mut confidence = if audio_duration.is_zero() || total.is_zero() {
            0.0
        } else {
            (total.as_secs_f32() / audio_duration.as_secs_f32()).min(1.0)
        };
        let detected_end = segments.last().map(|s| self.session_offset + s.end);
        self.session_offset += audio_duration;

        let mut is_speech = confidence > threshold;

        let kind = if is_speech {
            let repeat = match (detected_end, self.last_speech_time) {
                (Some(end), Some(prev)) => end <= prev || end - prev < min_speech,
                _ => false,
            };
            self.last_speech_time = detected_end;

            if repeat {
                // No new speech since the last detection.
                is_speech = false;
                confidence = 0.0;
                self.falling_edge()
            } else {
                self.rising_edge()
            }
        } else {
            self.falling_edge()
        };

        self.state = if is_speech {
            GateState::Speech
        } else {
            GateState::Silence
        };

        VadEvent {
            kind,
            confidence,
            last_speech_time: detected_end,
            duration: audio_duration,
            slice_index,
        }
    }

    /// Classifies a slice when no detector is configured: a no-VAD session
    /// is modeled as continuous speech.
    pub fn classify_absent(&mut self, audio_duration: Duration, slice_index: u64) -> VadEvent {
        let kind = self.rising_edge();
        self.state = GateState::Speech;
        self.session_offset += audio_duration;
        VadEvent {
            kind,
            confidence: 1.0,
            last_speech_time: None,
            duration: audio_duration,
            slice_index,
        }
    }

    /// Classifies a slice after a detector failure: degrade to silence with
    /// confidence 0. Failures never abort the session.
    pub fn classify_failure(&mut self, audio_duration: Duration, slice_index: u64) -> VadEvent {
        self.state = GateState::Silence;
        self.session_offset += audio_duration;
        VadEvent {
            kind: VadEventKind::Silence,
            confidence: 0.0,
            last_speech_time: None,
            duration: audio_duration,
            slice_index,
        }
    }

    fn rising_edge(&self) -> VadEventKind {
        match self.state {
            GateState::Silence => VadEventKind::SpeechStart,
            GateState::Speech => VadEventKind::SpeechContinue,
        }
    }

    fn falling_edge(&self) -> VadEventKind {
        match self.state {
            GateState::Speech => VadEventKind::SpeechEnd,
            GateState::Silence => VadEventKind::Silence,
        }
    }

    /// Returns the gate to the silence state with no detection history.
    pub fn reset(&mut self) {
        self.state = GateState::Silence;
        self.session_offset = Duration::ZERO;
        self.last_speech_time = None;
    }
}

impl Default for VadGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLICE: Duration = Duration::from_secs(2);
    const MIN_SPEECH: Duration = Duration::from_secs(1);

    fn full_speech(end: Duration) -> Vec<SpeechSegment> {
        vec![SpeechSegment::new(Duration::ZERO, end)]
    }

    fn classify(gate: &mut VadGate, segments: &[SpeechSegment], index: u64) -> VadEvent {
        gate.classify_detection(segments, SLICE, 0.5, MIN_SPEECH, index)
    }

    // The four-row transition table, exhaustively.

    #[test]
    fn test_silence_then_speech_is_speech_start() {
        let mut gate = VadGate::new();
        let event = classify(&mut gate, &full_speech(SLICE), 0);
        assert_eq!(event.kind, VadEventKind::SpeechStart);
        assert!((event.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_speech_then_speech_is_speech_continue() {
        let mut gate = VadGate::new();
        classify(&mut gate, &full_speech(SLICE), 0);
        // Identical slice-relative segments are distinct detections on the
        // session timeline.
        let event = classify(&mut gate, &full_speech(SLICE), 1);
        assert_eq!(event.kind, VadEventKind::SpeechContinue);
        assert_eq!(event.last_speech_time, Some(SLICE * 2));
    }

    #[test]
    fn test_speech_then_silence_is_speech_end() {
        let mut gate = VadGate::new();
        classify(&mut gate, &full_speech(SLICE), 0);
        let event = classify(&mut gate, &[], 1);
        assert_eq!(event.kind, VadEventKind::SpeechEnd);
        assert_eq!(event.confidence, 0.0);
    }

    #[test]
    fn test_silence_then_silence_is_silence() {
        let mut gate = VadGate::new();
        classify(&mut gate, &[], 0);
        let event = classify(&mut gate, &[], 1);
        assert_eq!(event.kind, VadEventKind::Silence);
    }

    #[test]
    fn test_confidence_is_speech_fraction() {
        let mut gate = VadGate::new();
        // 0.5s of speech in a 2s slice = 0.25 confidence, below threshold.
        let segments = vec![SpeechSegment::new(
            Duration::ZERO,
            Duration::from_millis(500),
        )];
        let event = classify(&mut gate, &segments, 0);
        assert!((event.confidence - 0.25).abs() < 0.001);
        assert_eq!(event.kind, VadEventKind::Silence);
    }

    #[test]
    fn test_confidence_clamped_to_one() {
        let mut gate = VadGate::new();
        let segments = full_speech(SLICE * 3);
        let event = classify(&mut gate, &segments, 0);
        assert_eq!(event.confidence, 1.0);
    }

    #[test]
    fn test_stale_detection_downgrades_to_speech_end() {
        // With a minimum speech duration longer than a slice, a full-slice
        // detection cannot advance far enough past the previous one.
        let long_min = SLICE + Duration::from_secs(1);
        let mut gate = VadGate::new();
        gate.classify_detection(&full_speech(SLICE), SLICE, 0.5, long_min, 0);
        let event = gate.classify_detection(&full_speech(SLICE), SLICE, 0.5, long_min, 1);
        assert_eq!(event.kind, VadEventKind::SpeechEnd);
        assert_eq!(event.confidence, 0.0);
    }

    #[test]
    fn test_stale_detection_downgrades_to_silence_from_silence() {
        let long_min = SLICE + Duration::from_secs(1);
        let mut gate = VadGate::new();
        gate.classify_detection(&full_speech(SLICE), SLICE, 0.5, long_min, 0);
        // Downgraded, state = silence.
        gate.classify_detection(&full_speech(SLICE), SLICE, 0.5, long_min, 1);
        let event = gate.classify_detection(&full_speech(SLICE), SLICE, 0.5, long_min, 2);
        assert_eq!(event.kind, VadEventKind::Silence);
    }

    #[test]
    fn test_advancing_detection_is_not_a_repeat() {
        let mut gate = VadGate::new();
        classify(&mut gate, &full_speech(SLICE), 0);
        // Each full slice advances the timeline by a whole slice, well past
        // the minimum speech duration.
        let event = classify(&mut gate, &full_speech(SLICE), 1);
        assert_eq!(event.kind, VadEventKind::SpeechContinue);
        let event = classify(&mut gate, &full_speech(SLICE), 2);
        assert_eq!(event.kind, VadEventKind::SpeechContinue);
    }

    #[test]
    fn test_no_detector_session_is_continuous_speech() {
        let mut gate = VadGate::new();
        let first = gate.classify_absent(SLICE, 0);
        assert_eq!(first.kind, VadEventKind::SpeechStart);
        assert_eq!(first.confidence, 1.0);

        let second = gate.classify_absent(SLICE, 1);
        assert_eq!(second.kind, VadEventKind::SpeechContinue);
        let third = gate.classify_absent(SLICE, 2);
        assert_eq!(third.kind, VadEventKind::SpeechContinue);
    }

    #[test]
    fn test_failure_degrades_to_silence() {
        let mut gate = VadGate::new();
        classify(&mut gate, &full_speech(SLICE), 0);
        let event = gate.classify_failure(SLICE, 1);
        assert_eq!(event.kind, VadEventKind::Silence);
        assert_eq!(event.confidence, 0.0);
        // State degraded: next speech is a fresh start.
        let next = classify(&mut gate, &full_speech(SLICE * 3), 2);
        assert_eq!(next.kind, VadEventKind::SpeechStart);
    }

    #[test]
    fn test_reset_clears_state_and_history() {
        let mut gate = VadGate::new();
        classify(&mut gate, &full_speech(SLICE), 0);
        gate.reset();
        // Back in the silence state with the session timeline rewound.
        let event = classify(&mut gate, &full_speech(SLICE), 1);
        assert_eq!(event.kind, VadEventKind::SpeechStart);
        assert_eq!(event.last_speech_time, Some(SLICE));
    }

    #[test]
    fn test_is_speech_helper() {
        assert!(VadEventKind::SpeechStart.is_speech());
        assert!(VadEventKind::SpeechContinue.is_speech());
        assert!(!VadEventKind::SpeechEnd.is_speech());
        assert!(!VadEventKind::Silence.is_speech());
    }
}
