//! Voice activity detection capability and slice gating.
//!
//! The detection algorithm itself is external: the core consumes an opaque
//! [`SpeechDetector`] that maps an audio buffer to speech segments. The
//! [`gate`] module turns raw segments into a speech/silence state machine
//! carried across slices.

pub mod gate;

use crate::defaults;
use crate::error::{Result, StreamscribeError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A time range within a slice judged to contain speech.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeechSegment {
    pub start: Duration,
    pub end: Duration,
}

impl SpeechSegment {
    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    /// Length of the segment, zero if the range is inverted.
    pub fn len(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len().is_zero()
    }
}

/// Options passed to the speech detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VadOptions {
    /// Speech probability threshold (0.0 to 1.0, lower = more sensitive).
    pub threshold: f32,
    /// Minimum duration for a region to count as speech.
    pub min_speech_duration: Duration,
    /// Minimum silence before a speech region is considered ended.
    pub min_silence_duration: Duration,
    /// Maximum continuous speech duration per region.
    pub max_speech_duration: Duration,
    /// Padding added around detected speech.
    pub speech_pad: Duration,
    /// Analysis window overlap (0.0 to 1.0).
    pub samples_overlap: f32,
}

impl Default for VadOptions {
    fn default() -> Self {
        VadPreset::Default.options()
    }
}

/// Pre-defined VAD configurations for different capture environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VadPreset {
    /// Balanced performance.
    Default,
    /// Good for quiet environments.
    Sensitive,
    /// Catches even quiet speech.
    VerySensitive,
    /// Avoids false positives.
    Conservative,
    /// Only clear speech.
    VeryConservative,
    /// Presentations and lectures (long segments).
    Continuous,
    /// Multiple speakers.
    Meeting,
    /// Strict thresholds for noisy environments.
    Noisy,
}

impl VadPreset {
    /// Expands the preset into a full option set.
    pub fn options(self) -> VadOptions {
        match self {
            VadPreset::Default => VadOptions {
                threshold: defaults::VAD_THRESHOLD,
                min_speech_duration: Duration::from_millis(250),
                min_silence_duration: Duration::from_millis(100),
                max_speech_duration: Duration::from_secs(30),
                speech_pad: Duration::from_millis(30),
                samples_overlap: 0.1,
            },
            VadPreset::Sensitive => VadOptions {
                threshold: 0.3,
                min_speech_duration: Duration::from_millis(100),
                min_silence_duration: Duration::from_millis(50),
                max_speech_duration: Duration::from_secs(15),
                speech_pad: Duration::from_millis(50),
                samples_overlap: 0.2,
            },
            VadPreset::VerySensitive => VadOptions {
                threshold: 0.2,
                min_speech_duration: Duration::from_millis(100),
                min_silence_duration: Duration::from_millis(50),
                max_speech_duration: Duration::from_secs(15),
                speech_pad: Duration::from_millis(100),
                samples_overlap: 0.3,
            },
            VadPreset::Conservative => VadOptions {
                threshold: 0.7,
                min_speech_duration: Duration::from_millis(500),
                min_silence_duration: Duration::from_millis(200),
                max_speech_duration: Duration::from_secs(25),
                speech_pad: Duration::from_millis(20),
                samples_overlap: 0.05,
            },
            VadPreset::VeryConservative => VadOptions {
                threshold: 0.8,
                min_speech_duration: Duration::from_millis(750),
                min_silence_duration: Duration::from_millis(300),
                max_speech_duration: Duration::from_secs(20),
                speech_pad: Duration::from_millis(10),
                samples_overlap: 0.05,
            },
            VadPreset::Continuous => VadOptions {
                threshold: 0.4,
                min_speech_duration: Duration::from_millis(200),
                min_silence_duration: Duration::from_millis(300),
                max_speech_duration: Duration::from_secs(60),
                speech_pad: Duration::from_millis(50),
                samples_overlap: 0.15,
            },
            VadPreset::Meeting => VadOptions {
                threshold: 0.45,
                min_speech_duration: Duration::from_millis(300),
                min_silence_duration: Duration::from_millis(150),
                max_speech_duration: Duration::from_secs(45),
                speech_pad: Duration::from_millis(75),
                samples_overlap: 0.2,
            },
            VadPreset::Noisy => VadOptions {
                threshold: 0.75,
                min_speech_duration: Duration::from_millis(400),
                min_silence_duration: Duration::from_millis(100),
                max_speech_duration: Duration::from_secs(25),
                speech_pad: Duration::from_millis(40),
                samples_overlap: 0.1,
            },
        }
    }
}

/// Trait for voice activity detection.
///
/// This trait allows swapping implementations (real VAD model vs mock).
#[async_trait]
pub trait SpeechDetector: Send + Sync {
    /// Detects speech segments in a 16-bit PCM audio buffer.
    async fn detect_speech(
        &self,
        audio: &[u8],
        options: &VadOptions,
    ) -> Result<Vec<SpeechSegment>>;
}

/// Mock speech detector for testing.
#[derive(Debug, Clone)]
pub struct MockSpeechDetector {
    segments: Vec<SpeechSegment>,
    should_fail: bool,
    calls: Arc<Mutex<usize>>,
}

impl MockSpeechDetector {
    /// Creates a detector that reports no speech.
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            should_fail: false,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Configures the segments returned for every detection.
    pub fn with_segments(mut self, segments: Vec<SpeechSegment>) -> Self {
        self.segments = segments;
        self
    }

    /// Configures a single segment spanning the given range.
    pub fn with_speech(self, start: Duration, end: Duration) -> Self {
        self.with_segments(vec![SpeechSegment::new(start, end)])
    }

    /// Configures the mock to fail on every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of detection calls made so far.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockSpeechDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechDetector for MockSpeechDetector {
    async fn detect_speech(
        &self,
        _audio: &[u8],
        _options: &VadOptions,
    ) -> Result<Vec<SpeechSegment>> {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.should_fail {
            Err(StreamscribeError::SpeechDetection {
                message: "mock detection failure".to_string(),
            })
        } else {
            Ok(self.segments.clone())
        }
    }
}
