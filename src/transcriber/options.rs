//! Transcriber configuration.

use crate::audio::stream::AudioStreamConfig;
use crate::defaults;
use crate::error::{Result, StreamscribeError};
use crate::stt::engine::TranscribeOptions;
use crate::vad::{VadOptions, VadPreset};
use serde::Serialize;
use std::time::Duration;

/// Early slice boundary policy, evaluated on speech_end/silence events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AutoSliceOptions {
    pub enabled: bool,
    /// Fraction of the slice target duration that must have elapsed before
    /// a boundary is forced.
    pub threshold: f32,
}

impl Default for AutoSliceOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: defaults::AUTO_SLICE_THRESHOLD,
        }
    }
}

/// Full configuration of a [`RealtimeTranscriber`](crate::transcriber::RealtimeTranscriber).
///
/// Every recognized option is enumerated here with its default; validation
/// runs once at construction. VAD and auto-slice options can additionally
/// be updated mid-session.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriberOptions {
    /// Target duration of one slice.
    pub slice_duration: Duration,
    /// Minimum amount of audio worth transcribing.
    pub min_speech_duration: Duration,
    /// Number of slices retained before FIFO eviction.
    pub max_slices_in_memory: usize,
    /// Explicit VAD options; when None the preset (or the default preset)
    /// is expanded instead.
    pub vad: Option<VadOptions>,
    /// Named VAD preset used when no explicit options are set.
    pub vad_preset: Option<VadPreset>,
    pub auto_slice: AutoSliceOptions,
    /// Options forwarded to the speech engine with every call.
    pub transcribe: TranscribeOptions,
    /// Context prompt prepended to every engine call.
    pub initial_prompt: Option<String>,
    /// Carry prior slice results into later prompts.
    pub prompt_previous_slices: bool,
    /// Abandon an engine call after this long. None means wait forever.
    pub engine_timeout: Option<Duration>,
    pub stream: AudioStreamConfig,
}

impl Default for TranscriberOptions {
    fn default() -> Self {
        Self {
            slice_duration: defaults::SLICE_DURATION,
            min_speech_duration: defaults::MIN_SPEECH_DURATION,
            max_slices_in_memory: defaults::MAX_SLICES_IN_MEMORY,
            vad: None,
            vad_preset: None,
            auto_slice: AutoSliceOptions::default(),
            transcribe: TranscribeOptions::default(),
            initial_prompt: None,
            prompt_previous_slices: true,
            engine_timeout: None,
            stream: AudioStreamConfig::default(),
        }
    }
}

impl TranscriberOptions {
    /// The VAD options in effect: explicit options win over the preset.
    pub fn resolved_vad(&self) -> VadOptions {
        self.vad
            .clone()
            .unwrap_or_else(|| self.vad_preset.unwrap_or(VadPreset::Default).options())
    }

    /// Validates the configuration, rejecting values no session could run
    /// with.
    pub fn validate(&self) -> Result<()> {
        if self.slice_duration.is_zero() {
            return Err(invalid("slice_duration", "must be greater than zero"));
        }
        if self.max_slices_in_memory == 0 {
            return Err(invalid("max_slices_in_memory", "must be at least 1"));
        }
        let vad = self.resolved_vad();
        if !(0.0..=1.0).contains(&vad.threshold) {
            return Err(invalid("vad.threshold", "must be within 0.0 to 1.0"));
        }
        if !(0.0..=1.0).contains(&self.auto_slice.threshold) || self.auto_slice.threshold == 0.0 {
            return Err(invalid(
                "auto_slice.threshold",
                "must be within (0.0, 1.0]",
            ));
        }
        if self.stream.sample_rate == 0 {
            return Err(invalid("stream.sample_rate", "must be greater than zero"));
        }
        if self.stream.channels == 0 {
            return Err(invalid("stream.channels", "must be at least 1"));
        }
        if self.stream.bits_per_sample != 16 {
            return Err(invalid("stream.bits_per_sample", "only 16-bit PCM is supported"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> StreamscribeError {
    StreamscribeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(TranscriberOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_slice_duration_rejected() {
        let options = TranscriberOptions {
            slice_duration: Duration::ZERO,
            ..Default::default()
        };
        match options.validate() {
            Err(StreamscribeError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "slice_duration");
            }
            other => panic!("expected config error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_zero_max_slices_rejected() {
        let options = TranscriberOptions {
            max_slices_in_memory: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_out_of_range_vad_threshold_rejected() {
        let options = TranscriberOptions {
            vad: Some(VadOptions {
                threshold: 1.5,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_explicit_vad_options_win_over_preset() {
        let explicit = VadOptions {
            threshold: 0.42,
            ..Default::default()
        };
        let options = TranscriberOptions {
            vad: Some(explicit.clone()),
            vad_preset: Some(VadPreset::Noisy),
            ..Default::default()
        };
        assert_eq!(options.resolved_vad(), explicit);
    }

    #[test]
    fn test_preset_expands_when_no_explicit_options() {
        let options = TranscriberOptions {
            vad_preset: Some(VadPreset::Sensitive),
            ..Default::default()
        };
        assert_eq!(options.resolved_vad(), VadPreset::Sensitive.options());
    }

    #[test]
    fn test_auto_slice_zero_threshold_rejected() {
        let options = TranscriberOptions {
            auto_slice: AutoSliceOptions {
                enabled: true,
                threshold: 0.0,
            },
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
