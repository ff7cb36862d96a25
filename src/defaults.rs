//! Default configuration constants for streamscribe.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16000;

/// Default channel count (mono).
pub const CHANNELS: u16 = 1;

/// Bytes per sample for 16-bit PCM audio.
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Default bits per sample.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Default capture buffer size in bytes requested from the audio stream.
pub const STREAM_BUFFER_SIZE: usize = 16 * 1024;

/// Default target duration of one audio slice.
///
/// 30 seconds matches the window most batch speech engines are tuned for.
pub const SLICE_DURATION: Duration = Duration::from_secs(30);

/// Default minimum amount of speech worth sending to the engine.
///
/// Slices shorter than this are skipped; engine startup cost dominates
/// anything below about a second of audio.
pub const MIN_SPEECH_DURATION: Duration = Duration::from_secs(1);

/// Default number of slices retained in memory before FIFO eviction.
pub const MAX_SLICES_IN_MEMORY: usize = 3;

/// Fraction of slice capacity at which a slice is considered ready.
///
/// Reporting at 80% rather than 100% lets transcription start while the
/// tail of the slice is still filling.
pub const SLICE_READY_FRACTION: f64 = 0.8;

/// Default VAD speech-probability threshold (0.0 to 1.0).
pub const VAD_THRESHOLD: f32 = 0.5;

/// Default auto-slice threshold as a fraction of the slice target duration.
///
/// A speech_end/silence event forces an early boundary once the current
/// slice has covered at least this fraction of the target duration.
pub const AUTO_SLICE_THRESHOLD: f32 = 0.5;

/// Accumulated audio is pushed through the slice manager once at least this
/// much is buffered. Keeps the per-chunk path cheap regardless of how small
/// the stream's delivery granularity is.
pub const ACCUMULATION_FLUSH: Duration = Duration::from_secs(1);

/// Absolute memory delta (MB) that always triggers a stats emission.
pub const STATS_MEMORY_DELTA_MB: f64 = 5.0;

/// Relative memory delta that always triggers a stats emission.
pub const STATS_MEMORY_DELTA_RATIO: f64 = 0.1;

/// Bytes per second of audio for a given stream format.
pub fn bytes_per_second(sample_rate: u32, channels: u16) -> usize {
    sample_rate as usize * channels as usize * BYTES_PER_SAMPLE as usize
}

/// Duration covered by `byte_len` bytes of PCM audio in the given format.
pub fn duration_of_bytes(byte_len: usize, sample_rate: u32, channels: u16) -> Duration {
    let bps = bytes_per_second(sample_rate, channels);
    if bps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(byte_len as f64 / bps as f64)
}
