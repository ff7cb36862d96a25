//! streamscribe - Real-time transcription orchestration
//!
//! Feeds a batch-oriented speech-to-text engine from a continuous audio
//! stream: slices the stream into bounded buffers, gates slices through an
//! optional voice activity detector, serializes engine calls, bounds
//! memory over long sessions, and reports results and statistics through
//! callbacks. The engine, detector, audio source and recording sink are
//! injected capabilities; this crate only coordinates them.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod clock;
pub mod defaults;
pub mod error;
pub mod slice;
pub mod stt;
pub mod transcriber;
pub mod vad;

pub use audio::sink::{AudioSink, MockAudioSink, WavFileSink};
pub use audio::stream::{
    AudioStream, AudioStreamConfig, MockAudioStream, MockStreamHandle, StreamEvent,
};
pub use audio::wav_stream::WavFileStream;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StreamscribeError};
pub use slice::{AudioSlice, MemoryUsage, SliceInfo, SliceManager, SliceMeta};
pub use stt::engine::{
    MockSpeechEngine, SpeechEngine, TranscribeOptions, TranscribeResult, TranscriptSegment,
};
pub use transcriber::{
    AutoSliceOptions, RealtimeTranscriber, StatsEvent, StatsEventKind, StatsSnapshot,
    TranscribeEvent, TranscribeEventKind, TranscriberCallbacks, TranscriberDependencies,
    TranscriberOptions, TranscriptionRecord,
};
pub use vad::gate::{VadEvent, VadEventKind, VadGate};
pub use vad::{MockSpeechDetector, SpeechDetector, SpeechSegment, VadOptions, VadPreset};
