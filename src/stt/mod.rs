//! Speech-to-text capability boundary.

pub mod engine;

pub use engine::{
    MockSpeechEngine, SpeechEngine, TranscribeOptions, TranscribeResult, TranscriptSegment,
};
