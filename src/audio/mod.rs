//! Audio capture and recording boundaries.

pub mod sink;
pub mod stream;
pub mod wav_stream;

pub use sink::{AudioSink, MockAudioSink, WavFileSink};
pub use stream::{AudioStream, AudioStreamConfig, MockAudioStream, StreamEvent};
pub use wav_stream::WavFileStream;
