//! Session audio recording sink.
//!
//! When configured, the transcriber tees every captured chunk into a sink
//! so the full session can be replayed later. Sink failures never stop a
//! session; they are reported through the error callback.

use crate::audio::stream::AudioStreamConfig;
use crate::error::{Result, StreamscribeError};
use async_trait::async_trait;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Destination for the raw audio of a capture session.
#[async_trait]
pub trait AudioSink: Send {
    /// Prepares the sink for a new session.
    async fn initialize(&mut self, config: &AudioStreamConfig) -> Result<()>;

    /// Appends a chunk of PCM bytes.
    async fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Completes the recording and makes it durable.
    async fn finalize(&mut self) -> Result<()>;

    /// Discards the recording.
    async fn cancel(&mut self) -> Result<()>;
}

/// Sink that writes a session to a WAV file.
pub struct WavFileSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<std::fs::File>>>,
}

impl WavFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn initialize(&mut self, config: &AudioStreamConfig) -> Result<()> {
        let spec = hound::WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: config.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        };
        let writer =
            hound::WavWriter::create(&self.path, spec).map_err(|e| StreamscribeError::AudioSink {
                message: format!("Failed to create WAV file: {}", e),
            })?;
        self.writer = Some(writer);
        Ok(())
    }

    async fn append(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StreamscribeError::AudioSink {
                message: "WAV sink not initialized".to_string(),
            })?;
        for pair in data.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| StreamscribeError::AudioSink {
                    message: format!("Failed to write WAV sample: {}", e),
                })?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| StreamscribeError::AudioSink {
                    message: format!("Failed to finalize WAV file: {}", e),
                })?;
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        if self.writer.take().is_some() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// What happened to a [`MockAudioSink`] by the end of a test.
#[derive(Debug, Clone, Default)]
pub struct SinkRecording {
    pub data: Vec<u8>,
    pub initialized: bool,
    pub finalized: bool,
    pub cancelled: bool,
}

/// Mock sink for testing. The recording is shared so tests keep access
/// after handing the sink to the transcriber.
pub struct MockAudioSink {
    recording: Arc<Mutex<SinkRecording>>,
    should_fail_append: bool,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self {
            recording: Arc::new(Mutex::new(SinkRecording::default())),
            should_fail_append: false,
        }
    }

    /// Configures the mock to fail on every append.
    pub fn with_append_failure(mut self) -> Self {
        self.should_fail_append = true;
        self
    }

    /// Returns a shared view of everything written to the sink.
    pub fn recording(&self) -> Arc<Mutex<SinkRecording>> {
        self.recording.clone()
    }
}

impl Default for MockAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for MockAudioSink {
    async fn initialize(&mut self, _config: &AudioStreamConfig) -> Result<()> {
        let mut rec = self.recording.lock().unwrap_or_else(|e| e.into_inner());
        rec.initialized = true;
        Ok(())
    }

    async fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.should_fail_append {
            return Err(StreamscribeError::AudioSink {
                message: "mock append failure".to_string(),
            });
        }
        let mut rec = self.recording.lock().unwrap_or_else(|e| e.into_inner());
        rec.data.extend_from_slice(data);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        let mut rec = self.recording.lock().unwrap_or_else(|e| e.into_inner());
        rec.finalized = true;
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        let mut rec = self.recording.lock().unwrap_or_else(|e| e.into_inner());
        rec.data.clear();
        rec.cancelled = true;
        Ok(())
    }
}
