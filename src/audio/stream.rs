//! Audio stream capability trait.
//!
//! The capture mechanism is external; the core consumes a push-based
//! producer that delivers PCM chunks at its own cadence, independent of
//! transcription progress. Delivery is an unbounded channel so a slow
//! consumer never exerts backpressure on capture.

use crate::defaults;
use crate::error::{Result, StreamscribeError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Capture configuration handed to the stream at initialization.
#[derive(Debug, Clone, Serialize)]
pub struct AudioStreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Preferred delivery granularity in bytes.
    pub buffer_size: usize,
    /// Platform-specific source selector (device name, source id).
    pub source: Option<String>,
}

impl Default for AudioStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            bits_per_sample: defaults::BITS_PER_SAMPLE,
            buffer_size: defaults::STREAM_BUFFER_SIZE,
            source: None,
        }
    }
}

/// Events pushed by an audio stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of captured PCM bytes.
    Data(Vec<u8>),
    /// A capture error. Non-fatal; the stream keeps running if it can.
    Error(String),
    /// Recording status changed.
    Status(bool),
}

/// Trait for push-based audio producers.
///
/// This trait allows swapping implementations (real capture vs file
/// simulation vs mock).
#[async_trait]
pub trait AudioStream: Send {
    /// Prepares the stream and returns the event channel it will push on.
    async fn initialize(
        &mut self,
        config: &AudioStreamConfig,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>>;

    /// Starts capture.
    async fn start(&mut self) -> Result<()>;

    /// Stops capture. The event channel stays open until `release`.
    async fn stop(&mut self) -> Result<()>;

    /// Whether capture is currently running.
    fn is_recording(&self) -> bool;

    /// Permanently tears the stream down.
    async fn release(&mut self) -> Result<()>;
}

/// Shared driver for [`MockAudioStream`], letting tests push chunks and
/// errors while the transcriber owns the stream itself.
#[derive(Clone)]
pub struct MockStreamHandle {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>>,
    recording: Arc<AtomicBool>,
}

impl MockStreamHandle {
    /// Pushes a chunk of audio into the stream.
    pub fn push(&self, data: Vec<u8>) {
        self.send(StreamEvent::Data(data));
    }

    /// Pushes a capture error into the stream.
    pub fn push_error(&self, message: &str) {
        self.send(StreamEvent::Error(message.to_string()));
    }

    fn send(&self, event: StreamEvent) {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}

/// Mock audio stream for testing. Chunks are pushed manually through the
/// [`MockStreamHandle`] obtained from [`MockAudioStream::handle`].
pub struct MockAudioStream {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>>,
    recording: Arc<AtomicBool>,
    should_fail_start: bool,
    should_fail_stop: bool,
    stop_calls: Arc<Mutex<usize>>,
    released: bool,
}

impl MockAudioStream {
    pub fn new() -> Self {
        Self {
            sender: Arc::new(Mutex::new(None)),
            recording: Arc::new(AtomicBool::new(false)),
            should_fail_start: false,
            should_fail_stop: false,
            stop_calls: Arc::new(Mutex::new(0)),
            released: false,
        }
    }

    /// Configures the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configures the mock to fail on stop.
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Returns a handle for driving the stream from a test.
    pub fn handle(&self) -> MockStreamHandle {
        MockStreamHandle {
            sender: self.sender.clone(),
            recording: self.recording.clone(),
        }
    }

    /// Returns a counter tracking how many times `stop` ran.
    pub fn stop_counter(&self) -> Arc<Mutex<usize>> {
        self.stop_calls.clone()
    }
}

impl Default for MockAudioStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioStream for MockAudioStream {
    async fn initialize(
        &mut self,
        _config: &AudioStreamConfig,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        Ok(rx)
    }

    async fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(StreamscribeError::AudioStream {
                message: "mock start failure".to_string(),
            });
        }
        self.recording.store(true, Ordering::SeqCst);
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(StreamEvent::Status(true));
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        *self.stop_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.should_fail_stop {
            return Err(StreamscribeError::AudioStream {
                message: "mock stop failure".to_string(),
            });
        }
        self.recording.store(false, Ordering::SeqCst);
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(StreamEvent::Status(false));
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    async fn release(&mut self) -> Result<()> {
        self.recording.store(false, Ordering::SeqCst);
        *self.sender.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.released = true;
        Ok(())
    }
}
