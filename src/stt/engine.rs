//! Speech engine capability trait.
//!
//! The engine is batch-oriented: it accepts one bounded audio buffer per
//! call and cannot be fed a live stream. The orchestrator guarantees at
//! most one call is in flight per session.

use crate::error::{Result, StreamscribeError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Options forwarded to the engine with every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscribeOptions {
    /// Language hint (e.g. "en"); None lets the engine detect.
    pub language: Option<String>,
    /// Maximum characters per emitted segment.
    pub max_segment_len: Option<u32>,
    /// Request per-token timestamps.
    pub token_timestamps: bool,
    /// Translate to English instead of transcribing.
    pub translate: bool,
    /// Context prompt; the orchestrator fills this with the initial prompt
    /// plus prior slice results when prompt carryover is enabled.
    pub prompt: Option<String>,
}

/// One timed segment of engine output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: Duration,
    pub end: Duration,
}

/// Engine output for one audio buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscribeResult {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

impl TranscribeResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            segments: Vec::new(),
        }
    }
}

/// Trait for batch speech-to-text transcription.
///
/// This trait allows swapping implementations (real engine vs mock).
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Transcribes a buffer of 16-bit PCM audio.
    async fn transcribe(&self, audio: &[u8], options: &TranscribeOptions)
    -> Result<TranscribeResult>;
}

/// One recorded engine invocation, for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub byte_len: usize,
    pub prompt: Option<String>,
}

/// Mock speech engine for testing.
#[derive(Clone)]
pub struct MockSpeechEngine {
    responses: Arc<Mutex<VecDeque<String>>>,
    fallback: String,
    should_fail: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockSpeechEngine {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            fallback: "mock transcription".to_string(),
            should_fail: false,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configures the text returned for every call.
    pub fn with_response(mut self, response: &str) -> Self {
        self.fallback = response.to_string();
        self
    }

    /// Configures a sequence of responses consumed one call at a time,
    /// falling back to the fixed response when exhausted.
    pub fn with_responses(self, responses: &[&str]) -> Self {
        {
            let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(responses.iter().map(|s| s.to_string()));
        }
        self
    }

    /// Configures the mock to fail on every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Adds an artificial processing delay to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All invocations recorded so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of invocations recorded so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MockSpeechEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechEngine for MockSpeechEngine {
    async fn transcribe(
        &self,
        audio: &[u8],
        options: &TranscribeOptions,
    ) -> Result<TranscribeResult> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                byte_len: audio.len(),
                prompt: options.prompt.clone(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(StreamscribeError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }

        let text = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(TranscribeResult::from_text(text))
    }
}
