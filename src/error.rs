//! Error types for streamscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamscribeError {
    // Usage errors, rejected synchronously with no partial state change
    #[error("Realtime transcription is already active")]
    AlreadyActive,

    #[error("Realtime transcription is not active")]
    NotActive,

    #[error("Transcriber has been released and cannot be restarted")]
    Released,

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Audio stream errors
    #[error("Audio stream failed: {message}")]
    AudioStream { message: String },

    // Transcription engine errors
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Transcription timed out after {seconds:.1}s")]
    TranscriptionTimeout { seconds: f64 },

    // VAD errors
    #[error("Speech detection failed: {message}")]
    SpeechDetection { message: String },

    // Audio sink errors
    #[error("Audio sink failed: {message}")]
    AudioSink { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, StreamscribeError>;
