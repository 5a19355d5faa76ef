//! Error types for the Lark assistant

use thiserror::Error;

/// Result type alias for Lark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio peripheral error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone capture error
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model query error
    #[error("query error: {0}")]
    Query(String),

    /// Speech synthesis error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
