//! Error types for sdstream-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Only the errors that end a stream surface here; decode resync failures and
//! underruns are absorbed by the pipeline and only show up as counters.

use thiserror::Error;

/// Main error type for sdstream-player
#[derive(Error, Debug)]
pub enum Error {
    /// Resource missing or unreadable at open time
    #[error("Storage open error: {0}")]
    StorageOpen(String),

    /// Storage read failed mid-stream
    #[error("Storage error: {0}")]
    Storage(String),

    /// Container header failed validation, or no decodable frame was found
    #[error("Format error: {0}")]
    Format(String),

    /// Decoder could not be constructed
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] sdstream_common::Error),
}

/// Convenience Result type using sdstream-player Error
pub type Result<T> = std::result::Result<T, Error>;
