//! Common error types for distri-server.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for distri-server operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors; fatal at construction
    #[error("Configuration error: {0}")]
    Config(String),

    /// Static-mode packing errors
    #[error("Codec error: {0}")]
    Codec(String),

    /// The server task is gone or refused the command
    #[error("Server error: {0}")]
    Server(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
