//! Common error types for Chime

use thiserror::Error;

/// Common result type for Chime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Chime sync client
#[derive(Error, Debug)]
pub enum Error {
    /// Channel closed, erred, or not currently connected
    #[error("Transport error: {0}")]
    Transport(String),

    /// Local persistence (device store / snapshot) error
    #[error("Store error: {0}")]
    Store(String),

    /// Message or snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
