//! Hub error types

use thiserror::Error;

use crate::codec::CodecError;
use crate::source::SourceError;

/// Errors that can occur in the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Too many connections (limit: {0})")]
    TooManyConnections(usize),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type alias for hub operations
pub type HubResult<T> = Result<T, HubError>;
