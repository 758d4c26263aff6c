//! Error types for Axon Core.

use thiserror::Error;

/// Result type alias for Axon operations.
pub type Result<T> = std::result::Result<T, AxonError>;

/// Errors that can occur in Axon operations.
#[derive(Error, Debug)]
pub enum AxonError {
    /// Generation requested before model and tokenizer were loaded.
    #[error("engine not ready: {0}")]
    NotReady(String),

    /// Operation on a session key that was never started.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session buffers were sized for a model that is no longer loaded.
    #[error("stale session: {0}")]
    StaleSession(String),

    /// Model blob failed field-range or byte-length validation at load time.
    #[error("corrupt model: {0}")]
    CorruptModel(String),

    /// Tokenizer blob failed field-range or byte-length validation at load time.
    #[error("corrupt tokenizer: {0}")]
    CorruptTokenizer(String),

    /// Tokenizer invariant violation while encoding text.
    #[error("encoding failure: {0}")]
    EncodingFailure(String),

    /// Buffer sizing failure for a session or scratch area.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
