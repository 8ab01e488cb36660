//! Engine and adapter error types

use thiserror::Error;
use types::errors::BookError;

/// Failure reported by an order source, log store or snapshot store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Worth retrying: the backend may recover.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Data could not be encoded or decoded; retrying will not help.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Persisted data failed an integrity check.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// A log sequence does not continue the stored log.
    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// The order source has no more orders and never will.
    #[error("Source closed")]
    Closed,
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Unavailable(_))
    }
}

/// Errors that stop a product's pipeline.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    Config(String),

    #[error("Snapshot store unavailable at startup: {0}")]
    Startup(#[source] StoreError),

    #[error("Order source could not be positioned: {0}")]
    Seek(#[source] StoreError),

    #[error("Latest snapshot cannot be restored: {0}")]
    Restore(#[source] BookError),

    #[error("Log store failed after {attempts} attempts: {source}")]
    FatalIo {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Order book failure: {0}")]
    Book(#[from] BookError),

    #[error("Pipeline channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Pipeline task {task} did not complete: {reason}")]
    Task { task: &'static str, reason: String },
}

impl EngineError {
    /// Secondary failure caused by another stage stopping first.
    pub fn is_knock_on(&self) -> bool {
        matches!(self, EngineError::ChannelClosed(_))
    }
}
