//! Error types shared across the matching core
//!
//! Error taxonomy using thiserror

use thiserror::Error;

/// Numeric construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NumericError {
    #[error("Invalid decimal: {0}")]
    Parse(String),

    #[error("Negative value not allowed: {0}")]
    Negative(String),
}

/// Dedup window rejections.
///
/// Neither is a pipeline failure; the offending order is dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("Order id {value} expired: window is ({min}, {max}]")]
    Expired { value: u64, min: u64, max: u64 },

    #[error("Duplicate order id: {0}")]
    Duplicate(u64),
}

/// Order book errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookError {
    #[error("Order not found: {order_id}")]
    NotFound { order_id: u64 },

    /// Book state contradicts itself; the pipeline must stop.
    #[error("Book invariant violated: {0}")]
    InvariantViolation(String),
}

impl BookError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BookError::InvariantViolation(_))
    }
}
