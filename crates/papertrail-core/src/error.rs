//! Error types shared across the core and the application crate.

use thiserror::Error;

/// Failure reported by an embedding or generation capability.
///
/// [`CapabilityError::is_transient`] decides whether a retry wrapper may
/// try again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// Provider answered 429.
    #[error("rate limited by provider")]
    RateLimited,
    /// Request did not complete before the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure (DNS, refused, reset).
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Non-success HTTP status other than 429.
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Response arrived but could not be interpreted.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    /// The capability is switched off in configuration.
    #[error("capability disabled: {0}")]
    Disabled(String),
    #[error("{0}")]
    Other(String),
}

impl CapabilityError {
    /// Rate limits, timeouts, connection failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            CapabilityError::RateLimited
            | CapabilityError::Timeout
            | CapabilityError::Unavailable(_) => true,
            CapabilityError::Status { status, .. } => *status >= 500,
            CapabilityError::InvalidResponse(_)
            | CapabilityError::Disabled(_)
            | CapabilityError::Other(_) => false,
        }
    }
}

/// Rejected caller input. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query is empty")]
    EmptyQuery,
}

/// A vector whose length does not match the index dimensionality.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("embedding has {actual} dimensions, index expects {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Invalid chunking parameters.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("chunk size must be greater than zero")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}
