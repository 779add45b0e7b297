//! Error types of the domain layer and its ports.

use thiserror::Error;

/// Value object construction errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueObjectError {
    #[error("invalid object id '{0}'")]
    InvalidObjectId(String),

    #[error("unknown room type '{0}'")]
    UnknownRoomType(String),

    #[error("invalid room key '{0}'")]
    InvalidRoomKey(String),
}

/// Document store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    /// A unique index rejected the write
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Timeouts and connectivity failures are worth one retry
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Unavailable(_))
    }
}

/// Cache errors. Callers always degrade to the authoritative store path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Pub/sub errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PubSubError {
    #[error("pub/sub unavailable: {0}")]
    Unavailable(String),

    #[error("subscription closed")]
    Closed,
}
