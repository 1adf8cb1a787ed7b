//! Error types for the Serene engine.

use crate::{LocalId, RecordKind};
use thiserror::Error;

/// All possible errors from the Serene engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("field '{field}' out of range: {message}")]
    OutOfRange { field: String, message: String },

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    // Queue errors
    #[error("local storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("record not found: {kind}/{local_id}")]
    RecordNotFound { kind: RecordKind, local_id: LocalId },

    #[error("record {kind}/{local_id} is not awaiting user action")]
    NotRejected { kind: RecordKind, local_id: LocalId },

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
