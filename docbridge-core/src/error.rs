//! Error types and result types for adapter operations.
//!
//! Every public operation resolves to a single [`AdapterResult<T>`]. Criteria and encoding
//! failures are produced before any store round-trip; backend failures are passed through
//! as [`AdapterError::Storage`] without retry.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while translating criteria, coercing
/// documents or talking to the underlying document store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The criteria has a malformed or unsupported shape. Never reaches the network.
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),
    /// A value could not be coerced to or from the native identifier representation.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    /// Reserved for callers that require a non-empty match. The orchestrator itself
    /// treats zero matches as an empty result.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Any failure surfaced by the storage backend.
    #[error("Storage error: {0}")]
    Storage(String),
    /// The collection definition could not be parsed into a schema.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
    /// A value could not be coerced to the type its attribute declares.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// A specialized `Result` type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<BsonError> for AdapterError {
    fn from(err: BsonError) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for AdapterError {
    fn from(err: SerdeJsonError) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}
