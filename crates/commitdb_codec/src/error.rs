//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while mapping records and rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A record field has no matching column or an incompatible type.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A row could not be decoded into the target record.
    #[error("decode failed: {message}")]
    Decode {
        /// Description of the decoding error.
        message: String,
    },

    /// A concrete value was supplied for a commit-timestamp column.
    #[error("column `{column}` only accepts the pending commit timestamp, not a concrete value")]
    CommitTimestampLiteral {
        /// The commit-timestamp column.
        column: String,
    },

    /// A table or schema definition is invalid.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// A stored row payload is malformed.
    #[error("invalid row payload: {message}")]
    Payload {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Create a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a commit-timestamp literal error.
    pub fn commit_timestamp_literal(column: impl Into<String>) -> Self {
        Self::CommitTimestampLiteral {
            column: column.into(),
        }
    }

    /// Create an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Create a payload error.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }
}
