//! Error types for CommitDB core.

use crate::types::TransactionId;
use commitdb_codec::{CodecError, Value};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in CommitDB core operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A record or value does not fit the target column.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A row could not be decoded into a record.
    #[error("decode failed: {message}")]
    Decode {
        /// Description of the decoding error.
        message: String,
    },

    /// A statement references a parameter that was not supplied.
    #[error("parameter @{name} is not bound")]
    UnboundParameter {
        /// The parameter name, without the `@`.
        name: String,
    },

    /// A concrete value was supplied for a commit-timestamp column.
    #[error("invalid commit timestamp for column `{column}`: only PENDING_COMMIT_TIMESTAMP() or NULL is accepted")]
    InvalidCommitTimestampLiteral {
        /// The commit-timestamp column.
        column: String,
    },

    /// The retry budget ran out while commits kept conflicting.
    #[error("commit aborted after {attempts} attempts: {last}")]
    CommitAborted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the last attempt.
        last: Box<CoreError>,
    },

    /// `begin` was called on a transaction that is not idle.
    #[error("transaction already begun (state: {state})")]
    AlreadyOpen {
        /// The state the transaction was in.
        state: String,
    },

    /// The operation requires an open transaction.
    #[error("transaction is not open (state: {state})")]
    NotOpen {
        /// The state the transaction was in.
        state: String,
    },

    /// A table or column is not declared, or is used illegally.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// A statement could not be parsed.
    #[error("syntax error: {message}")]
    Syntax {
        /// Description of the problem.
        message: String,
    },

    /// Another transaction committed a conflicting write first.
    #[error("transaction conflict on {table} key {key}")]
    Conflict {
        /// The table of the conflicting row.
        table: String,
        /// The primary key of the conflicting row.
        key: Value,
    },

    /// An update targeted a row that does not exist.
    #[error("row not found: {table} key {key}")]
    RowNotFound {
        /// The table searched.
        table: String,
        /// The primary key that was not found.
        key: Value,
    },

    /// An insert targeted a row that already exists.
    #[error("row already exists: {table} key {key}")]
    RowAlreadyExists {
        /// The table written.
        table: String,
        /// The primary key that already exists.
        key: Value,
    },

    /// A query read a commit-timestamp column this transaction set to the
    /// pending commit timestamp; its value is unknown until commit.
    #[error("column `{column}` holds a pending commit timestamp and cannot be read before commit")]
    PendingCommitTimestampRead {
        /// The pending column.
        column: String,
    },

    /// The transaction buffered more mutations than allowed.
    #[error("too many mutations: limit is {limit}")]
    TooManyMutations {
        /// The configured cap.
        limit: usize,
    },

    /// The context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The database is closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A store error, with the transaction and statement that hit it.
    #[error("{txn}: statement `{sql}` failed: {source}")]
    Statement {
        /// The transaction running the statement.
        txn: TransactionId,
        /// The statement text.
        sql: String,
        /// The underlying error.
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Creates a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an unbound parameter error.
    pub fn unbound_parameter(name: impl Into<String>) -> Self {
        Self::UnboundParameter { name: name.into() }
    }

    /// Creates a commit-timestamp literal error.
    pub fn invalid_commit_timestamp_literal(column: impl Into<String>) -> Self {
        Self::InvalidCommitTimestampLiteral {
            column: column.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(table: impl Into<String>, key: Value) -> Self {
        Self::Conflict {
            table: table.into(),
            key,
        }
    }

    /// Creates a row not found error.
    pub fn row_not_found(table: impl Into<String>, key: Value) -> Self {
        Self::RowNotFound {
            table: table.into(),
            key,
        }
    }

    /// Creates a row already exists error.
    pub fn row_already_exists(table: impl Into<String>, key: Value) -> Self {
        Self::RowAlreadyExists {
            table: table.into(),
            key,
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps a store error with statement context.
    ///
    /// Errors raised by the binder or codec are returned unchanged, as are
    /// errors that already carry context.
    #[must_use]
    pub fn in_statement(self, txn: TransactionId, sql: &str) -> Self {
        match self {
            Self::Conflict { .. }
            | Self::RowNotFound { .. }
            | Self::RowAlreadyExists { .. }
            | Self::DatabaseClosed
            | Self::InvalidOperation { .. } => Self::Statement {
                txn,
                sql: sql.to_string(),
                source: Box::new(self),
            },
            other => other,
        }
    }

    /// Returns the innermost error, looking through statement context.
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Statement { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if retrying the whole transaction may succeed.
    ///
    /// Only write-write conflicts are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Self::Conflict { .. })
    }

    /// Returns true if this is (or wraps) a conflict.
    pub fn is_conflict(&self) -> bool {
        self.is_retryable()
    }
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::SchemaMismatch { message } => Self::SchemaMismatch { message },
            CodecError::Decode { message } => Self::Decode { message },
            CodecError::CommitTimestampLiteral { column } => {
                Self::InvalidCommitTimestampLiteral { column }
            }
            CodecError::InvalidSchema { message } => Self::Schema { message },
            CodecError::Payload { message } => Self::Decode { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(CoreError::conflict("test", Value::from("x")).is_retryable());
        assert!(!CoreError::row_not_found("test", Value::from("x")).is_retryable());
        assert!(!CoreError::invalid_commit_timestamp_literal("t1").is_retryable());
        assert!(!CoreError::Cancelled.is_retryable());
    }

    #[test]
    fn statement_context_is_transparent_to_retry() {
        let err = CoreError::conflict("test", Value::from("x"))
            .in_statement(TransactionId::new(7), "UPDATE test SET t1 = NULL");
        assert!(matches!(err, CoreError::Statement { .. }));
        assert!(err.is_retryable());
        assert!(matches!(err.root(), CoreError::Conflict { .. }));
        assert!(err.to_string().contains("txn:7"));
    }

    #[test]
    fn binder_errors_are_not_wrapped() {
        let err = CoreError::unbound_parameter("id").in_statement(TransactionId::new(1), "x");
        assert_eq!(err, CoreError::unbound_parameter("id"));
    }

    #[test]
    fn codec_errors_map_flat() {
        let err: CoreError = CodecError::commit_timestamp_literal("t2").into();
        assert_eq!(err, CoreError::invalid_commit_timestamp_literal("t2"));

        let err: CoreError = CodecError::schema_mismatch("bad").into();
        assert!(matches!(err, CoreError::SchemaMismatch { .. }));
    }
}
