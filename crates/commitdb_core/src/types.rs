//! Core type definitions for CommitDB.

use commitdb_codec::Timestamp;
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// A store-issued handle for one read-write transaction.
///
/// Reads through the handle observe the database as of `snapshot`.
/// The handle is released exactly once, by commit, rollback or drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    id: TransactionId,
    snapshot: Timestamp,
}

impl TransactionHandle {
    /// Creates a handle. Called by [`crate::Database`] implementations.
    #[must_use]
    pub const fn new(id: TransactionId, snapshot: Timestamp) -> Self {
        Self { id, snapshot }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot timestamp.
    #[must_use]
    pub const fn snapshot(&self) -> Timestamp {
        self.snapshot
    }
}

/// The outcome of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResponse {
    /// The commit instant; every pending commit-timestamp column of the
    /// transaction holds exactly this value.
    pub commit_timestamp: Timestamp,
    /// Number of mutations applied.
    pub mutation_count: usize,
    /// Attempts taken, counting the successful one.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_display() {
        assert_eq!(TransactionId::new(42).to_string(), "txn:42");
        assert_eq!(TransactionId::new(42).as_u64(), 42);
    }

    #[test]
    fn handle_accessors() {
        let ts = Timestamp::from_unix_nanos(10);
        let handle = TransactionHandle::new(TransactionId::new(1), ts);
        assert_eq!(handle.id(), TransactionId::new(1));
        assert_eq!(handle.snapshot(), ts);
    }
}
