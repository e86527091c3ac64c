//! Transaction state.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::mutation::MutationBuffer;
use crate::types::TransactionHandle;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State of a transaction.
///
/// ```text
/// Idle -> Open -> Committing -> Committed
///                            -> Aborted
///         Open -> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not yet begun.
    Idle,
    /// Begun; reads and writes are allowed.
    Open,
    /// Commit in progress.
    Committing,
    /// Committed; the buffered mutations are visible to later transactions.
    Committed,
    /// The commit failed; nothing was applied. Retryable if the cause was a
    /// conflict.
    Aborted,
    /// Rolled back by the caller or by cancellation; nothing was applied.
    RolledBack,
}

impl TransactionState {
    /// Returns true for states a transaction cannot leave without `reset`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted | TransactionState::RolledBack
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::Open => "open",
            TransactionState::Committing => "committing",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// State shared between a transaction and the cursors it hands out.
pub(crate) struct Shared {
    pub(crate) db: Arc<dyn Database>,
    pub(crate) inner: Mutex<Inner>,
}

pub(crate) struct Inner {
    pub(crate) state: TransactionState,
    pub(crate) handle: Option<TransactionHandle>,
    pub(crate) buffer: MutationBuffer,
}

impl Inner {
    pub(crate) fn ensure_open(&self) -> CoreResult<&TransactionHandle> {
        match (&self.handle, self.state) {
            (Some(handle), TransactionState::Open) => Ok(handle),
            _ => Err(CoreError::NotOpen {
                state: self.state.to_string(),
            }),
        }
    }
}

impl Shared {
    pub(crate) fn new(db: Arc<dyn Database>, max_mutations: usize) -> Self {
        Self {
            db,
            inner: Mutex::new(Inner {
                state: TransactionState::Idle,
                handle: None,
                buffer: MutationBuffer::new(max_mutations),
            }),
        }
    }

    /// Ends an open transaction without applying anything.
    ///
    /// Returns false if the transaction was not open.
    pub(crate) fn roll_back(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Open {
            return false;
        }
        inner.state = TransactionState::RolledBack;
        inner.buffer.clear();
        if let Some(handle) = inner.handle.take() {
            self.db.release(&handle);
            debug!(txn = %handle.id(), reason, "rolled back transaction");
        }
        true
    }

    /// Rolls back if `err` is a context error, then returns it.
    pub(crate) fn on_error(&self, err: CoreError) -> CoreError {
        if matches!(err, CoreError::Cancelled | CoreError::DeadlineExceeded) {
            self.roll_back(&err.to_string());
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TransactionState::Idle.is_terminal());
        assert!(!TransactionState::Open.is_terminal());
        assert!(!TransactionState::Committing.is_terminal());
        assert!(TransactionState::Committed.is_terminal());
        assert!(TransactionState::Aborted.is_terminal());
        assert!(TransactionState::RolledBack.is_terminal());
    }

    #[test]
    fn state_display() {
        assert_eq!(TransactionState::RolledBack.to_string(), "rolled back");
        assert_eq!(TransactionState::Open.to_string(), "open");
    }
}
