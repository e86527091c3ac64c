//! The storage capability the transaction layer runs against.
//!
//! A [`Database`] owns the committed data, hands out snapshots and applies
//! a transaction's mutations as one atomic unit at a single commit
//! timestamp. Planning, execution and buffering live above it.

mod memory;

pub use memory::MemoryDatabase;

use crate::config::IsolationLevel;
use crate::context::Context;
use crate::error::CoreResult;
use crate::mutation::Mutation;
use crate::types::TransactionHandle;
use commitdb_codec::{Row, Schema, Timestamp, Value};
use std::sync::Arc;

/// A strongly consistent store.
///
/// Implementations must be safe to share between threads; many
/// transactions run against one store concurrently.
pub trait Database: Send + Sync {
    /// Returns the schema. Column kinds come from here.
    fn schema(&self) -> Arc<Schema>;

    /// Starts a read-write transaction and pins its snapshot.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` after [`Database::close`], or a context error.
    fn begin_read_write(
        &self,
        ctx: &Context,
        isolation: IsolationLevel,
    ) -> CoreResult<TransactionHandle>;

    /// Streams the rows of `table` visible at the handle's snapshot, in
    /// primary-key order.
    ///
    /// # Errors
    ///
    /// `Schema` for an unknown table, `DatabaseClosed`, or
    /// `InvalidOperation` for a released handle.
    fn execute_snapshot_read(
        &self,
        handle: &TransactionHandle,
        table: &str,
    ) -> CoreResult<Box<dyn RowStream>>;

    /// Adds the row `key` of `table` to the transaction's read set.
    ///
    /// Under [`IsolationLevel::Serializable`] a commit of that row by
    /// another transaction after the snapshot aborts this one. Stores
    /// without read tracking may ignore the call.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` for a released handle.
    fn record_read(&self, handle: &TransactionHandle, table: &str, key: &Value) -> CoreResult<()> {
        let _ = (handle, table, key);
        Ok(())
    }

    /// Validates and applies `mutations` atomically and releases the handle.
    ///
    /// Every pending commit timestamp marker is resolved to the returned
    /// commit timestamp, which is strictly greater than the handle's
    /// snapshot. Either every mutation is applied or none is.
    ///
    /// # Errors
    ///
    /// `Conflict` if another transaction committed a write to one of the
    /// same keys after the snapshot; `RowNotFound`, `RowAlreadyExists` or
    /// schema errors from validation. The handle stays open on error.
    fn apply_mutations_atomically(
        &self,
        handle: &TransactionHandle,
        mutations: Vec<Mutation>,
    ) -> CoreResult<Timestamp>;

    /// Releases the handle's snapshot. Releasing twice is a no-op.
    fn release(&self, handle: &TransactionHandle);

    /// Shuts the store down.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` while transactions are open.
    fn close(&self) -> CoreResult<()>;
}

/// A lazy, forward-only stream of snapshot rows.
pub trait RowStream: Send {
    /// Fetches up to `max_rows` further rows, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Context errors, `DatabaseClosed`, or `InvalidOperation` if the
    /// transaction was released.
    fn next_batch(&mut self, ctx: &Context, max_rows: usize) -> CoreResult<Option<Vec<Row>>>;
}
