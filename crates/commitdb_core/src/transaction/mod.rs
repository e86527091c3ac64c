//! Read-write transactions.
//!
//! A [`Transaction`] pins a snapshot at [`Transaction::begin`], collects
//! mutations in its buffer and applies them atomically at
//! [`Transaction::commit`]. Reads see the snapshot plus the transaction's
//! own buffered writes.
//!
//! ## Example
//!
//! ```
//! use commitdb_codec::{ScalarType, Schema, TableSchema, Value};
//! use commitdb_core::{Config, Context, MemoryDatabase, Statement, Transaction};
//! use std::sync::Arc;
//!
//! let schema = Schema::new()
//!     .with_table(
//!         TableSchema::builder("test")
//!             .required("id", ScalarType::String)
//!             .commit_timestamp("t1")
//!             .primary_key("id")
//!             .build()?,
//!     )?;
//! let db = Arc::new(MemoryDatabase::new(schema));
//! let ctx = Context::background();
//!
//! let mut txn = Transaction::new(db.clone(), Config::default());
//! txn.begin(&ctx)?;
//! txn.update(&ctx, &Statement::new("INSERT test (id, t1) VALUES ('x', PENDING_COMMIT_TIMESTAMP())"))?;
//! let response = txn.commit(&ctx)?;
//!
//! let mut txn = Transaction::new(db, Config::default());
//! txn.begin(&ctx)?;
//! let row = txn.read_row(&ctx, "test", "x", &["t1"])?.unwrap();
//! assert_eq!(row.get("t1"), Some(&Value::Timestamp(response.commit_timestamp)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub(crate) mod state;

pub use state::TransactionState;

use crate::config::Config;
use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::executor::{self, key_scan, Cursor, Scan};
use crate::mutation::Mutation;
use crate::statement::{BoundStatement, Filter, Statement};
use crate::types::{CommitResponse, TransactionHandle, TransactionId};
use commitdb_codec::{encode_record, ColumnValue, Row, TableSchema, Timestamp, Value};
use serde::Serialize;
use state::Shared;
use std::sync::Arc;
use tracing::{debug, warn};

/// A read-write transaction.
///
/// One caller drives one transaction; it is not meant to be shared.
/// Dropping an open transaction rolls it back.
pub struct Transaction {
    shared: Arc<Shared>,
    config: Config,
}

impl Transaction {
    /// Creates an idle transaction against `db`.
    pub fn new(db: Arc<dyn Database>, config: Config) -> Self {
        Self {
            shared: Arc::new(Shared::new(db, config.max_mutations)),
            config,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.shared.inner.lock().state
    }

    /// Returns the transaction ID while open.
    #[must_use]
    pub fn id(&self) -> Option<TransactionId> {
        self.handle().map(|h| h.id())
    }

    /// Returns the snapshot timestamp while open.
    #[must_use]
    pub fn snapshot(&self) -> Option<Timestamp> {
        self.handle().map(|h| h.snapshot())
    }

    /// Returns the number of buffered mutations.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.shared.inner.lock().buffer.len()
    }

    fn handle(&self) -> Option<TransactionHandle> {
        self.shared.inner.lock().handle.clone()
    }

    fn open_handle(&self) -> CoreResult<TransactionHandle> {
        self.shared.inner.lock().ensure_open().cloned()
    }

    fn table(&self, name: &str) -> CoreResult<TableSchema> {
        self.shared
            .db
            .schema()
            .table(name)
            .cloned()
            .ok_or_else(|| CoreError::schema(format!("table not found: {name}")))
    }

    /// Allocates an ID and snapshot; `Idle -> Open`.
    ///
    /// # Errors
    ///
    /// `AlreadyOpen` unless idle; store and context errors.
    pub fn begin(&mut self, ctx: &Context) -> CoreResult<()> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TransactionState::Idle {
            return Err(CoreError::AlreadyOpen {
                state: inner.state.to_string(),
            });
        }
        let handle = self
            .shared
            .db
            .begin_read_write(ctx, self.config.isolation)?;
        debug!(txn = %handle.id(), snapshot = %handle.snapshot(), "transaction open");
        inner.handle = Some(handle);
        inner.state = TransactionState::Open;
        Ok(())
    }

    /// Returns a finished transaction to `Idle` so it can begin again.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` while the transaction is open or committing.
    pub fn reset(&mut self) -> CoreResult<()> {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            TransactionState::Idle => Ok(()),
            state if state.is_terminal() => {
                inner.state = TransactionState::Idle;
                inner.handle = None;
                inner.buffer.clear();
                Ok(())
            }
            state => Err(CoreError::invalid_operation(format!(
                "cannot reset a transaction that is {state}"
            ))),
        }
    }

    /// Runs a query against the snapshot plus this transaction's writes.
    ///
    /// # Errors
    ///
    /// `NotOpen`, binder errors, `InvalidOperation` for DML (use
    /// [`Transaction::update`]), store errors.
    pub fn read(&self, ctx: &Context, statement: &Statement) -> CoreResult<Cursor> {
        let handle = self.open_handle()?;
        let bound = statement.bind(&self.shared.db.schema())?;
        let BoundStatement::Select(select) = bound else {
            return Err(CoreError::invalid_operation(
                "read expects a SELECT; use update for DML",
            ));
        };
        let table = self.table(&select.table)?;
        let scan = Scan {
            sql: statement.sql().to_string(),
            table,
            columns: select.columns,
            filter: select.filter,
        };
        self.cursor(ctx, &handle, scan)
            .map_err(|e| e.in_statement(handle.id(), statement.sql()))
    }

    fn cursor(&self, ctx: &Context, handle: &TransactionHandle, scan: Scan) -> CoreResult<Cursor> {
        ctx.check().map_err(|e| self.shared.on_error(e))?;
        let view = self.shared.inner.lock().buffer.peek(&scan.table);
        Cursor::open(
            Arc::clone(&self.shared),
            handle,
            ctx,
            scan,
            view,
            &self.config,
        )
    }

    /// Reads one row by primary key.
    ///
    /// An empty `columns` slice selects every column.
    ///
    /// # Errors
    ///
    /// As [`Transaction::read`]; `Schema` for unknown tables or columns.
    pub fn read_row(
        &self,
        ctx: &Context,
        table: &str,
        key: impl Into<Value>,
        columns: &[&str],
    ) -> CoreResult<Option<Row>> {
        let handle = self.open_handle()?;
        let schema = self.table(table)?;
        let columns = if columns.is_empty() {
            schema.column_names()
        } else {
            columns
                .iter()
                .map(|name| {
                    schema
                        .column(name)
                        .map(|c| c.name().to_string())
                        .ok_or_else(|| {
                            CoreError::schema(format!(
                                "column `{name}` not found in table `{table}`"
                            ))
                        })
                })
                .collect::<CoreResult<_>>()?
        };
        let scan = Scan {
            sql: format!(
                "SELECT {} FROM {} WHERE {} = @key",
                columns.join(", "),
                schema.name(),
                schema.primary_key()
            ),
            filter: Filter::equals(schema.primary_key(), key.into()),
            columns,
            table: schema,
        };
        let mut cursor = self.cursor(ctx, &handle, scan)?;
        let row = cursor.next()?;
        cursor.stop();
        Ok(row)
    }

    /// Buffers mutations; they take effect at commit.
    ///
    /// # Errors
    ///
    /// `NotOpen`, validation errors (see [`Mutation::validate`]),
    /// `TooManyMutations`. On error nothing from this call is buffered.
    pub fn buffer_write(&mut self, mutations: impl IntoIterator<Item = Mutation>) -> CoreResult<()> {
        self.open_handle()?;
        let schema = self.shared.db.schema();
        let mutations: Vec<Mutation> = mutations.into_iter().collect();
        for mutation in &mutations {
            mutation.validate(&schema)?;
        }
        let mut inner = self.shared.inner.lock();
        inner.ensure_open()?;
        if inner.buffer.len() + mutations.len() > self.config.max_mutations {
            return Err(CoreError::TooManyMutations {
                limit: self.config.max_mutations,
            });
        }
        for mutation in mutations {
            inner.buffer.add(mutation)?;
        }
        Ok(())
    }

    fn write_record<T: Serialize + ?Sized>(
        &mut self,
        table: &str,
        record: &T,
        build: fn(String, Row<ColumnValue>) -> Mutation,
    ) -> CoreResult<()> {
        self.open_handle()?;
        let schema = self.table(table)?;
        let row = encode_record(record, &schema)?;
        self.buffer_write([build(schema.name().to_string(), row)])
    }

    /// Buffers an insert of `record`.
    ///
    /// # Errors
    ///
    /// `NotOpen`, codec errors, validation errors.
    pub fn insert<T: Serialize + ?Sized>(&mut self, table: &str, record: &T) -> CoreResult<()> {
        self.write_record(table, record, Mutation::insert)
    }

    /// Buffers an update of the row `record` identifies.
    ///
    /// # Errors
    ///
    /// `NotOpen`, codec errors, validation errors.
    pub fn update_record<T: Serialize + ?Sized>(&mut self, table: &str, record: &T) -> CoreResult<()> {
        self.write_record(table, record, Mutation::update)
    }

    /// Buffers an insert-or-update of `record`.
    ///
    /// # Errors
    ///
    /// `NotOpen`, codec errors, validation errors.
    pub fn insert_or_update<T: Serialize + ?Sized>(
        &mut self,
        table: &str,
        record: &T,
    ) -> CoreResult<()> {
        self.write_record(table, record, Mutation::insert_or_update)
    }

    /// Buffers a replace of `record`.
    ///
    /// # Errors
    ///
    /// `NotOpen`, codec errors, validation errors.
    pub fn replace<T: Serialize + ?Sized>(&mut self, table: &str, record: &T) -> CoreResult<()> {
        self.write_record(table, record, Mutation::replace)
    }

    /// Buffers a delete by primary key.
    ///
    /// # Errors
    ///
    /// `NotOpen`, validation errors.
    pub fn delete(&mut self, table: &str, key: impl Into<Value>) -> CoreResult<()> {
        self.open_handle()?;
        let schema = self.table(table)?;
        self.buffer_write([Mutation::delete(schema.name(), key)])
    }

    /// Executes DML against the read view and buffers the resulting
    /// mutations. Returns the number of rows affected; zero is not an error.
    ///
    /// # Errors
    ///
    /// - `NotOpen`
    /// - binder errors, unchanged; the transaction stays open
    /// - `RowAlreadyExists` for an INSERT of a visible key
    /// - `InvalidOperation` for a SELECT (use [`Transaction::read`])
    /// - store errors, wrapped with statement context
    pub fn update(&mut self, ctx: &Context, statement: &Statement) -> CoreResult<u64> {
        let handle = self.open_handle()?;
        let bound = statement.bind(&self.shared.db.schema())?;
        let table = self.table(bound.table())?;

        let planned = match &bound {
            BoundStatement::Select(_) => {
                return Err(CoreError::invalid_operation(
                    "update expects DML; use read for SELECT",
                ))
            }
            BoundStatement::Update(update) => {
                let cursor = self.cursor(ctx, &handle, key_scan(statement.sql(), &table, update.filter.clone()));
                cursor.and_then(|c| executor::plan_update(c, update))
            }
            BoundStatement::Delete(delete) => {
                let cursor = self.cursor(ctx, &handle, key_scan(statement.sql(), &table, delete.filter.clone()));
                cursor.and_then(|c| executor::plan_delete(c, delete))
            }
            BoundStatement::Insert(insert) => {
                let cursor = self.cursor(ctx, &handle, key_scan(statement.sql(), &table, Default::default()));
                cursor.and_then(|c| executor::plan_insert(c, insert))
            }
        };
        let mutations = planned.map_err(|e| e.in_statement(handle.id(), statement.sql()))?;

        let count = mutations.len() as u64;
        let mut inner = self.shared.inner.lock();
        inner.ensure_open()?;
        if inner.buffer.len() + mutations.len() > self.config.max_mutations {
            return Err(CoreError::TooManyMutations {
                limit: self.config.max_mutations,
            });
        }
        for mutation in mutations {
            inner.buffer.add(mutation)?;
        }
        debug!(txn = %handle.id(), rows = count, sql = statement.sql(), "buffered DML");
        Ok(count)
    }

    /// Executes several DML statements in order, stopping at the first
    /// failure. Returns the affected count of each statement.
    ///
    /// # Errors
    ///
    /// The first error; mutations of earlier statements stay buffered.
    pub fn batch_update(&mut self, ctx: &Context, statements: &[Statement]) -> CoreResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(statements.len());
        for statement in statements {
            counts.push(self.update(ctx, statement)?);
        }
        Ok(counts)
    }

    /// Applies every buffered mutation atomically.
    ///
    /// All pending commit timestamps resolve to the single returned commit
    /// timestamp. On a conflict nothing is applied, the transaction becomes
    /// `Aborted`, and the returned error is retryable.
    ///
    /// # Errors
    ///
    /// `NotOpen`; context errors (the transaction rolls back); `Conflict`,
    /// `RowNotFound`, `RowAlreadyExists` and other store errors, wrapped
    /// with the transaction ID and `COMMIT` (the transaction aborts).
    pub fn commit(&mut self, ctx: &Context) -> CoreResult<CommitResponse> {
        self.open_handle()?;
        ctx.check().map_err(|e| self.shared.on_error(e))?;

        let (handle, mutations) = {
            let mut inner = self.shared.inner.lock();
            let handle = inner.ensure_open()?.clone();
            inner.state = TransactionState::Committing;
            (handle, inner.buffer.drain())
        };
        let mutation_count = mutations.len();

        let result = self
            .shared
            .db
            .apply_mutations_atomically(&handle, mutations);

        let mut inner = self.shared.inner.lock();
        inner.handle = None;
        match result {
            Ok(commit_timestamp) => {
                inner.state = TransactionState::Committed;
                debug!(
                    txn = %handle.id(),
                    commit_ts = %commit_timestamp,
                    mutations = mutation_count,
                    "transaction committed"
                );
                Ok(CommitResponse {
                    commit_timestamp,
                    mutation_count,
                    attempts: 1,
                })
            }
            Err(err) => {
                inner.state = TransactionState::Aborted;
                self.shared.db.release(&handle);
                if err.is_retryable() {
                    warn!(txn = %handle.id(), error = %err, "commit conflicted");
                } else {
                    debug!(txn = %handle.id(), error = %err, "commit failed");
                }
                Err(err.in_statement(handle.id(), "COMMIT"))
            }
        }
    }

    /// Discards the buffer and releases the snapshot; `Open -> RolledBack`.
    ///
    /// # Errors
    ///
    /// `NotOpen` unless open.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if self.shared.roll_back("rollback") {
            Ok(())
        } else {
            Err(CoreError::NotOpen {
                state: self.state().to_string(),
            })
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.shared.roll_back("dropped while open");
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Transaction")
            .field("state", &inner.state)
            .field("handle", &inner.handle)
            .field("mutations", &inner.buffer.len())
            .finish_non_exhaustive()
    }
}
