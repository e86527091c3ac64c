//! Query and DML execution over a transaction's read view.
//!
//! The read view is the store snapshot merged with the transaction's own
//! buffered mutations. Queries stream through a [`Cursor`]; DML turns the
//! matching rows into mutations for the buffer and never touches the store.

use crate::config::{Config, IsolationLevel};
use crate::context::Context;
use crate::database::RowStream;
use crate::error::{CoreError, CoreResult};
use crate::mutation::{BufferView, Mutation};
use crate::statement::{BoundDelete, BoundInsert, BoundUpdate, Filter};
use crate::transaction::state::Shared;
use crate::types::TransactionHandle;
use commitdb_codec::{ColumnValue, Row, TableSchema, Value};
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// A lazy, forward-only cursor over query results.
///
/// Rows arrive in primary-key order. Store batches are fetched on demand;
/// the cursor cannot be restarted. Once exhausted, [`Cursor::next`] keeps
/// returning `Ok(None)`.
///
/// A cancelled or expired context rolls the owning transaction back.
/// Under serializable isolation every row the cursor returns joins the
/// transaction's read set.
pub struct Cursor {
    txn: Arc<Shared>,
    handle: TransactionHandle,
    sql: String,
    ctx: Context,
    table: TableSchema,
    columns: Vec<String>,
    filter: Filter,
    view: BufferView,
    stream: Box<dyn RowStream>,
    batch_size: usize,
    track_reads: bool,
    fetched: VecDeque<Row>,
    snapshot_done: bool,
    last_key: Option<Value>,
    done: bool,
}

pub(crate) struct Scan {
    pub(crate) sql: String,
    pub(crate) table: TableSchema,
    pub(crate) columns: Vec<String>,
    pub(crate) filter: Filter,
}

impl Cursor {
    pub(crate) fn open(
        txn: Arc<Shared>,
        handle: &TransactionHandle,
        ctx: &Context,
        scan: Scan,
        view: BufferView,
        config: &Config,
    ) -> CoreResult<Self> {
        let stream = txn.db.execute_snapshot_read(handle, scan.table.name())?;
        Ok(Self {
            txn,
            handle: handle.clone(),
            sql: scan.sql,
            ctx: ctx.clone(),
            table: scan.table,
            columns: scan.columns,
            filter: scan.filter,
            view,
            stream,
            batch_size: config.read_batch_size,
            track_reads: config.isolation == IsolationLevel::Serializable,
            fetched: VecDeque::new(),
            snapshot_done: false,
            last_key: None,
            done: false,
        })
    }

    /// Returns the projected column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the next row, or `None` when the cursor is exhausted.
    ///
    /// # Errors
    ///
    /// - `Cancelled` / `DeadlineExceeded` from the context; the transaction
    ///   is rolled back
    /// - `PendingCommitTimestampRead` if a filtered or projected column holds
    ///   this transaction's pending commit timestamp
    /// - store errors while fetching, and `RowNotFound` / `RowAlreadyExists`
    ///   for a row whose buffered mutations commit would reject; both carry
    ///   the transaction and statement
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> CoreResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        match self.advance() {
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Ok(row) => Ok(row),
            Err(err) => {
                self.done = true;
                let err = self.txn.on_error(err);
                Err(err.in_statement(self.handle.id(), &self.sql))
            }
        }
    }

    /// Decodes the next row into a record.
    ///
    /// # Errors
    ///
    /// As [`Cursor::next`], plus `Decode` if the row does not fit `T`.
    pub fn next_record<T: DeserializeOwned>(&mut self) -> CoreResult<Option<T>> {
        match self.next()? {
            Some(row) => Ok(Some(row.decode()?)),
            None => Ok(None),
        }
    }

    /// Stops the cursor; later calls to `next` return `None`.
    pub fn stop(&mut self) {
        self.done = true;
        self.fetched.clear();
    }

    /// Collects every remaining row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::next`].
    pub fn collect_rows(mut self) -> CoreResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next()? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn key_of<V>(&self, row: &Row<V>) -> Option<Value>
    where
        V: Clone + Into<ColumnValue>,
    {
        match row.get(self.table.primary_key()).cloned()?.into() {
            ColumnValue::Concrete(v) => Some(v),
            ColumnValue::PendingCommitTimestamp => None,
        }
    }

    fn fill(&mut self) -> CoreResult<()> {
        while self.fetched.is_empty() && !self.snapshot_done {
            self.ctx.check()?;
            match self.stream.next_batch(&self.ctx, self.batch_size)? {
                Some(batch) => self.fetched.extend(batch),
                None => self.snapshot_done = true,
            }
        }
        Ok(())
    }

    /// Produces the next visible row of the merged view, unfiltered.
    fn next_visible(&mut self) -> CoreResult<Option<Row<ColumnValue>>> {
        loop {
            self.fill()?;
            let snapshot_key = self.fetched.front().and_then(|r| self.key_of(r));
            let overlay_key = self.view.next_key(self.last_key.as_ref()).cloned();

            let order = match (&snapshot_key, &overlay_key) {
                (None, None) => return Ok(None),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(s), Some(o)) => s.cmp(o),
            };

            let (key, visible) = match order {
                Ordering::Less => {
                    let Some(base) = self.fetched.pop_front() else {
                        return Ok(None);
                    };
                    (snapshot_key, Some(Row::<ColumnValue>::from(base)))
                }
                Ordering::Greater => {
                    let visible = self.overlaid(overlay_key.as_ref(), None)?;
                    (overlay_key, visible)
                }
                Ordering::Equal => {
                    let base = self.fetched.pop_front();
                    let visible = self.overlaid(overlay_key.as_ref(), base.as_ref())?;
                    (overlay_key, visible)
                }
            };
            self.last_key = key;
            if let Some(row) = visible {
                return Ok(Some(row));
            }
        }
    }

    fn overlaid(
        &self,
        key: Option<&Value>,
        base: Option<&Row>,
    ) -> CoreResult<Option<Row<ColumnValue>>> {
        match key.and_then(|k| self.view.get(k)) {
            Some(overlay) => overlay.apply(base, &self.table),
            None => Ok(None),
        }
    }

    fn advance(&mut self) -> CoreResult<Option<Row>> {
        self.ctx.check()?;
        while let Some(row) = self.next_visible()? {
            let concrete = concrete_columns(&row, self.filter.columns())?;
            if !self.filter.matches(&concrete) {
                continue;
            }
            if self.track_reads {
                if let Some(key) = self.key_of(&row) {
                    self.txn
                        .db
                        .record_read(&self.handle, self.table.name(), &key)?;
                }
            }
            let projected = concrete_columns(&row, self.columns.iter().map(String::as_str))?;
            return Ok(Some(projected));
        }
        Ok(None)
    }
}

/// Projects `columns` out of `row`, failing on a pending commit timestamp.
fn concrete_columns<'a>(
    row: &Row<ColumnValue>,
    columns: impl Iterator<Item = &'a str>,
) -> CoreResult<Row> {
    let mut out = Row::new();
    for column in columns {
        match row.get(column) {
            Some(ColumnValue::PendingCommitTimestamp) => {
                return Err(CoreError::PendingCommitTimestampRead {
                    column: column.to_string(),
                })
            }
            Some(ColumnValue::Concrete(value)) => out.set(column, value.clone()),
            None => out.set(column, Value::Null),
        }
    }
    Ok(out)
}

impl Iterator for Cursor {
    type Item = CoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        Cursor::next(self).transpose()
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("table", &self.table.name())
            .field("columns", &self.columns)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Returns the keys of the rows in `cursor`, which must project the primary key.
fn matching_keys(cursor: Cursor) -> CoreResult<Vec<Value>> {
    let pk = cursor.table.primary_key().to_string();
    let rows = cursor.collect_rows()?;
    Ok(rows
        .into_iter()
        .filter_map(|mut row| row.remove(&pk))
        .collect())
}

pub(crate) fn key_scan(sql: &str, table: &TableSchema, filter: Filter) -> Scan {
    Scan {
        sql: sql.to_string(),
        table: table.clone(),
        columns: vec![table.primary_key().to_string()],
        filter,
    }
}

/// Turns an `UPDATE` into one update mutation per matching row.
pub(crate) fn plan_update(cursor: Cursor, update: &BoundUpdate) -> CoreResult<Vec<Mutation>> {
    let pk = cursor.table.primary_key().to_string();
    let keys = matching_keys(cursor)?;
    Ok(keys
        .into_iter()
        .map(|key| {
            let mut row = Row::with_capacity(update.assignments.len() + 1);
            row.set(pk.as_str(), ColumnValue::Concrete(key));
            for (column, value) in &update.assignments {
                row.set(column.as_str(), value.clone());
            }
            Mutation::update(update.table.as_str(), row)
        })
        .collect())
}

/// Turns a `DELETE` into one delete mutation per matching row.
pub(crate) fn plan_delete(cursor: Cursor, delete: &BoundDelete) -> CoreResult<Vec<Mutation>> {
    Ok(matching_keys(cursor)?
        .into_iter()
        .map(|key| Mutation::delete(delete.table.as_str(), key))
        .collect())
}

/// Turns an `INSERT` into insert mutations, rejecting keys that already
/// exist in the view or repeat within the statement.
pub(crate) fn plan_insert(cursor: Cursor, insert: &BoundInsert) -> CoreResult<Vec<Mutation>> {
    let pk = cursor.table.primary_key().to_string();
    let mut existing: BTreeSet<Value> = matching_keys(cursor)?.into_iter().collect();
    let mut mutations = Vec::with_capacity(insert.rows.len());
    for row in &insert.rows {
        let key = row
            .get(&pk)
            .and_then(ColumnValue::as_concrete)
            .cloned()
            .ok_or_else(|| CoreError::schema_mismatch(format!("row has no primary key `{pk}`")))?;
        if !existing.insert(key.clone()) {
            return Err(CoreError::row_already_exists(insert.table.as_str(), key));
        }
        mutations.push(Mutation::insert(insert.table.as_str(), row.clone()));
    }
    Ok(mutations)
}
