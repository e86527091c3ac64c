//! Row mutations and the per-transaction mutation buffer.

mod buffer;

pub use buffer::{BufferView, Effect, MutationBuffer, Overlay};

use crate::error::{CoreError, CoreResult};
use commitdb_codec::{ColumnValue, Row, Schema, TableSchema, Timestamp, Value};

/// A single row change.
///
/// `V` is [`ColumnValue`] while the mutation sits in a buffer, where rows
/// may carry the pending commit timestamp marker, and [`Value`] once the
/// store has resolved it at commit.
///
/// Row-carrying variants hold the primary key in the table's primary-key
/// column.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<V = ColumnValue> {
    /// Insert a new row; fails at commit if the key exists.
    Insert {
        /// Target table.
        table: String,
        /// The row. Unlisted nullable columns become NULL.
        row: Row<V>,
    },
    /// Update listed columns of an existing row; fails at commit if the
    /// key does not exist.
    Update {
        /// Target table.
        table: String,
        /// Primary key plus the columns to change.
        row: Row<V>,
    },
    /// Update the row if it exists, insert it otherwise.
    InsertOrUpdate {
        /// Target table.
        table: String,
        /// The row.
        row: Row<V>,
    },
    /// Replace the whole row, inserting it if needed. Unlisted nullable
    /// columns become NULL.
    Replace {
        /// Target table.
        table: String,
        /// The row.
        row: Row<V>,
    },
    /// Delete a row; deleting a missing row is not an error.
    Delete {
        /// Target table.
        table: String,
        /// Primary key of the row.
        key: Value,
    },
}

impl<V> Mutation<V> {
    /// Creates an insert.
    pub fn insert(table: impl Into<String>, row: Row<V>) -> Self {
        Self::Insert {
            table: table.into(),
            row,
        }
    }

    /// Creates an update.
    pub fn update(table: impl Into<String>, row: Row<V>) -> Self {
        Self::Update {
            table: table.into(),
            row,
        }
    }

    /// Creates an insert-or-update.
    pub fn insert_or_update(table: impl Into<String>, row: Row<V>) -> Self {
        Self::InsertOrUpdate {
            table: table.into(),
            row,
        }
    }

    /// Creates a replace.
    pub fn replace(table: impl Into<String>, row: Row<V>) -> Self {
        Self::Replace {
            table: table.into(),
            row,
        }
    }

    /// Creates a delete.
    pub fn delete(table: impl Into<String>, key: impl Into<Value>) -> Self {
        Self::Delete {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Returns the target table name.
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::InsertOrUpdate { table, .. }
            | Self::Replace { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    /// Returns the row, if this is not a delete.
    pub fn row(&self) -> Option<&Row<V>> {
        match self {
            Self::Insert { row, .. }
            | Self::Update { row, .. }
            | Self::InsertOrUpdate { row, .. }
            | Self::Replace { row, .. } => Some(row),
            Self::Delete { .. } => None,
        }
    }

    /// Returns the kind of mutation as an upper-case word, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "INSERT",
            Self::Update { .. } => "UPDATE",
            Self::InsertOrUpdate { .. } => "INSERT_OR_UPDATE",
            Self::Replace { .. } => "REPLACE",
            Self::Delete { .. } => "DELETE",
        }
    }

    fn map_row<W>(self, f: impl FnOnce(Row<V>) -> Row<W>) -> Mutation<W> {
        match self {
            Self::Insert { table, row } => Mutation::Insert { table, row: f(row) },
            Self::Update { table, row } => Mutation::Update { table, row: f(row) },
            Self::InsertOrUpdate { table, row } => Mutation::InsertOrUpdate { table, row: f(row) },
            Self::Replace { table, row } => Mutation::Replace { table, row: f(row) },
            Self::Delete { table, key } => Mutation::Delete { table, key },
        }
    }
}

/// Access to a column value as a concrete [`Value`], if it is one.
pub trait CellValue: Clone + From<Value> {
    /// Returns the concrete value, or `None` for the pending marker.
    fn concrete(&self) -> Option<&Value>;
}

impl CellValue for Value {
    fn concrete(&self) -> Option<&Value> {
        Some(self)
    }
}

impl CellValue for ColumnValue {
    fn concrete(&self) -> Option<&Value> {
        self.as_concrete()
    }
}

impl<V: CellValue> Mutation<V> {
    /// Returns the primary key of the target row.
    pub fn key(&self, table: &TableSchema) -> Option<&Value> {
        match self {
            Self::Delete { key, .. } => Some(key),
            _ => self.row()?.get(table.primary_key())?.concrete(),
        }
    }

    /// Applies this mutation to `current`, the row as it exists before.
    ///
    /// Returns the row after the mutation, or `None` if it is deleted.
    ///
    /// # Errors
    ///
    /// - `RowAlreadyExists` for an insert over an existing row
    /// - `RowNotFound` for an update of a missing row
    /// - `SchemaMismatch` if a NOT NULL column ends up NULL
    pub fn apply_to(
        &self,
        current: Option<&Row<V>>,
        table: &TableSchema,
    ) -> CoreResult<Option<Row<V>>> {
        let key = || self.key(table).cloned().unwrap_or(Value::Null);
        match (self, current) {
            (Self::Delete { .. }, _) => Ok(None),
            (Self::Insert { .. }, Some(_)) => {
                Err(CoreError::row_already_exists(table.name(), key()))
            }
            (Self::Update { .. }, None) => Err(CoreError::row_not_found(table.name(), key())),
            (Self::Insert { row, .. } | Self::Replace { row, .. }, _)
            | (Self::InsertOrUpdate { row, .. }, None) => full_row(table, row).map(Some),
            (Self::Update { row, .. } | Self::InsertOrUpdate { row, .. }, Some(existing)) => {
                let mut merged = existing.clone();
                merged.merge(row.clone());
                check_not_null(table, &merged)?;
                Ok(Some(merged))
            }
        }
    }
}

impl Mutation<ColumnValue> {
    /// Replaces every pending commit timestamp marker with `commit_ts`.
    ///
    /// Called by the store inside its atomic apply step.
    #[must_use]
    pub fn resolve(self, commit_ts: Timestamp) -> Mutation<Value> {
        self.map_row(|row| row.resolve(commit_ts))
    }

    /// Returns true if the mutation carries the pending marker.
    pub fn has_pending(&self) -> bool {
        self.row().is_some_and(Row::has_pending)
    }

    /// Checks the mutation against `schema` and returns its table.
    ///
    /// # Errors
    ///
    /// - `Schema` for an unknown table or column, or a pending marker on a
    ///   column that is not a commit-timestamp column
    /// - `SchemaMismatch` for a missing or NULL primary key, a type
    ///   mismatch, or NULL in a NOT NULL column
    /// - `InvalidCommitTimestampLiteral` for a concrete non-null value in a
    ///   commit-timestamp column
    pub fn validate<'s>(&self, schema: &'s Schema) -> CoreResult<&'s TableSchema> {
        let table = schema
            .table(self.table())
            .ok_or_else(|| CoreError::schema(format!("table not found: {}", self.table())))?;
        let pk = table.primary_key();

        let Some(row) = self.row() else {
            let key = self.key(table).cloned().unwrap_or(Value::Null);
            return check_key(table, &key).map(|()| table);
        };

        for (name, cell) in row.iter() {
            let column = table.column(name).ok_or_else(|| {
                CoreError::schema(format!(
                    "column `{name}` not found in table `{}`",
                    table.name()
                ))
            })?;
            let kind = column.kind();
            match cell {
                ColumnValue::PendingCommitTimestamp if kind.is_commit_timestamp() => {}
                ColumnValue::PendingCommitTimestamp => {
                    return Err(CoreError::schema(format!(
                        "pending commit timestamp written to `{}`, which is not a commit timestamp column",
                        column.name()
                    )))
                }
                ColumnValue::Concrete(value) if kind.is_commit_timestamp() => {
                    if !value.is_null() {
                        return Err(CoreError::invalid_commit_timestamp_literal(column.name()));
                    }
                }
                ColumnValue::Concrete(value) => {
                    if value.is_null() && !kind.is_nullable() {
                        return Err(CoreError::schema_mismatch(format!(
                            "column `{}` is NOT NULL",
                            column.name()
                        )));
                    }
                    if !value.is_compatible_with(kind.scalar_type()) {
                        return Err(CoreError::schema_mismatch(format!(
                            "column `{}` expects {}, got {value}",
                            column.name(),
                            kind.scalar_type()
                        )));
                    }
                }
            }
        }

        let key = row
            .get(pk)
            .and_then(ColumnValue::as_concrete)
            .ok_or_else(|| CoreError::schema_mismatch(format!("row has no primary key `{pk}`")))?;
        check_key(table, key)?;

        if matches!(self, Self::Insert { .. } | Self::Replace { .. }) {
            if let Some(missing) = table
                .columns()
                .iter()
                .find(|c| !c.kind().is_nullable() && !row.contains(c.name()))
            {
                return Err(CoreError::schema_mismatch(format!(
                    "column `{}` is NOT NULL and has no value",
                    missing.name()
                )));
            }
        }
        Ok(table)
    }
}

fn check_key(table: &TableSchema, key: &Value) -> CoreResult<()> {
    let ty = table
        .column_kind(table.primary_key())
        .map(|k| k.scalar_type());
    match ty {
        Some(ty) if !key.is_null() && key.is_compatible_with(ty) => Ok(()),
        _ => Err(CoreError::schema_mismatch(format!(
            "invalid primary key {key} for table `{}`",
            table.name()
        ))),
    }
}

/// Expands `row` to every column of `table`, in declaration order.
fn full_row<V: CellValue>(table: &TableSchema, row: &Row<V>) -> CoreResult<Row<V>> {
    let full: Row<V> = table
        .columns()
        .iter()
        .map(|c| {
            let cell = row.get(c.name()).cloned().unwrap_or_else(|| V::from(Value::Null));
            (c.name().to_string(), cell)
        })
        .collect();
    check_not_null(table, &full)?;
    Ok(full)
}

fn check_not_null<V: CellValue>(table: &TableSchema, row: &Row<V>) -> CoreResult<()> {
    for column in table.columns() {
        if column.kind().is_nullable() {
            continue;
        }
        let is_null = row
            .get(column.name())
            .map_or(true, |v| v.concrete().is_some_and(Value::is_null));
        if is_null {
            return Err(CoreError::schema_mismatch(format!(
                "column `{}` is NOT NULL",
                column.name()
            )));
        }
    }
    Ok(())
}
