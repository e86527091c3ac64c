//! Rows: ordered column name to value mappings.

use crate::error::CodecResult;
use crate::value::{ColumnValue, Timestamp, Value};
use serde::de::DeserializeOwned;

/// An ordered mapping from column name to value.
///
/// `Row<Value>` (the default) holds committed or visible values.
/// `Row<ColumnValue>` is a row on its way through the mutation buffer and
/// may still carry the pending commit timestamp marker.
///
/// Column names compare ASCII case-insensitively. Setting an existing
/// column replaces its value in place, keeping the original position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row<V = Value> {
    columns: Vec<(String, V)>,
}

impl<V> Default for Row<V> {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
        }
    }
}

impl<V> Row<V> {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty row with room for `capacity` columns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Sets a column, replacing any previous value.
    pub fn set(&mut self, column: impl Into<String>, value: V) {
        let column = column.into();
        match self
            .columns
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(&column))
        {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Sets a column, builder style.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<V>) -> Self {
        self.set(column, value.into());
        self
    }

    /// Returns the value of a column.
    pub fn get(&self, column: &str) -> Option<&V> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    /// Removes a column and returns its value.
    pub fn remove(&mut self, column: &str) -> Option<V> {
        let idx = self
            .columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(column))?;
        Some(self.columns.remove(idx).1)
    }

    /// Returns true if the row has the column.
    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates over `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.columns.iter().map(|(name, v)| (name.as_str(), v))
    }

    /// Returns the column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Overlays every column of `other` onto this row (last writer wins).
    pub fn merge(&mut self, other: Row<V>) {
        for (column, value) in other.columns {
            self.set(column, value);
        }
    }

    /// Consumes the row, returning its columns.
    pub fn into_columns(self) -> Vec<(String, V)> {
        self.columns
    }
}

impl Row<Value> {
    /// Decodes this row into a record.
    ///
    /// # Errors
    ///
    /// See [`crate::decode_record`].
    pub fn decode<T: DeserializeOwned>(&self) -> CodecResult<T> {
        crate::decode_record(self)
    }
}

impl Row<ColumnValue> {
    /// Returns true if any column carries the pending commit timestamp marker.
    pub fn has_pending(&self) -> bool {
        self.columns.iter().any(|(_, v)| v.is_pending())
    }

    /// Replaces every pending marker with `commit_ts`.
    #[must_use]
    pub fn resolve(self, commit_ts: Timestamp) -> Row<Value> {
        self.columns
            .into_iter()
            .map(|(name, v)| (name, v.resolve(commit_ts)))
            .collect()
    }
}

impl From<Row<Value>> for Row<ColumnValue> {
    fn from(row: Row<Value>) -> Self {
        row.columns
            .into_iter()
            .map(|(name, v)| (name, ColumnValue::Concrete(v)))
            .collect()
    }
}

impl<V, S: Into<String>> FromIterator<(S, V)> for Row<V> {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (name, value) in iter {
            row.set(name, value);
        }
        row
    }
}

impl<V> IntoIterator for Row<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut row: Row = Row::new().with("id", "x").with("t1", Value::Null);
        row.set("ID", Value::from("y"));
        assert_eq!(row.len(), 2);
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["id", "t1"]);
        assert_eq!(row.get("id"), Some(&Value::from("y")));
    }

    #[test]
    fn merge_last_writer_wins() {
        let mut base: Row = Row::new().with("id", "x").with("n", 1i64);
        base.merge(Row::new().with("n", 2i64).with("s", "new"));
        assert_eq!(base.get("n"), Some(&Value::Int64(2)));
        assert_eq!(base.get("s"), Some(&Value::from("new")));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn resolve_replaces_every_pending_marker() {
        let ts = Timestamp::from_unix_nanos(1_000);
        let row: Row<ColumnValue> = Row::new()
            .with("id", Value::from("x"))
            .with("t1", ColumnValue::PendingCommitTimestamp)
            .with("t2", ColumnValue::PendingCommitTimestamp);
        assert!(row.has_pending());

        let resolved = row.resolve(ts);
        assert_eq!(resolved.get("t1"), Some(&Value::Timestamp(ts)));
        assert_eq!(resolved.get("t2"), Some(&Value::Timestamp(ts)));
        assert_eq!(resolved.get("id"), Some(&Value::from("x")));
    }

    #[test]
    fn remove_column() {
        let mut row: Row = Row::new().with("a", 1i64).with("b", 2i64);
        assert_eq!(row.remove("A"), Some(Value::Int64(1)));
        assert!(!row.contains("a"));
        assert_eq!(row.remove("a"), None);
    }
}
