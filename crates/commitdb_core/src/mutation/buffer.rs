//! Ordered buffer of a transaction's mutations.

use super::Mutation;
use crate::error::{CoreError, CoreResult};
use commitdb_codec::{ColumnValue, Row, TableSchema, Value};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Mutations issued by one transaction, in issue order.
///
/// Nothing here touches the store; the buffer is drained once, at commit.
#[derive(Debug, Clone)]
pub struct MutationBuffer {
    mutations: Vec<Mutation>,
    limit: usize,
}

impl MutationBuffer {
    /// Creates an empty buffer holding at most `limit` mutations.
    pub fn new(limit: usize) -> Self {
        Self {
            mutations: Vec::new(),
            limit,
        }
    }

    /// Appends a mutation.
    ///
    /// # Errors
    ///
    /// Returns `TooManyMutations` if the buffer is full.
    pub fn add(&mut self, mutation: Mutation) -> CoreResult<()> {
        if self.mutations.len() >= self.limit {
            return Err(CoreError::TooManyMutations { limit: self.limit });
        }
        self.mutations.push(mutation);
        Ok(())
    }

    /// Removes and returns every mutation, in issue order.
    pub fn drain(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }

    /// Discards every mutation.
    pub fn clear(&mut self) {
        self.mutations.clear();
    }

    /// Returns the number of buffered mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Iterates over the buffered mutations in issue order.
    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }

    /// Folds the mutations targeting `table` into a per-key overlay.
    ///
    /// The buffer is left untouched.
    pub fn peek(&self, table: &TableSchema) -> BufferView {
        let mut overlays: BTreeMap<Value, Overlay> = BTreeMap::new();
        for mutation in &self.mutations {
            if !mutation.table().eq_ignore_ascii_case(table.name()) {
                continue;
            }
            let Some(key) = mutation.key(table).cloned() else {
                continue;
            };
            let previous = overlays.remove(&key);
            let overlay = Overlay::fold(previous, mutation, &key);
            overlays.insert(key, overlay);
        }
        BufferView { overlays }
    }
}

/// The buffered effect on one row, relative to the snapshot.
///
/// Commit replays the row's mutations against whatever the store holds, so
/// the overlay carries one outcome for a row present in the snapshot and
/// one for a row that is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    present: Effect,
    absent: Effect,
}

/// The outcome of a run of mutations on one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The row does not exist.
    Deleted,
    /// Listed columns of the existing row change.
    Patched(Row<ColumnValue>),
    /// The row is replaced wholesale; unlisted columns are NULL.
    Replaced(Row<ColumnValue>),
    /// Commit fails with this error.
    Rejected(CoreError),
}

impl Overlay {
    fn untouched() -> Self {
        Self {
            present: Effect::Patched(Row::new()),
            absent: Effect::Deleted,
        }
    }

    fn fold(previous: Option<Overlay>, mutation: &Mutation, key: &Value) -> Overlay {
        let Overlay { present, absent } = previous.unwrap_or_else(Self::untouched);
        Overlay {
            present: present.then(mutation, key),
            absent: absent.then(mutation, key),
        }
    }

    /// Returns the outcome for a row the snapshot holds.
    pub fn present(&self) -> &Effect {
        &self.present
    }

    /// Returns the outcome for a row the snapshot lacks.
    pub fn absent(&self) -> &Effect {
        &self.absent
    }

    /// Applies the overlay to the snapshot row `base`.
    ///
    /// The result lists every column of `table` in declaration order, or is
    /// `None` if the row does not exist in the transaction's view.
    ///
    /// # Errors
    ///
    /// `RowNotFound` or `RowAlreadyExists` when commit would reject the
    /// row's mutations.
    pub fn apply(
        &self,
        base: Option<&Row>,
        table: &TableSchema,
    ) -> CoreResult<Option<Row<ColumnValue>>> {
        let effect = if base.is_some() { &self.present } else { &self.absent };
        match (effect, base) {
            (Effect::Rejected(err), _) => Err(err.clone()),
            (Effect::Deleted, _) | (Effect::Patched(_), None) => Ok(None),
            (Effect::Replaced(row), _) => Ok(Some(full_view(table, row))),
            (Effect::Patched(row), Some(base)) => {
                let mut out: Row<ColumnValue> = base.clone().into();
                out.merge(row.clone());
                Ok(Some(out))
            }
        }
    }
}

impl Effect {
    /// Follows one more mutation, the way commit applies it.
    fn then(self, mutation: &Mutation, key: &Value) -> Effect {
        let merged = |mut base: Row<ColumnValue>, row: &Row<ColumnValue>| {
            base.merge(row.clone());
            base
        };
        match (self, mutation) {
            (rejected @ Effect::Rejected(_), _) => rejected,
            (_, Mutation::Delete { .. }) => Effect::Deleted,
            (_, Mutation::Replace { row, .. })
            | (
                Effect::Deleted,
                Mutation::Insert { row, .. } | Mutation::InsertOrUpdate { row, .. },
            ) => Effect::Replaced(row.clone()),
            (Effect::Deleted, Mutation::Update { .. }) => {
                Effect::Rejected(CoreError::row_not_found(mutation.table(), key.clone()))
            }
            (Effect::Patched(_) | Effect::Replaced(_), Mutation::Insert { .. }) => {
                Effect::Rejected(CoreError::row_already_exists(mutation.table(), key.clone()))
            }
            (
                Effect::Patched(base),
                Mutation::Update { row, .. } | Mutation::InsertOrUpdate { row, .. },
            ) => Effect::Patched(merged(base, row)),
            (
                Effect::Replaced(base),
                Mutation::Update { row, .. } | Mutation::InsertOrUpdate { row, .. },
            ) => Effect::Replaced(merged(base, row)),
        }
    }
}

fn full_view(table: &TableSchema, row: &Row<ColumnValue>) -> Row<ColumnValue> {
    table
        .columns()
        .iter()
        .map(|c| {
            let cell = row
                .get(c.name())
                .cloned()
                .unwrap_or(ColumnValue::Concrete(Value::Null));
            (c.name().to_string(), cell)
        })
        .collect()
}

/// A transaction's buffered changes to one table, keyed by primary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferView {
    overlays: BTreeMap<Value, Overlay>,
}

impl BufferView {
    /// Returns the overlay for `key`.
    pub fn get(&self, key: &Value) -> Option<&Overlay> {
        self.overlays.get(key)
    }

    /// Returns the first buffered key strictly greater than `after`
    /// (or the first key when `after` is `None`).
    pub fn next_key(&self, after: Option<&Value>) -> Option<&Value> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.overlays
            .range::<Value, _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, _)| k)
    }

    /// Iterates over keys and overlays in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Overlay)> {
        self.overlays.iter()
    }

    /// Returns the number of keys touched.
    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    /// Returns true if nothing is buffered for the table.
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitdb_codec::ScalarType;

    fn table() -> TableSchema {
        TableSchema::builder("test")
            .required("id", ScalarType::String)
            .nullable("n", ScalarType::Int64)
            .commit_timestamp("t1")
            .primary_key("id")
            .build()
            .unwrap()
    }

    fn row(id: &str) -> Row<ColumnValue> {
        Row::new().with("id", Value::from(id))
    }

    #[test]
    fn add_respects_limit() {
        let mut buffer = MutationBuffer::new(2);
        buffer.add(Mutation::delete("test", "a")).unwrap();
        buffer.add(Mutation::delete("test", "b")).unwrap();
        assert_eq!(
            buffer.add(Mutation::delete("test", "c")),
            Err(CoreError::TooManyMutations { limit: 2 })
        );
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn drain_preserves_issue_order() {
        let mut buffer = MutationBuffer::new(10);
        buffer.add(Mutation::insert("test", row("b"))).unwrap();
        buffer.add(Mutation::insert("test", row("a"))).unwrap();
        let drained = buffer.drain();
        assert!(buffer.is_empty());
        assert_eq!(drained[0], Mutation::insert("test", row("b")));
        assert_eq!(drained[1], Mutation::insert("test", row("a")));
    }

    #[test]
    fn peek_folds_per_key() {
        let table = table();
        let mut buffer = MutationBuffer::new(10);
        buffer
            .add(Mutation::update("test", row("a").with("n", Value::Int64(1))))
            .unwrap();
        buffer
            .add(Mutation::update(
                "test",
                row("a").with("t1", ColumnValue::PendingCommitTimestamp),
            ))
            .unwrap();
        buffer.add(Mutation::insert("test", row("b"))).unwrap();
        buffer.add(Mutation::delete("test", "c")).unwrap();
        buffer.add(Mutation::delete("other", "a")).unwrap();

        let view = buffer.peek(&table);
        assert_eq!(view.len(), 3);
        assert_eq!(buffer.len(), 5);

        let a = view.get(&Value::from("a")).unwrap();
        let Effect::Patched(patch) = a.present() else {
            panic!("expected a patch");
        };
        assert_eq!(patch.get("n"), Some(&ColumnValue::Concrete(Value::Int64(1))));
        assert!(patch.has_pending());
        assert!(matches!(a.absent(), Effect::Rejected(CoreError::RowNotFound { .. })));

        let b = view.get(&Value::from("b")).unwrap();
        assert!(matches!(b.absent(), Effect::Replaced(_)));
        assert!(matches!(b.present(), Effect::Rejected(CoreError::RowAlreadyExists { .. })));

        let c = view.get(&Value::from("c")).unwrap();
        assert_eq!(c.present(), &Effect::Deleted);
        assert_eq!(c.absent(), &Effect::Deleted);
    }

    #[test]
    fn delete_then_upsert_replaces() {
        let table = table();
        let mut buffer = MutationBuffer::new(10);
        buffer.add(Mutation::delete("test", "a")).unwrap();
        buffer
            .add(Mutation::insert_or_update("test", row("a").with("n", Value::Int64(4))))
            .unwrap();
        let view = buffer.peek(&table);

        let base: Row = Row::new().with("id", "a").with("n", 1i64).with("t1", Value::Null);
        let visible = view
            .get(&Value::from("a"))
            .unwrap()
            .apply(Some(&base), &table)
            .unwrap()
            .unwrap();
        assert_eq!(visible.get("n"), Some(&ColumnValue::Concrete(Value::Int64(4))));
    }

    #[test]
    fn upsert_after_update_of_missing_row_still_fails() {
        let table = table();
        let mut buffer = MutationBuffer::new(10);
        buffer
            .add(Mutation::update("test", row("ghost").with("n", Value::Int64(1))))
            .unwrap();
        buffer
            .add(Mutation::insert_or_update("test", row("ghost").with("n", Value::Int64(2))))
            .unwrap();
        let view = buffer.peek(&table);
        let overlay = view.get(&Value::from("ghost")).unwrap();

        let expected = buffer
            .iter()
            .try_fold(None, |row: Option<Row<ColumnValue>>, m| m.apply_to(row.as_ref(), &table));
        assert!(matches!(expected, Err(CoreError::RowNotFound { .. })));
        assert!(matches!(
            overlay.apply(None, &table),
            Err(CoreError::RowNotFound { .. })
        ));

        let base: Row = Row::new().with("id", "ghost").with("n", 0i64).with("t1", Value::Null);
        let visible = overlay.apply(Some(&base), &table).unwrap().unwrap();
        assert_eq!(visible.get("n"), Some(&ColumnValue::Concrete(Value::Int64(2))));
    }

    #[test]
    fn insert_after_update_fails_either_way() {
        let table = table();
        let mut buffer = MutationBuffer::new(10);
        buffer.add(Mutation::update("test", row("a"))).unwrap();
        buffer.add(Mutation::insert("test", row("a"))).unwrap();
        let view = buffer.peek(&table);
        let overlay = view.get(&Value::from("a")).unwrap();

        let base: Row = Row::new().with("id", "a").with("n", 1i64).with("t1", Value::Null);
        assert!(matches!(
            overlay.apply(Some(&base), &table),
            Err(CoreError::RowAlreadyExists { .. })
        ));
        assert!(matches!(
            overlay.apply(None, &table),
            Err(CoreError::RowNotFound { .. })
        ));
    }

    #[test]
    fn insert_over_existing_row_is_rejected() {
        let table = table();
        let mut buffer = MutationBuffer::new(10);
        buffer.add(Mutation::insert("test", row("a"))).unwrap();
        let view = buffer.peek(&table);
        let overlay = view.get(&Value::from("a")).unwrap();

        let base: Row = Row::new().with("id", "a").with("n", 1i64).with("t1", Value::Null);
        assert!(matches!(
            overlay.apply(Some(&base), &table),
            Err(CoreError::RowAlreadyExists { .. })
        ));
        let created = overlay.apply(None, &table).unwrap().unwrap();
        assert_eq!(created.get("n"), Some(&ColumnValue::Concrete(Value::Null)));
    }

    #[test]
    fn overlay_apply() {
        let table = table();
        let base: Row = Row::new().with("id", "a").with("n", 1i64).with("t1", Value::Null);
        let mut buffer = MutationBuffer::new(10);
        buffer
            .add(Mutation::update(
                "test",
                row("a").with("t1", ColumnValue::PendingCommitTimestamp),
            ))
            .unwrap();
        buffer.add(Mutation::replace("test", row("b"))).unwrap();
        buffer.add(Mutation::delete("test", "c")).unwrap();
        let view = buffer.peek(&table);

        let patch = view.get(&Value::from("a")).unwrap();
        let visible = patch.apply(Some(&base), &table).unwrap().unwrap();
        assert_eq!(visible.get("n"), Some(&ColumnValue::Concrete(Value::Int64(1))));
        assert_eq!(visible.get("t1"), Some(&ColumnValue::PendingCommitTimestamp));

        let replaced = view
            .get(&Value::from("b"))
            .unwrap()
            .apply(Some(&base), &table)
            .unwrap()
            .unwrap();
        assert_eq!(replaced.get("n"), Some(&ColumnValue::Concrete(Value::Null)));
        assert_eq!(replaced.len(), 3);

        let deleted = view.get(&Value::from("c")).unwrap();
        assert_eq!(deleted.apply(Some(&base), &table), Ok(None));
        assert_eq!(deleted.apply(None, &table), Ok(None));
    }

    #[test]
    fn next_key_walks_in_order() {
        let table = table();
        let mut buffer = MutationBuffer::new(10);
        for key in ["c", "a", "b"] {
            buffer.add(Mutation::delete("test", key)).unwrap();
        }
        let view = buffer.peek(&table);
        assert_eq!(view.next_key(None), Some(&Value::from("a")));
        assert_eq!(view.next_key(Some(&Value::from("a"))), Some(&Value::from("b")));
        assert_eq!(view.next_key(Some(&Value::from("c"))), None);
    }
}
