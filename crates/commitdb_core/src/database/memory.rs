//! In-memory multi-version store.

use super::{Database, RowStream};
use crate::config::IsolationLevel;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::mutation::Mutation;
use crate::types::{TransactionHandle, TransactionId};
use commitdb_codec::{decode_row, encode_row, Row, Schema, TableSchema, Timestamp, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// A multi-version in-memory store with snapshot reads and
/// first-committer-wins conflict detection.
///
/// Every committed write appends a version stamped with its commit
/// timestamp; rows are kept as CBOR payloads. A transaction reads the
/// newest version at or below its snapshot.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

struct Shared {
    schema: Arc<Schema>,
    state: RwLock<State>,
    next_txid: AtomicU64,
    closed: AtomicBool,
}

#[derive(Default)]
struct State {
    /// Table name (as declared) -> key -> versions, oldest first.
    tables: HashMap<String, BTreeMap<Value, Vec<Version>>>,
    last_commit: Timestamp,
    active: HashMap<TransactionId, ActiveTransaction>,
}

struct Version {
    commit_ts: Timestamp,
    /// `None` marks a deletion.
    payload: Option<Vec<u8>>,
}

struct ActiveTransaction {
    snapshot: Timestamp,
    isolation: IsolationLevel,
    reads: HashSet<(String, Value)>,
}

impl State {
    fn versions(&self, table: &str, key: &Value) -> Option<&Vec<Version>> {
        self.tables.get(table)?.get(key)
    }

    fn latest_commit(&self, table: &str, key: &Value) -> Option<Timestamp> {
        self.versions(table, key)?.last().map(|v| v.commit_ts)
    }

    fn latest_row(&self, table: &str, key: &Value) -> CoreResult<Option<Row>> {
        match self.versions(table, key).and_then(|v| v.last()) {
            Some(Version {
                payload: Some(payload),
                ..
            }) => Ok(Some(decode_row(payload)?)),
            _ => Ok(None),
        }
    }

    fn check_conflicts(
        &self,
        txn: &ActiveTransaction,
        writes: &[(&TableSchema, Value, Mutation)],
    ) -> CoreResult<()> {
        let newer = |table: &str, key: &Value| {
            self.latest_commit(table, key)
                .is_some_and(|ts| ts > txn.snapshot)
        };
        for (table, key, _) in writes {
            if newer(table.name(), key) {
                return Err(CoreError::conflict(table.name(), key.clone()));
            }
        }
        if txn.isolation == IsolationLevel::Serializable {
            for (table, key) in &txn.reads {
                if newer(table, key) {
                    return Err(CoreError::conflict(table.as_str(), key.clone()));
                }
            }
        }
        Ok(())
    }
}

fn visible(versions: &[Version], snapshot: Timestamp) -> Option<&Version> {
    versions.iter().rev().find(|v| v.commit_ts <= snapshot)
}

impl MemoryDatabase {
    /// Creates an empty store for `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            shared: Arc::new(Shared {
                schema: Arc::new(schema),
                state: RwLock::new(State::default()),
                next_txid: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the number of open transactions.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.shared.state.read().active.len()
    }

    /// Returns the timestamp of the latest commit.
    #[must_use]
    pub fn last_commit_timestamp(&self) -> Timestamp {
        self.shared.state.read().last_commit
    }

    /// Returns the number of committed versions of a row, deletions included.
    #[must_use]
    pub fn version_count(&self, table: &str, key: &Value) -> usize {
        let name = self
            .shared
            .schema
            .table(table)
            .map_or(table, TableSchema::name);
        self.shared
            .state
            .read()
            .versions(name, key)
            .map_or(0, Vec::len)
    }

    /// Returns true once the store has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        self.shared.ensure_open()
    }
}

impl Shared {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }
}

fn not_active(id: TransactionId) -> CoreError {
    CoreError::invalid_operation(format!("{id} is not active"))
}

impl Database for MemoryDatabase {
    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.shared.schema)
    }

    fn begin_read_write(
        &self,
        ctx: &Context,
        isolation: IsolationLevel,
    ) -> CoreResult<TransactionHandle> {
        ctx.check()?;
        self.ensure_open()?;

        let id = TransactionId::new(self.shared.next_txid.fetch_add(1, Ordering::SeqCst));
        let mut state = self.shared.state.write();
        let snapshot = state.last_commit;
        state.active.insert(
            id,
            ActiveTransaction {
                snapshot,
                isolation,
                reads: HashSet::new(),
            },
        );
        debug!(txn = %id, snapshot = %snapshot, "began read-write transaction");
        Ok(TransactionHandle::new(id, snapshot))
    }

    fn execute_snapshot_read(
        &self,
        handle: &TransactionHandle,
        table: &str,
    ) -> CoreResult<Box<dyn RowStream>> {
        self.ensure_open()?;
        let table = self
            .shared
            .schema
            .table(table)
            .ok_or_else(|| CoreError::schema(format!("table not found: {table}")))?;
        if !self.shared.state.read().active.contains_key(&handle.id()) {
            return Err(not_active(handle.id()));
        }
        Ok(Box::new(MemoryRowStream {
            shared: Arc::clone(&self.shared),
            txn: handle.id(),
            snapshot: handle.snapshot(),
            table: table.name().to_string(),
            last_key: None,
            exhausted: false,
        }))
    }

    fn record_read(&self, handle: &TransactionHandle, table: &str, key: &Value) -> CoreResult<()> {
        let mut state = self.shared.state.write();
        let txn = state
            .active
            .get_mut(&handle.id())
            .ok_or_else(|| not_active(handle.id()))?;
        if txn.isolation == IsolationLevel::Serializable {
            let name = self
                .shared
                .schema
                .table(table)
                .map_or(table, TableSchema::name);
            txn.reads.insert((name.to_string(), key.clone()));
        }
        Ok(())
    }

    fn apply_mutations_atomically(
        &self,
        handle: &TransactionHandle,
        mutations: Vec<Mutation>,
    ) -> CoreResult<Timestamp> {
        self.ensure_open()?;
        let schema = Arc::clone(&self.shared.schema);
        let mut state = self.shared.state.write();

        let mut writes = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            let table = mutation.validate(&schema)?;
            let key = mutation
                .key(table)
                .cloned()
                .ok_or_else(|| CoreError::schema_mismatch("mutation has no primary key"))?;
            writes.push((table, key, mutation));
        }

        {
            let txn = state
                .active
                .get(&handle.id())
                .ok_or_else(|| not_active(handle.id()))?;
            state.check_conflicts(txn, &writes)?;
        }

        // Strictly after every snapshot handed out so far.
        let commit_ts = state
            .last_commit
            .saturating_add_nanos(1)
            .max(Timestamp::now());

        let mut staged: BTreeMap<(String, Value), Option<Row>> = BTreeMap::new();
        for (table, key, mutation) in writes {
            let slot = (table.name().to_string(), key);
            let current = match staged.get(&slot) {
                Some(row) => row.clone(),
                None => state.latest_row(&slot.0, &slot.1)?,
            };
            let next = mutation
                .resolve(commit_ts)
                .apply_to(current.as_ref(), table)?;
            staged.insert(slot, next);
        }

        let mut encoded = Vec::with_capacity(staged.len());
        for (slot, row) in staged {
            let payload = row.as_ref().map(encode_row).transpose()?;
            encoded.push((slot, payload));
        }

        let count = encoded.len();
        for ((table, key), payload) in encoded {
            state
                .tables
                .entry(table)
                .or_default()
                .entry(key)
                .or_default()
                .push(Version { commit_ts, payload });
        }
        state.last_commit = commit_ts;
        state.active.remove(&handle.id());

        debug!(txn = %handle.id(), commit_ts = %commit_ts, rows = count, "applied mutations");
        Ok(commit_ts)
    }

    fn release(&self, handle: &TransactionHandle) {
        if self.shared.state.write().active.remove(&handle.id()).is_some() {
            debug!(txn = %handle.id(), "released transaction");
        }
    }

    fn close(&self) -> CoreResult<()> {
        let state = self.shared.state.read();
        if !state.active.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "cannot close with {} open transactions",
                state.active.len()
            )));
        }
        self.shared.closed.store(true, Ordering::SeqCst);
        debug!("database closed");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("last_commit", &self.last_commit_timestamp())
            .field("active_transactions", &self.active_transactions())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct MemoryRowStream {
    shared: Arc<Shared>,
    txn: TransactionId,
    snapshot: Timestamp,
    table: String,
    last_key: Option<Value>,
    exhausted: bool,
}

impl RowStream for MemoryRowStream {
    fn next_batch(&mut self, ctx: &Context, max_rows: usize) -> CoreResult<Option<Vec<Row>>> {
        if self.exhausted {
            return Ok(None);
        }
        ctx.check()?;
        self.shared.ensure_open()?;
        let max_rows = max_rows.max(1);

        let mut rows = Vec::new();
        let mut last_scanned = None;
        let mut reached_end = true;
        {
            let state = self.shared.state.read();
            if !state.active.contains_key(&self.txn) {
                return Err(not_active(self.txn));
            }

            if let Some(table) = state.tables.get(&self.table) {
                let lower = self
                    .last_key
                    .as_ref()
                    .map_or(Bound::Unbounded, Bound::Excluded);
                for (key, versions) in table.range::<Value, _>((lower, Bound::Unbounded)) {
                    if rows.len() == max_rows {
                        reached_end = false;
                        break;
                    }
                    if let Some(Version {
                        payload: Some(payload),
                        ..
                    }) = visible(versions, self.snapshot)
                    {
                        rows.push(decode_row(payload)?);
                    }
                    last_scanned = Some(key);
                }
            }
            if let Some(last) = last_scanned {
                self.last_key = Some(last.clone());
            }
        }

        if reached_end {
            self.exhausted = true;
        }

        trace!(txn = %self.txn, table = %self.table, rows = rows.len(), "fetched batch");
        if rows.is_empty() && self.exhausted {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitdb_codec::{ColumnValue, ScalarType};

    fn schema() -> Schema {
        Schema::new()
            .with_table(
                TableSchema::builder("test")
                    .required("id", ScalarType::String)
                    .nullable("n", ScalarType::Int64)
                    .commit_timestamp("t1")
                    .primary_key("id")
                    .build()
                    .unwrap(),
            )
            .unwrap()
    }

    fn begin(db: &MemoryDatabase) -> TransactionHandle {
        db.begin_read_write(&Context::background(), IsolationLevel::Snapshot)
            .unwrap()
    }

    fn insert(id: &str, n: i64) -> Mutation {
        Mutation::insert(
            "test",
            Row::new()
                .with("id", Value::from(id))
                .with("n", Value::Int64(n)),
        )
    }

    fn scan(db: &MemoryDatabase, handle: &TransactionHandle, batch: usize) -> Vec<Row> {
        let mut stream = db.execute_snapshot_read(handle, "test").unwrap();
        let mut rows = Vec::new();
        while let Some(batch) = stream.next_batch(&Context::background(), batch).unwrap() {
            rows.extend(batch);
        }
        rows
    }

    #[test]
    fn commit_timestamp_exceeds_snapshot() {
        let db = MemoryDatabase::new(schema());
        let handle = begin(&db);
        let ts = db
            .apply_mutations_atomically(
                &handle,
                vec![Mutation::insert(
                    "test",
                    Row::new()
                        .with("id", Value::from("x"))
                        .with("t1", ColumnValue::PendingCommitTimestamp),
                )],
            )
            .unwrap();
        assert!(ts > handle.snapshot());
        assert_eq!(db.last_commit_timestamp(), ts);
        assert_eq!(db.active_transactions(), 0);

        let reader = begin(&db);
        let rows = scan(&db, &reader, 10);
        assert_eq!(rows[0].get("t1"), Some(&Value::Timestamp(ts)));
        db.release(&reader);
    }

    #[test]
    fn snapshot_isolation_reader_sees_old_version() {
        let db = MemoryDatabase::new(schema());
        let writer = begin(&db);
        db.apply_mutations_atomically(&writer, vec![insert("a", 1)])
            .unwrap();

        let reader = begin(&db);
        let writer = begin(&db);
        db.apply_mutations_atomically(
            &writer,
            vec![Mutation::update(
                "test",
                Row::new()
                    .with("id", Value::from("a"))
                    .with("n", Value::Int64(2)),
            )],
        )
        .unwrap();

        let rows = scan(&db, &reader, 10);
        assert_eq!(rows[0].get("n"), Some(&Value::Int64(1)));
        assert_eq!(db.version_count("TEST", &Value::from("a")), 2);
    }

    #[test]
    fn first_committer_wins() {
        let db = MemoryDatabase::new(schema());
        let setup = begin(&db);
        db.apply_mutations_atomically(&setup, vec![insert("a", 0)])
            .unwrap();

        let first = begin(&db);
        let second = begin(&db);
        db.apply_mutations_atomically(&first, vec![Mutation::delete("test", "a")])
            .unwrap();
        let err = db
            .apply_mutations_atomically(&second, vec![Mutation::delete("test", "a")])
            .unwrap_err();
        assert!(err.is_retryable());
        // The failed handle stays open until released.
        assert_eq!(db.active_transactions(), 1);
        db.release(&second);
        db.release(&second);
        assert_eq!(db.active_transactions(), 0);
    }

    #[test]
    fn serializable_checks_reads() {
        let db = MemoryDatabase::new(schema());
        let setup = begin(&db);
        db.apply_mutations_atomically(&setup, vec![insert("a", 0), insert("b", 0)])
            .unwrap();

        let reader = db
            .begin_read_write(&Context::background(), IsolationLevel::Serializable)
            .unwrap();
        db.record_read(&reader, "TEST", &Value::from("a")).unwrap();

        let writer = begin(&db);
        db.apply_mutations_atomically(&writer, vec![Mutation::delete("test", "a")])
            .unwrap();

        let err = db
            .apply_mutations_atomically(&reader, vec![insert("c", 0)])
            .unwrap_err();
        assert_eq!(err, CoreError::conflict("test", Value::from("a")));
    }

    #[test]
    fn scanned_rows_are_not_reads_until_recorded() {
        let db = MemoryDatabase::new(schema());
        let setup = begin(&db);
        db.apply_mutations_atomically(&setup, vec![insert("a", 0), insert("b", 0)])
            .unwrap();

        let serializable = || {
            db.begin_read_write(&Context::background(), IsolationLevel::Serializable)
                .unwrap()
        };
        let reader = serializable();
        assert_eq!(scan(&db, &reader, 1).len(), 2);
        db.record_read(&reader, "test", &Value::from("b")).unwrap();

        let writer = begin(&db);
        db.apply_mutations_atomically(&writer, vec![Mutation::delete("test", "a")])
            .unwrap();
        db.apply_mutations_atomically(&reader, vec![insert("c", 0)])
            .unwrap();

        // Snapshot isolation keeps no read set.
        let snapshot = begin(&db);
        db.record_read(&snapshot, "test", &Value::from("c")).unwrap();
        let writer = begin(&db);
        db.apply_mutations_atomically(&writer, vec![Mutation::delete("test", "c")])
            .unwrap();
        db.apply_mutations_atomically(&snapshot, vec![insert("d", 0)])
            .unwrap();

        let released = serializable();
        db.release(&released);
        assert!(db.record_read(&released, "test", &Value::from("a")).is_err());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let db = MemoryDatabase::new(schema());
        let handle = begin(&db);
        let err = db
            .apply_mutations_atomically(
                &handle,
                vec![
                    insert("a", 1),
                    Mutation::update(
                        "test",
                        Row::new()
                            .with("id", Value::from("missing"))
                            .with("n", Value::Int64(1)),
                    ),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::RowNotFound { .. }));
        assert!(scan(&db, &handle, 10).is_empty());
        db.release(&handle);
    }

    #[test]
    fn mutations_in_one_batch_see_each_other() {
        let db = MemoryDatabase::new(schema());
        let handle = begin(&db);
        db.apply_mutations_atomically(
            &handle,
            vec![
                insert("a", 1),
                Mutation::update(
                    "test",
                    Row::new()
                        .with("id", Value::from("a"))
                        .with("n", Value::Int64(5)),
                ),
            ],
        )
        .unwrap();
        let reader = begin(&db);
        let rows = scan(&db, &reader, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Value::Int64(5)));
        assert_eq!(db.version_count("test", &Value::from("a")), 1);
        db.release(&reader);
    }

    #[test]
    fn stream_batches_in_key_order() {
        let db = MemoryDatabase::new(schema());
        let setup = begin(&db);
        db.apply_mutations_atomically(
            &setup,
            vec![insert("c", 3), insert("a", 1), insert("b", 2)],
        )
        .unwrap();

        let reader = begin(&db);
        let mut stream = db.execute_snapshot_read(&reader, "test").unwrap();
        let ctx = Context::background();
        let first = stream.next_batch(&ctx, 2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get("id"), Some(&Value::from("a")));
        let second = stream.next_batch(&ctx, 2).unwrap().unwrap();
        assert_eq!(second[0].get("id"), Some(&Value::from("c")));
        assert!(stream.next_batch(&ctx, 2).unwrap().is_none());
        assert!(stream.next_batch(&ctx, 2).unwrap().is_none());
    }

    #[test]
    fn stream_fails_after_release() {
        let db = MemoryDatabase::new(schema());
        let handle = begin(&db);
        let mut stream = db.execute_snapshot_read(&handle, "test").unwrap();
        db.release(&handle);
        assert!(matches!(
            stream.next_batch(&Context::background(), 10),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn close_lifecycle() {
        let db = MemoryDatabase::new(schema());
        let handle = begin(&db);
        assert!(matches!(db.close(), Err(CoreError::InvalidOperation { .. })));
        db.release(&handle);
        db.close().unwrap();
        assert!(db.is_closed());
        assert_eq!(
            db.begin_read_write(&Context::background(), IsolationLevel::Snapshot),
            Err(CoreError::DatabaseClosed)
        );
    }

    #[test]
    fn unknown_table() {
        let db = MemoryDatabase::new(schema());
        let handle = begin(&db);
        assert!(matches!(
            db.execute_snapshot_read(&handle, "nope"),
            Err(CoreError::Schema { .. })
        ));
    }
}
