//! Test fixtures and database helpers.
//!
//! Provides a standard schema, matching record types, and in-memory
//! databases wired to a [`Client`].

use commitdb_codec::{CommitTimestamp, NullInt64, NullTime, ScalarType, Schema, TableSchema};
use commitdb_core::{Client, Config, Database, MemoryDatabase, RetryConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Name of the table with two commit-timestamp columns.
pub const TEST_TABLE: &str = "test";

/// Name of the table used by contention tests.
pub const ACCOUNTS_TABLE: &str = "accounts";

/// A row of [`TEST_TABLE`] as read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRow {
    /// Primary key.
    pub id: String,
    /// First commit-timestamp column.
    pub t1: NullTime,
    /// Second commit-timestamp column.
    pub t2: NullTime,
}

impl TestRow {
    /// A row with both timestamps NULL.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            t1: NullTime::null(),
            t2: NullTime::null(),
        }
    }
}

/// A row of [`TEST_TABLE`] for writing with commit timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedRow {
    /// Primary key.
    pub id: String,
    /// First commit-timestamp column.
    pub t1: CommitTimestamp,
    /// Second commit-timestamp column.
    pub t2: CommitTimestamp,
}

impl StampedRow {
    /// A row with both timestamps set at commit.
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            t1: CommitTimestamp::Pending,
            t2: CommitTimestamp::Pending,
        }
    }
}

/// A row of [`ACCOUNTS_TABLE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Primary key.
    pub id: String,
    /// Current balance.
    pub balance: i64,
    /// Previous balance, if any.
    pub previous: NullInt64,
    /// Commit timestamp of the last change.
    pub updated: CommitTimestamp,
}

/// Returns the schema every fixture uses.
///
/// ```text
/// test     (id STRING NOT NULL, t1 TIMESTAMP commit, t2 TIMESTAMP commit) PK id
/// accounts (id STRING NOT NULL, balance INT64 NOT NULL, previous INT64,
///           updated TIMESTAMP commit) PK id
/// ```
pub fn test_schema() -> Schema {
    let test = TableSchema::builder(TEST_TABLE)
        .required("id", ScalarType::String)
        .commit_timestamp("t1")
        .commit_timestamp("t2")
        .primary_key("id")
        .build()
        .expect("valid test table");
    let accounts = TableSchema::builder(ACCOUNTS_TABLE)
        .required("id", ScalarType::String)
        .required("balance", ScalarType::Int64)
        .nullable("previous", ScalarType::Int64)
        .commit_timestamp("updated")
        .primary_key("id")
        .build()
        .expect("valid accounts table");
    Schema::new()
        .with_table(test)
        .and_then(|s| s.with_table(accounts))
        .expect("valid schema")
}

/// Retry settings with short delays, for tests.
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
}

/// An in-memory database and a client over it.
pub struct TestDatabase {
    /// The store, for inspecting internals.
    pub db: Arc<MemoryDatabase>,
    /// A client over `db`.
    pub client: Client,
}

impl TestDatabase {
    /// Creates a database over [`test_schema`] with default settings.
    pub fn memory() -> Self {
        Self::with_config(Config::default().retry(fast_retry(5)))
    }

    /// Creates a database over [`test_schema`] with `config`.
    pub fn with_config(config: Config) -> Self {
        let db = Arc::new(MemoryDatabase::new(test_schema()));
        let client = Client::new(Arc::clone(&db) as Arc<dyn Database>, config);
        Self { db, client }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Runs a test with a fresh in-memory database.
///
/// # Example
///
/// ```
/// use commitdb_core::Context;
/// use commitdb_testkit::{with_test_db, TestRow, TEST_TABLE};
///
/// with_test_db(|db| {
///     let ctx = Context::background();
///     db.read_write_transaction(&ctx, |txn| txn.insert(TEST_TABLE, &TestRow::new("x")))
///         .unwrap();
/// });
/// ```
pub fn with_test_db<F, R>(f: F) -> R
where
    F: FnOnce(&TestDatabase) -> R,
{
    let db = TestDatabase::memory();
    f(&db)
}
