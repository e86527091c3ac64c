//! Stress tests for CommitDB.
//!
//! These run many read-modify-write transactions from several threads and
//! report how many committed, how many gave up, and how many attempts it
//! took.

use crate::fixtures::{Account, ACCOUNTS_TABLE};
use commitdb_codec::{CommitTimestamp, NullInt64, Value};
use commitdb_core::{Client, Context, CoreError, Statement};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that gave up after exhausting retries.
    pub aborted: usize,
    /// Transactions that failed for any other reason.
    pub failed: usize,
    /// Attempts made by committed transactions, summed.
    pub attempts: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Returns the number of transactions run.
    pub fn total(&self) -> usize {
        self.committed + self.aborted + self.failed
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.total());
        println!("Committed: {}", self.committed);
        println!("Aborted after retries: {}", self.aborted);
        println!("Failed: {}", self.failed);
        println!("Attempts (committed): {}", self.attempts);
        println!("Duration: {:?}", self.duration);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 100,
            threads: 4,
        }
    }
}

#[derive(Default)]
struct Counters {
    committed: AtomicUsize,
    aborted: AtomicUsize,
    failed: AtomicUsize,
    attempts: AtomicUsize,
}

impl Counters {
    fn record<T>(&self, result: &Result<(T, commitdb_core::CommitResponse), CoreError>) {
        match result {
            Ok((_, response)) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                self.attempts
                    .fetch_add(response.attempts as usize, Ordering::Relaxed);
            }
            Err(CoreError::CommitAborted { .. }) => {
                self.aborted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                debug!(error = %err, "stress transaction failed");
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn finish(&self, duration: Duration) -> StressTestResult {
        StressTestResult {
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            duration,
        }
    }
}

/// Creates an account with a zero balance and returns its key.
///
/// # Errors
///
/// Any error from the commit.
pub fn create_account(client: &Client) -> Result<String, CoreError> {
    let id = Uuid::new_v4().to_string();
    let account = Account {
        id: id.clone(),
        balance: 0,
        previous: NullInt64::null(),
        updated: CommitTimestamp::Pending,
    };
    client.read_write_transaction(&Context::background(), |txn| {
        txn.insert(ACCOUNTS_TABLE, &account)
    })?;
    Ok(id)
}

/// Reads the balance of account `id` in its own transaction.
///
/// # Errors
///
/// Any error from the query; `RowNotFound` if the account is missing.
pub fn balance(client: &Client, id: &str) -> Result<i64, CoreError> {
    let rows = client.query(
        &Context::background(),
        &Statement::new("SELECT balance FROM accounts WHERE id = @id").with_param("id", id),
    )?;
    match rows.first().and_then(|r| r.get("balance")) {
        Some(Value::Int64(balance)) => Ok(*balance),
        _ => Err(CoreError::row_not_found(ACCOUNTS_TABLE, Value::from(id))),
    }
}

/// Increments one account's balance in a read-modify-write transaction.
fn increment(
    client: &Client,
    id: &str,
) -> Result<((), commitdb_core::CommitResponse), CoreError> {
    let ctx = Context::background();
    client.read_write_transaction(&ctx, |txn| {
        let row = txn
            .read_row(&ctx, ACCOUNTS_TABLE, id, &["balance"])?
            .ok_or_else(|| CoreError::row_not_found(ACCOUNTS_TABLE, Value::from(id)))?;
        let current = match row.get("balance") {
            Some(Value::Int64(n)) => *n,
            _ => 0,
        };
        let statement = Statement::new(
            "UPDATE accounts SET balance = @next, previous = @current, \
             updated = PENDING_COMMIT_TIMESTAMP() WHERE id = @id",
        )
        .with_param("next", current + 1)
        .with_param("current", current)
        .with_param("id", id);
        txn.update(&ctx, &statement)?;
        Ok(())
    })
}

/// Runs `config.threads` threads that all increment the same account.
///
/// With no lost updates the final balance equals the number of committed
/// increments.
pub fn stress_contended_increments(
    client: &Client,
    id: &str,
    config: &StressConfig,
) -> StressTestResult {
    let counters = Arc::new(Counters::default());
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let client = client.clone();
            let counters = Arc::clone(&counters);
            let id = id.to_string();
            let operations = config.operations;
            thread::spawn(move || {
                for _ in 0..operations {
                    counters.record(&increment(&client, &id));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    counters.finish(start.elapsed())
}

/// Runs `config.threads` threads that each increment their own account.
///
/// Writers never share keys, so no transaction should need a retry.
pub fn stress_disjoint_increments(client: &Client, config: &StressConfig) -> StressTestResult {
    let counters = Arc::new(Counters::default());
    let ids: Vec<String> = (0..config.threads)
        .map(|_| create_account(client).expect("create account"))
        .collect();
    let start = Instant::now();

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let client = client.clone();
            let counters = Arc::clone(&counters);
            let operations = config.operations;
            thread::spawn(move || {
                for _ in 0..operations {
                    counters.record(&increment(&client, &id));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    counters.finish(start.elapsed())
}
