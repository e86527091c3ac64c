//! The entry point: runs transaction bodies with bounded retry.

use crate::config::Config;
use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::mutation::Mutation;
use crate::statement::Statement;
use crate::transaction::{Transaction, TransactionState};
use crate::types::CommitResponse;
use commitdb_codec::Row;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A handle on a [`Database`] that runs read-write transactions.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Client {
    db: Arc<dyn Database>,
    config: Config,
}

impl Client {
    /// Creates a client over `db`.
    pub fn new(db: Arc<dyn Database>, config: Config) -> Self {
        Self { db, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the underlying store.
    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Creates an idle transaction for manual control.
    ///
    /// Manual transactions are not retried.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.db), self.config.clone())
    }

    /// Runs `body` in a read-write transaction and commits it.
    ///
    /// Each attempt gets a fresh transaction and snapshot. If the body or
    /// the commit fails with a conflict, the attempt is rolled back and
    /// `body` runs again after a backoff, up to
    /// [`RetryConfig::max_attempts`](crate::RetryConfig) attempts in total.
    /// The body must therefore be safe to run more than once. Any other
    /// error rolls back and is returned as is; `body` is not re-run.
    ///
    /// # Errors
    ///
    /// - `CommitAborted` once every attempt has conflicted, carrying the
    ///   last conflict
    /// - context errors, also while waiting between attempts
    /// - any non-retryable error from `body` or the commit
    pub fn read_write_transaction<T, F>(
        &self,
        ctx: &Context,
        mut body: F,
    ) -> CoreResult<(T, CommitResponse)>
    where
        F: FnMut(&mut Transaction) -> CoreResult<T>,
    {
        let max_attempts = self.config.retry.max_attempts;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(ctx, &mut body) {
                Ok((value, response)) => {
                    return Ok((
                        value,
                        CommitResponse {
                            attempts: attempt,
                            ..response
                        },
                    ))
                }
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "giving up after repeated conflicts");
                return Err(CoreError::CommitAborted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.config.retry.delay_for_attempt(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transaction conflicted, retrying"
            );
            wait(ctx, delay)?;
        }
    }

    fn attempt<T, F>(&self, ctx: &Context, body: &mut F) -> CoreResult<(T, CommitResponse)>
    where
        F: FnMut(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.transaction();
        txn.begin(ctx)?;
        let value = match body(&mut txn) {
            Ok(value) => value,
            Err(err) => {
                if txn.state() == TransactionState::Open {
                    txn.rollback()?;
                }
                debug!(error = %err, "transaction body failed");
                return Err(err);
            }
        };
        match txn.state() {
            TransactionState::Open => {}
            state => {
                return Err(CoreError::invalid_operation(format!(
                    "transaction body left the transaction {state}"
                )))
            }
        }
        let response = txn.commit(ctx)?;
        Ok((value, response))
    }

    /// Applies `mutations` in a transaction of their own, with retry.
    ///
    /// # Errors
    ///
    /// As [`Client::read_write_transaction`].
    pub fn apply(&self, ctx: &Context, mutations: Vec<Mutation>) -> CoreResult<CommitResponse> {
        let (_, response) = self.read_write_transaction(ctx, |txn| {
            txn.buffer_write(mutations.iter().cloned())
        })?;
        Ok(response)
    }

    /// Runs a query in a transaction of its own and collects the rows.
    ///
    /// # Errors
    ///
    /// As [`Transaction::read`].
    pub fn query(&self, ctx: &Context, statement: &Statement) -> CoreResult<Vec<Row>> {
        let mut txn = self.transaction();
        txn.begin(ctx)?;
        let rows = txn.read(ctx, statement)?.collect_rows();
        if txn.state() == TransactionState::Open {
            txn.rollback()?;
        }
        rows
    }

    /// Shuts down the underlying store.
    ///
    /// # Errors
    ///
    /// See [`Database::close`].
    pub fn close(&self) -> CoreResult<()> {
        self.db.close()
    }
}

/// Sleeps for `delay`, cut short by the context's deadline.
fn wait(ctx: &Context, delay: Duration) -> CoreResult<()> {
    ctx.check()?;
    let delay = ctx.remaining().map_or(delay, |left| delay.min(left));
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
    ctx.check()
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
