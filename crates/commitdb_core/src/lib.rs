//! # CommitDB Core
//!
//! Transactional data access for CommitDB.
//!
//! This crate provides:
//! - A small SQL dialect with named parameters, bound against the schema
//! - Read-write transactions that buffer mutations and commit them
//!   atomically at a single commit timestamp
//! - Reads over the snapshot merged with the transaction's own writes
//! - Bounded retry of whole transaction bodies on conflicts
//! - An in-memory multi-version store implementing [`Database`]
//!
//! ## Example
//!
//! ```
//! use commitdb_codec::{CommitTimestamp, ScalarType, Schema, TableSchema};
//! use commitdb_core::{Client, Config, Context, MemoryDatabase, Statement};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Event {
//!     id: String,
//!     created: CommitTimestamp,
//! }
//!
//! let schema = Schema::new().with_table(
//!     TableSchema::builder("events")
//!         .required("id", ScalarType::String)
//!         .commit_timestamp("created")
//!         .primary_key("id")
//!         .build()?,
//! )?;
//! let client = Client::new(Arc::new(MemoryDatabase::new(schema)), Config::default());
//! let ctx = Context::background();
//!
//! let ((), response) = client.read_write_transaction(&ctx, |txn| {
//!     txn.insert("events", &Event { id: "e1".into(), created: CommitTimestamp::Pending })
//! })?;
//!
//! let rows = client.query(&ctx, &Statement::new("SELECT * FROM events"))?;
//! let event: Event = rows[0].decode()?;
//! assert_eq!(event.created, CommitTimestamp::At(response.commit_timestamp));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod context;
mod database;
mod error;
mod executor;
mod mutation;
mod statement;
mod transaction;
mod types;

pub use client::Client;
pub use config::{Config, IsolationLevel, RetryConfig};
pub use context::Context;
pub use database::{Database, MemoryDatabase, RowStream};
pub use error::{CoreError, CoreResult};
pub use executor::Cursor;
pub use mutation::{BufferView, CellValue, Effect, Mutation, MutationBuffer, Overlay};
pub use statement::{
    bind, BoundDelete, BoundInsert, BoundSelect, BoundStatement, BoundUpdate, Filter, Statement,
};
pub use transaction::{Transaction, TransactionState};
pub use types::{CommitResponse, TransactionHandle, TransactionId};
