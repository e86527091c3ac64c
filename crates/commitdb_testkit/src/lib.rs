//! # CommitDB Testkit
//!
//! Test utilities for CommitDB.
//!
//! This crate provides:
//! - A fixture schema with commit-timestamp columns and matching records
//! - In-memory databases wired to a client
//! - Property-based test generators using proptest
//! - Contention stress harnesses
//!
//! ## Usage
//!
//! ```
//! use commitdb_core::{Context, Statement};
//! use commitdb_testkit::prelude::*;
//!
//! with_test_db(|db| {
//!     let ctx = Context::background();
//!     db.read_write_transaction(&ctx, |txn| txn.insert(TEST_TABLE, &StampedRow::pending("x")))
//!         .unwrap();
//!     let rows = db.query(&ctx, &Statement::new("SELECT * FROM test")).unwrap();
//!     let row: TestRow = rows[0].decode().unwrap();
//!     assert_eq!(row.t1, row.t2);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
