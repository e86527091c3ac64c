//! # CommitDB Codec
//!
//! Row values, table schemas and the record codec for CommitDB.
//!
//! This crate maps user records (any serde type) to and from rows:
//! - A [`Row`] is an ordered column name to [`Value`] mapping
//! - [`encode_record`] checks a record against a [`TableSchema`] and
//!   produces a `Row<ColumnValue>` that may carry the pending commit
//!   timestamp marker
//! - [`decode_record`] turns a committed row back into a record
//! - [`encode_row`] / [`decode_row`] write rows as self-describing CBOR
//!   payloads for storage
//!
//! ## Usage
//!
//! ```
//! use commitdb_codec::{
//!     decode_record, encode_record, ColumnValue, CommitTimestamp, NullTime, Nullable,
//!     ScalarType, TableSchema, Timestamp,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Test {
//!     id: String,
//!     t1: NullTime,
//!     t2: CommitTimestamp,
//! }
//!
//! let table = TableSchema::builder("test")
//!     .required("id", ScalarType::String)
//!     .commit_timestamp("t1")
//!     .commit_timestamp("t2")
//!     .primary_key("id")
//!     .build()
//!     .unwrap();
//!
//! let record = Test { id: "x".into(), t1: Nullable::null(), t2: CommitTimestamp::Pending };
//! let row = encode_record(&record, &table).unwrap();
//! assert_eq!(row.get("t2"), Some(&ColumnValue::PendingCommitTimestamp));
//!
//! let committed = row.resolve(Timestamp::from_unix_nanos(1_000));
//! let back: Test = decode_record(&committed).unwrap();
//! assert_eq!(back.t2, CommitTimestamp::At(Timestamp::from_unix_nanos(1_000)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod nullable;
mod row;
mod schema;
mod value;

pub use decoder::{decode_record, decode_row};
pub use encoder::{encode_record, encode_row, TIMESTAMP_TAG};
pub use error::{CodecError, CodecResult};
pub use nullable::{
    CommitTimestamp, NullBool, NullInt64, NullString, NullTime, Nullable,
    PENDING_COMMIT_TIMESTAMP,
};
pub use row::Row;
pub use schema::{ColumnKind, ColumnSchema, Schema, TableSchema, TableSchemaBuilder};
pub use value::{ColumnValue, ScalarType, Timestamp, Value};
