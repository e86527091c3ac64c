//! Record and payload encoding.

use crate::error::{CodecError, CodecResult};
use crate::nullable::PENDING_COMMIT_TIMESTAMP;
use crate::row::Row;
use crate::schema::{ColumnKind, ColumnSchema, TableSchema};
use crate::value::{ColumnValue, ScalarType, Timestamp, Value};
use ciborium::value::{Integer, Value as Cbor};
use serde::Serialize;

/// CBOR tag marking a timestamp (epoch nanoseconds) in row payloads.
pub const TIMESTAMP_TAG: u64 = 0xC0DB;

/// Encodes a record into a row for `table`.
///
/// The record is serialized through serde; every field must name a column
/// of `table` (matched case-insensitively) and carry a compatible value.
/// Fields map to columns in serialization order.
///
/// Commit-timestamp columns accept only NULL or the pending marker
/// ([`crate::CommitTimestamp::Pending`]).
///
/// # Errors
///
/// - `SchemaMismatch` if the record is not a struct/map, a field has no
///   column, a value has the wrong type, or NULL targets a NOT NULL column
/// - `CommitTimestampLiteral` if a concrete value targets a commit-timestamp
///   column
pub fn encode_record<T: Serialize + ?Sized>(
    record: &T,
    table: &TableSchema,
) -> CodecResult<Row<ColumnValue>> {
    let value = Cbor::serialized(record).map_err(|e| {
        CodecError::schema_mismatch(format!("record cannot be serialized: {e}"))
    })?;
    let Cbor::Map(fields) = value else {
        return Err(CodecError::schema_mismatch(
            "record must serialize to a struct or map",
        ));
    };

    let mut row = Row::with_capacity(fields.len());
    for (key, field) in fields {
        let Cbor::Text(name) = key else {
            return Err(CodecError::schema_mismatch("record field names must be text"));
        };
        let column = table.column(&name).ok_or_else(|| {
            CodecError::schema_mismatch(format!(
                "field `{name}` has no column in table `{}`",
                table.name()
            ))
        })?;
        let cell = encode_field(column, field)?;
        row.set(column.name(), cell);
    }
    Ok(row)
}

fn encode_field(column: &ColumnSchema, field: Cbor) -> CodecResult<ColumnValue> {
    match (column.kind(), field) {
        (ColumnKind::CommitTimestamp, Cbor::Null) => Ok(ColumnValue::Concrete(Value::Null)),
        (ColumnKind::CommitTimestamp, Cbor::Text(ref s)) if s == PENDING_COMMIT_TIMESTAMP => {
            Ok(ColumnValue::PendingCommitTimestamp)
        }
        (ColumnKind::CommitTimestamp, _) => {
            Err(CodecError::commit_timestamp_literal(column.name()))
        }
        (kind, Cbor::Null) if kind.is_nullable() => Ok(ColumnValue::Concrete(Value::Null)),
        (_, Cbor::Null) => Err(CodecError::schema_mismatch(format!(
            "column `{}` is NOT NULL",
            column.name()
        ))),
        (kind, field) => scalar_from_cbor(kind.scalar_type(), field)
            .map(ColumnValue::Concrete)
            .ok_or_else(|| {
                CodecError::schema_mismatch(format!(
                    "field for column `{}` is not a {}",
                    column.name(),
                    kind.scalar_type()
                ))
            }),
    }
}

fn scalar_from_cbor(ty: ScalarType, field: Cbor) -> Option<Value> {
    match (ty, field) {
        (ScalarType::Bool, Cbor::Bool(b)) => Some(Value::Bool(b)),
        (ScalarType::Int64, Cbor::Integer(n)) => i64::try_from(n).ok().map(Value::Int64),
        (ScalarType::Timestamp, Cbor::Integer(n)) => i64::try_from(n)
            .ok()
            .map(|n| Value::Timestamp(Timestamp::from_unix_nanos(n))),
        (ScalarType::String, Cbor::Text(s)) => Some(Value::String(s)),
        (ScalarType::Bytes, Cbor::Bytes(b)) => Some(Value::Bytes(b)),
        // serde writes `Vec<u8>` as a sequence of integers.
        (ScalarType::Bytes, Cbor::Array(items)) => items
            .into_iter()
            .map(|item| item.as_integer().and_then(|n| u8::try_from(n).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(Value::Bytes),
        _ => None,
    }
}

/// Converts a value to the CBOR shape used for record decoding.
pub(crate) fn value_to_cbor(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Int64(n) => Cbor::Integer(Integer::from(*n)),
        Value::String(s) => Cbor::Text(s.clone()),
        Value::Bytes(b) => Cbor::Bytes(b.clone()),
        Value::Timestamp(ts) => Cbor::Integer(Integer::from(ts.as_unix_nanos())),
    }
}

/// Encodes a row into a self-describing CBOR payload.
///
/// Columns are written as a map in row order; timestamps are tagged with
/// [`TIMESTAMP_TAG`] so they survive a round trip without a schema.
///
/// # Errors
///
/// Returns `Payload` if the CBOR writer fails.
pub fn encode_row(row: &Row) -> CodecResult<Vec<u8>> {
    let map = Cbor::Map(
        row.iter()
            .map(|(name, value)| (Cbor::Text(name.to_string()), tagged(value)))
            .collect(),
    );
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&map, &mut bytes)
        .map_err(|e| CodecError::payload(format!("{e:?}")))?;
    Ok(bytes)
}

fn tagged(value: &Value) -> Cbor {
    match value {
        Value::Timestamp(ts) => Cbor::Tag(
            TIMESTAMP_TAG,
            Box::new(Cbor::Integer(Integer::from(ts.as_unix_nanos()))),
        ),
        other => value_to_cbor(other),
    }
}
