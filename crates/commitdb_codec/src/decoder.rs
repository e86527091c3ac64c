//! Record and payload decoding.

use crate::encoder::{value_to_cbor, TIMESTAMP_TAG};
use crate::error::{CodecError, CodecResult};
use crate::row::Row;
use crate::value::{Timestamp, Value};
use ciborium::value::Value as Cbor;
use serde::de::DeserializeOwned;

/// Decodes a row into a record.
///
/// Each record field is looked up by its serde name. A row column the
/// record does not declare is ignored unless the record denies unknown
/// fields. Timestamps are handed to serde as nanoseconds since the epoch.
///
/// # Errors
///
/// Returns `Decode` if a field is missing from the row or a column value
/// cannot be converted to the field's type (for example NULL into a
/// non-nullable field).
pub fn decode_record<T: DeserializeOwned>(row: &Row) -> CodecResult<T> {
    let map = Cbor::Map(
        row.iter()
            .map(|(name, value)| (Cbor::Text(name.to_string()), value_to_cbor(value)))
            .collect(),
    );
    map.deserialized()
        .map_err(|e| CodecError::decode(e.to_string()))
}

/// Decodes a payload written by [`crate::encode_row`].
///
/// # Errors
///
/// Returns `Payload` if the bytes are not a CBOR map of text keys to
/// supported values.
pub fn decode_row(bytes: &[u8]) -> CodecResult<Row> {
    let value: Cbor =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::payload(format!("{e:?}")))?;
    let Cbor::Map(entries) = value else {
        return Err(CodecError::payload("row payload is not a map"));
    };

    let mut row = Row::with_capacity(entries.len());
    for (key, value) in entries {
        let Cbor::Text(name) = key else {
            return Err(CodecError::payload("column name is not text"));
        };
        let value = value_from_payload(value)
            .ok_or_else(|| CodecError::payload(format!("unsupported value in column `{name}`")))?;
        row.set(name, value);
    }
    Ok(row)
}

fn value_from_payload(value: Cbor) -> Option<Value> {
    match value {
        Cbor::Null => Some(Value::Null),
        Cbor::Bool(b) => Some(Value::Bool(b)),
        Cbor::Integer(n) => i64::try_from(n).ok().map(Value::Int64),
        Cbor::Text(s) => Some(Value::String(s)),
        Cbor::Bytes(b) => Some(Value::Bytes(b)),
        Cbor::Tag(TIMESTAMP_TAG, inner) => match *inner {
            Cbor::Integer(n) => i64::try_from(n)
                .ok()
                .map(|n| Value::Timestamp(Timestamp::from_unix_nanos(n))),
            _ => None,
        },
        _ => None,
    }
}
