//! Nullable scalar wrappers for record fields.

use crate::value::Timestamp;
use serde::de::{self, IntoDeserializer, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Text the codec recognizes as the pending commit timestamp marker.
///
/// Only meaningful for commit-timestamp columns; [`CommitTimestamp::Pending`]
/// serializes to it. It matches the SQL pseudo-function spelling.
pub const PENDING_COMMIT_TIMESTAMP: &str = "PENDING_COMMIT_TIMESTAMP()";

/// A scalar that may be SQL NULL.
///
/// `valid == false` always encodes as NULL; `value` is ignored in that case
/// and never written as `T::default()`.
///
/// Decoding requires the column to be present in the row: an absent column
/// is a decode error, not a NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Nullable<T> {
    /// Whether `value` holds a real value.
    pub valid: bool,
    /// The value; meaningless when `valid` is false.
    pub value: T,
}

/// A nullable timestamp.
pub type NullTime = Nullable<Timestamp>;

/// A nullable string.
pub type NullString = Nullable<String>;

/// A nullable integer.
pub type NullInt64 = Nullable<i64>;

/// A nullable boolean.
pub type NullBool = Nullable<bool>;

impl<T> Nullable<T> {
    /// Creates a valid (non-NULL) value.
    pub fn new(value: T) -> Self {
        Self { valid: true, value }
    }

    /// Returns true if the value is not NULL.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the value if valid.
    pub fn get(&self) -> Option<&T> {
        self.valid.then_some(&self.value)
    }

    /// Converts into an `Option`.
    pub fn into_option(self) -> Option<T> {
        self.valid.then_some(self.value)
    }
}

impl<T: Default> Nullable<T> {
    /// Creates a NULL value.
    pub fn null() -> Self {
        Self::default()
    }
}

impl<T: Default> From<Option<T>> for Nullable<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::new(v),
            None => Self::null(),
        }
    }
}

impl<T: Serialize> Serialize for Nullable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.valid {
            serializer.serialize_some(&self.value)
        } else {
            serializer.serialize_none()
        }
    }
}

impl<'de, T: Deserialize<'de> + Default> Deserialize<'de> for Nullable<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // `deserialize_any` rather than `deserialize_option`: a missing field
        // must fail instead of silently reading as NULL.
        deserializer.deserialize_any(NullableVisitor(PhantomData))
    }
}

struct NullableVisitor<T>(PhantomData<T>);

impl<T> NullableVisitor<T> {
    fn scalar<'de, E, D>(inner: D) -> Result<Nullable<T>, E>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de, Error = E>,
        E: de::Error,
    {
        T::deserialize(inner).map(Nullable::new)
    }
}

impl<'de, T: Deserialize<'de> + Default> Visitor<'de> for NullableVisitor<T> {
    type Value = Nullable<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar or NULL")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Nullable::null())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Nullable::null())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        T::deserialize(deserializer).map(Nullable::new)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Self::scalar(v.into_deserializer())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Self::scalar(v.into_deserializer())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Self::scalar(v.into_deserializer())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Self::scalar(v.to_string().into_deserializer())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Self::scalar(v.into_deserializer())
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Self::scalar(de::value::BytesDeserializer::new(v))
    }
}

/// A record field for a commit-timestamp column.
///
/// Use [`CommitTimestamp::Pending`] to have the store fill the column with
/// the transaction's commit instant. Committed rows decode as
/// [`CommitTimestamp::At`]. Encoding `At` into a commit-timestamp column is
/// rejected; the variant exists for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommitTimestamp {
    /// SQL NULL.
    #[default]
    Null,
    /// Resolve to the commit timestamp when the transaction commits.
    Pending,
    /// A committed timestamp.
    At(Timestamp),
}

impl CommitTimestamp {
    /// Returns the committed timestamp, if any.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            CommitTimestamp::At(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl Serialize for CommitTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CommitTimestamp::Null => serializer.serialize_none(),
            CommitTimestamp::Pending => serializer.serialize_str(PENDING_COMMIT_TIMESTAMP),
            CommitTimestamp::At(ts) => ts.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CommitTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CommitTimestampVisitor)
    }
}

struct CommitTimestampVisitor;

impl<'de> Visitor<'de> for CommitTimestampVisitor {
    type Value = CommitTimestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a timestamp, NULL or the pending commit timestamp marker")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CommitTimestamp::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CommitTimestamp::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(CommitTimestamp::At(Timestamp::from_unix_nanos(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(|n| CommitTimestamp::At(Timestamp::from_unix_nanos(n)))
            .map_err(|_| E::custom("timestamp out of range"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v == PENDING_COMMIT_TIMESTAMP {
            Ok(CommitTimestamp::Pending)
        } else {
            Err(E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_not_valid() {
        let n: NullTime = Nullable::null();
        assert!(!n.is_valid());
        assert_eq!(n.get(), None);
        assert_eq!(n.into_option(), None);
    }

    #[test]
    fn from_option() {
        let n = NullInt64::from(Some(5));
        assert!(n.valid);
        assert_eq!(n.value, 5);
        assert_eq!(NullInt64::from(None), Nullable::null());
    }

    #[test]
    fn commit_timestamp_accessor() {
        let ts = Timestamp::from_unix_nanos(9);
        assert_eq!(CommitTimestamp::At(ts).timestamp(), Some(ts));
        assert_eq!(CommitTimestamp::Pending.timestamp(), None);
        assert_eq!(CommitTimestamp::default(), CommitTimestamp::Null);
    }
}
