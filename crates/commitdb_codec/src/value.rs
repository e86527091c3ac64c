//! Typed column values.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A UTC instant with nanosecond precision.
///
/// Stored as nanoseconds since the Unix epoch. Serializes as a plain `i64`
/// so records can carry timestamps through serde without a custom format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since the Unix epoch.
    #[must_use]
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Returns the number of nanoseconds since the Unix epoch.
    #[must_use]
    pub const fn as_unix_nanos(self) -> i64 {
        self.0
    }

    /// Returns the current wall-clock time.
    ///
    /// Clamps to the representable range instead of failing.
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts a `SystemTime`, clamping to the representable range.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self(i64::try_from(after.as_nanos()).unwrap_or(i64::MAX)),
            Err(before) => Self(
                i64::try_from(before.duration().as_nanos())
                    .map(|n| -n)
                    .unwrap_or(i64::MIN),
            ),
        }
    }

    /// Returns the timestamp `nanos` nanoseconds later, saturating.
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: i64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the elapsed time since `earlier`, or zero if `earlier` is later.
    #[must_use]
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        u64::try_from(self.0.saturating_sub(earlier.0))
            .map(Duration::from_nanos)
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Timestamp {
    /// Formats as RFC 3339 with nanoseconds, e.g. `1970-01-01T01:01:01.000000001Z`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NANOS_PER_SEC: i64 = 1_000_000_000;
        let secs = self.0.div_euclid(NANOS_PER_SEC);
        let nanos = self.0.rem_euclid(NANOS_PER_SEC);
        let days = secs.div_euclid(86_400);
        let secs_of_day = secs.rem_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{nanos:09}Z",
            secs_of_day / 3600,
            (secs_of_day % 3600) / 60,
            secs_of_day % 60
        )
    }
}

/// Converts days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self)
    }
}

/// Scalar column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int64,
    /// UTF-8 string.
    String,
    /// Byte string.
    Bytes,
    /// UTC timestamp.
    Timestamp,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Bool => "BOOL",
            ScalarType::Int64 => "INT64",
            ScalarType::String => "STRING",
            ScalarType::Bytes => "BYTES",
            ScalarType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

/// A typed column value.
///
/// Values are totally ordered so they can serve as primary keys. Ordering
/// between different variants is by variant and only matters for keys of
/// mixed types, which the schema never produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// UTF-8 string.
    String(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UTC timestamp.
    Timestamp(Timestamp),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the scalar type of this value, or `None` for NULL.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ScalarType::Bool),
            Value::Int64(_) => Some(ScalarType::Int64),
            Value::String(_) => Some(ScalarType::String),
            Value::Bytes(_) => Some(ScalarType::Bytes),
            Value::Timestamp(_) => Some(ScalarType::Timestamp),
        }
    }

    /// Returns true if this value can be stored in a column of type `ty`.
    ///
    /// NULL is compatible with every type; nullability is checked separately.
    pub fn is_compatible_with(&self, ty: ScalarType) -> bool {
        self.scalar_type().map_or(true, |own| own == ty)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a timestamp, if it is one.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int64(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::Bytes(b) => write!(f, "b<{} bytes>", b.len()),
            Value::Timestamp(t) => write!(f, "TIMESTAMP '{t}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int64(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A column value carried through the mutation buffer.
///
/// `PendingCommitTimestamp` stands for "the commit instant of the
/// transaction that applies this write". It is distinct from every
/// [`Value`] and is replaced with a concrete timestamp only by
/// [`ColumnValue::resolve`], which the store calls inside its atomic
/// apply step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// A concrete value supplied by the caller.
    Concrete(Value),
    /// Set this column to the transaction's commit timestamp.
    PendingCommitTimestamp,
}

impl ColumnValue {
    /// Returns true for the pending commit timestamp marker.
    pub fn is_pending(&self) -> bool {
        matches!(self, ColumnValue::PendingCommitTimestamp)
    }

    /// Returns the concrete value, if any.
    pub fn as_concrete(&self) -> Option<&Value> {
        match self {
            ColumnValue::Concrete(v) => Some(v),
            ColumnValue::PendingCommitTimestamp => None,
        }
    }

    /// Replaces the pending marker with `commit_ts`.
    #[must_use]
    pub fn resolve(self, commit_ts: Timestamp) -> Value {
        match self {
            ColumnValue::Concrete(v) => v,
            ColumnValue::PendingCommitTimestamp => Value::Timestamp(commit_ts),
        }
    }
}

impl From<Value> for ColumnValue {
    fn from(v: Value) -> Self {
        ColumnValue::Concrete(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_display_rfc3339() {
        let ts = Timestamp::from_unix_nanos(3_661_000_000_001);
        assert_eq!(ts.to_string(), "1970-01-01T01:01:01.000000001Z");

        let ts = Timestamp::from_unix_nanos(1_700_000_000_000_000_000);
        assert_eq!(ts.to_string(), "2023-11-14T22:13:20.000000000Z");
    }

    #[test]
    fn timestamp_display_before_epoch() {
        let ts = Timestamp::from_unix_nanos(-1);
        assert_eq!(ts.to_string(), "1969-12-31T23:59:59.999999999Z");
    }

    #[test]
    fn timestamp_now_is_after_epoch() {
        assert!(Timestamp::now() > Timestamp::UNIX_EPOCH);
    }

    #[test]
    fn value_compatibility() {
        assert!(Value::Null.is_compatible_with(ScalarType::Timestamp));
        assert!(Value::from("x").is_compatible_with(ScalarType::String));
        assert!(!Value::from(1i64).is_compatible_with(ScalarType::Timestamp));
        assert!(Value::from(Timestamp::UNIX_EPOCH).is_compatible_with(ScalarType::Timestamp));
    }

    #[test]
    fn pending_resolves_to_commit_timestamp() {
        let ts = Timestamp::from_unix_nanos(42);
        assert_eq!(
            ColumnValue::PendingCommitTimestamp.resolve(ts),
            Value::Timestamp(ts)
        );
        assert_eq!(
            ColumnValue::from(Value::from(7i64)).resolve(ts),
            Value::Int64(7)
        );
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int64(42).as_i64(), Some(42));
        assert_eq!(Value::from("hello").as_str(), Some("hello"));
        assert_eq!(Value::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
