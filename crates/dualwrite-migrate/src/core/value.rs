//! SQL value types shared by every store adapter.
//!
//! Values are fully owned so rows can cross task boundaries (validator scans,
//! fix consumers) without lifetime plumbing.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SQL value enum for type-safe parameter binding and row decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real/float4).
    F32(f32),

    /// 64-bit floating point (double precision/float8).
    F64(f64),

    /// Text/string data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, widening smaller integer types.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of textual values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in logs and decode errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I16(_) => "i16",
            SqlValue::I32(_) => "i32",
            SqlValue::I64(_) => "i64",
            SqlValue::F32(_) => "f32",
            SqlValue::F64(_) => "f64",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::DateTimeOffset(_) => "datetimeoffset",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
        }
    }

    /// Canonical form for comparing the same logical value read from two
    /// different engines.
    ///
    /// - integers of any width (and booleans) become `I64`
    /// - `F32` becomes `F64`
    /// - UUIDs become lowercase hyphenated text
    /// - timestamps with offset become UTC naive timestamps
    #[must_use]
    pub fn normalized(&self) -> SqlValue {
        match self {
            SqlValue::Bool(b) => SqlValue::I64(i64::from(*b)),
            SqlValue::I16(_) | SqlValue::I32(_) => {
                SqlValue::I64(self.as_i64().unwrap_or_default())
            }
            SqlValue::F32(v) => SqlValue::F64(f64::from(*v)),
            SqlValue::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
            SqlValue::DateTimeOffset(dt) => SqlValue::DateTime(dt.naive_utc()),
            SqlValue::Decimal(d) => SqlValue::Decimal(d.normalize()),
            other => other.clone(),
        }
    }

    /// Equality after [`normalized`](Self::normalized) on both sides.
    #[must_use]
    pub fn loosely_eq(&self, other: &SqlValue) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::I16(v) => write!(f, "{}", v),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F32(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            SqlValue::Uuid(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::DateTime(v) => write!(f, "{}", v),
            SqlValue::DateTimeOffset(v) => write!(f, "{}", v.to_rfc3339()),
            SqlValue::Date(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v),
        }
    }
}

// From implementations for common types
impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::F32(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        SqlValue::DateTimeOffset(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::I32(42).is_null());
    }

    #[test]
    fn test_as_i64_widens() {
        assert_eq!(SqlValue::I16(7).as_i64(), Some(7));
        assert_eq!(SqlValue::I32(-3).as_i64(), Some(-3));
        assert_eq!(SqlValue::Text("1".into()).as_i64(), None);
    }

    #[test]
    fn test_loosely_eq_across_engines() {
        // MySQL INT vs PostgreSQL BIGINT
        assert!(SqlValue::I32(5).loosely_eq(&SqlValue::I64(5)));
        // MySQL TINYINT(1) vs SQLite INTEGER
        assert!(SqlValue::Bool(true).loosely_eq(&SqlValue::I64(1)));
        // native uuid vs char(36)
        let id = Uuid::nil();
        assert!(SqlValue::Uuid(id).loosely_eq(&SqlValue::Text(id.to_string())));
        assert!(!SqlValue::I64(1).loosely_eq(&SqlValue::I64(2)));
    }

    #[test]
    fn test_from_implementations() {
        let v: SqlValue = 42i32.into();
        assert_eq!(v, SqlValue::I32(42));

        let v: SqlValue = "hello".into();
        assert_eq!(v, SqlValue::Text("hello".to_string()));

        let v: SqlValue = None::<i64>.into();
        assert!(v.is_null());
    }
}
