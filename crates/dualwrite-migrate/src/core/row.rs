//! Decoded result rows and statement outcomes.

use std::sync::Arc;

use chrono::NaiveDateTime;

use super::value::SqlValue;
use crate::error::{MigrateError, Result};

/// One decoded result row.
///
/// Column names are shared between all rows of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a standalone row from `(column, value)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, SqlValue)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<SqlValue>) =
            pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Column names in projection order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in projection order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Consume the row, keeping only its values.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column, matched case-insensitively.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.index_of(column).map(|i| &self.values[i])
    }

    /// Value of a named column, or a decode error if the column is absent.
    pub fn try_get(&self, column: &str) -> Result<&SqlValue> {
        self.get(column)
            .ok_or_else(|| MigrateError::decode(column, "column not present in row"))
    }

    /// Non-null integer column.
    pub fn get_i64(&self, column: &str) -> Result<i64> {
        let value = self.try_get(column)?;
        value.as_i64().ok_or_else(|| {
            MigrateError::decode(column, format!("expected integer, got {}", value.type_name()))
        })
    }

    /// Nullable text column.
    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.try_get(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            other => Err(MigrateError::decode(
                column,
                format!("expected text, got {}", other.type_name()),
            )),
        }
    }

    /// Non-null text column.
    pub fn get_string(&self, column: &str) -> Result<String> {
        self.get_opt_string(column)?
            .ok_or_else(|| MigrateError::decode(column, "unexpected NULL"))
    }

    /// Nullable timestamp column. Text values in ISO-8601 form are accepted
    /// because SQLite stores timestamps as text.
    pub fn get_opt_datetime(&self, column: &str) -> Result<Option<NaiveDateTime>> {
        match self.try_get(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::DateTime(dt) => Ok(Some(*dt)),
            SqlValue::DateTimeOffset(dt) => Ok(Some(dt.naive_utc())),
            SqlValue::Text(s) => s
                .parse::<NaiveDateTime>()
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                .map(Some)
                .map_err(|e| MigrateError::decode(column, e.to_string())),
            other => Err(MigrateError::decode(
                column,
                format!("expected timestamp, got {}", other.type_name()),
            )),
        }
    }
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Auto-generated key of the last inserted row, when the engine reports one.
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }

    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::from_pairs([
            ("id", SqlValue::I32(7)),
            ("Name", SqlValue::Text("ada".into())),
            ("email", SqlValue::Null),
            ("utime", SqlValue::Text("2024-05-01 10:00:00".into())),
        ])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let row = sample();
        assert_eq!(row.get_i64("ID").unwrap(), 7);
        assert_eq!(row.get_string("name").unwrap(), "ada");
    }

    #[test]
    fn test_nullable_accessors() {
        let row = sample();
        assert_eq!(row.get_opt_string("email").unwrap(), None);
        assert!(row.get_string("email").is_err());
        assert!(row.get_i64("missing").is_err());
    }

    #[test]
    fn test_datetime_from_sqlite_text() {
        let row = sample();
        let ts = row.get_opt_datetime("utime").unwrap().unwrap();
        assert_eq!(ts.to_string(), "2024-05-01 10:00:00");
    }
}
