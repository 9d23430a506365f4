//! Entity contract used by the validator.

use super::row::Row;
use super::value::SqlValue;
use crate::error::{MigrateError, Result};

/// A migratable row type with a stable integer identity.
///
/// `compare_to` must cover every migrated column: two rows with the same
/// identity that compare unequal produce a `NotEqual` inconsistency.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Identity; the join key between base and target.
    fn id(&self) -> i64;

    /// Structural equality over all migrated columns.
    fn compare_to(&self, other: &Self) -> bool;

    /// Decode from a row projected with the table's columns.
    fn from_row(row: &Row) -> Result<Self>;
}

/// Schema-less entity over a decoded row.
///
/// The identity is the first projected column, which is where the
/// validator's page queries put it. Values are compared pairwise after
/// normalization, so an `INT` on one engine equals a `BIGINT` on the other.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEntity {
    id: i64,
    row: Row,
}

impl RowEntity {
    pub fn row(&self) -> &Row {
        &self.row
    }
}

impl Entity for RowEntity {
    fn id(&self) -> i64 {
        self.id
    }

    fn compare_to(&self, other: &Self) -> bool {
        self.id == other.id
            && self.row.len() == other.row.len()
            && self
                .row
                .values()
                .iter()
                .zip(other.row.values())
                .all(|(a, b)| a.loosely_eq(b))
    }

    fn from_row(row: &Row) -> Result<Self> {
        let (column, first) = row
            .columns()
            .first()
            .zip(row.values().first())
            .ok_or_else(|| MigrateError::decode("<identity>", "row has no columns"))?;
        let id = match first {
            SqlValue::Text(s) => s.parse::<i64>().ok(),
            other => other.as_i64(),
        }
        .ok_or_else(|| {
            MigrateError::decode(
                column.as_str(),
                format!("identity must be an integer, got {}", first.type_name()),
            )
        })?;

        Ok(Self {
            id,
            row: row.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: SqlValue, name: &str) -> Row {
        Row::from_pairs([("id", id), ("name", SqlValue::Text(name.into()))])
    }

    #[test]
    fn test_identity_from_first_column() {
        let e = RowEntity::from_row(&row(SqlValue::I32(12), "a")).unwrap();
        assert_eq!(e.id(), 12);
    }

    #[test]
    fn test_compare_normalizes_widths() {
        let a = RowEntity::from_row(&row(SqlValue::I32(1), "a")).unwrap();
        let b = RowEntity::from_row(&row(SqlValue::I64(1), "a")).unwrap();
        let c = RowEntity::from_row(&row(SqlValue::I64(1), "b")).unwrap();
        assert!(a.compare_to(&b));
        assert!(!a.compare_to(&c));
    }

    #[test]
    fn test_non_integer_identity_rejected() {
        let err = RowEntity::from_row(&row(SqlValue::F64(1.5), "a")).unwrap_err();
        assert!(matches!(err, MigrateError::Decode { .. }));
        assert!(RowEntity::from_row(&Row::from_pairs(Vec::<(String, SqlValue)>::new())).is_err());
    }
}
