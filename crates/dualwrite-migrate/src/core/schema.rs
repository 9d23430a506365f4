//! Table descriptions shared by the validator and fixer.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::traits::Conn;
use crate::error::{MigrateError, Result};

/// Migrated table metadata.
///
/// `columns` is the projection used when reading full rows. When it is
/// non-empty the identity column is always first, so dynamic rows can find
/// their identity positionally. An empty list means every column of the
/// authoritative table, resolved with [`TableSpec::resolve_columns`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name, optionally schema-qualified (`schema.table`).
    pub name: String,

    /// Integer identity column (join key between base and target).
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Update-time column used by incremental validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utime_column: Option<String>,

    /// Migrated columns; empty means "all columns".
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_id_column() -> String {
    "id".to_string()
}

impl TableSpec {
    /// Describe a table keyed by `id` with no explicit projection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_column: default_id_column(),
            utime_column: None,
            columns: Vec::new(),
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_utime_column(mut self, column: impl Into<String>) -> Self {
        self.utime_column = Some(column.into());
        self
    }

    /// Set the projection; the identity column is moved (or added) to the front.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self.normalize_columns();
        self
    }

    /// Columns assigned on update: the projection minus the identity column.
    pub fn update_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&self.id_column))
            .cloned()
            .collect()
    }

    /// Bare table name without schema qualification.
    pub fn unqualified_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Schema qualifier, if any.
    pub fn schema(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(schema, _)| schema)
    }

    /// Check the description is usable.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MigrateError::Config("table name is required".into()));
        }
        if self.id_column.trim().is_empty() {
            return Err(MigrateError::Config(format!(
                "table {}: id_column is required",
                self.name
            )));
        }
        Ok(())
    }

    /// Column names of this table on `conn`, in ordinal order.
    ///
    /// A missing table (or one with no columns) is a configuration error.
    pub async fn introspect_columns(
        &self,
        cancel: &CancellationToken,
        conn: &dyn Conn,
    ) -> Result<Vec<String>> {
        let query = conn.dialect().build_list_columns_query(self);
        let rows = match conn.query(cancel, &query.sql, &query.params).await {
            Ok(rows) => rows,
            Err(e) if e.is_no_rows() => Vec::new(),
            Err(e) => return Err(e),
        };
        let columns = rows
            .iter()
            .map(|row| row.get_string("column_name"))
            .collect::<Result<Vec<_>>>()?;

        if columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "table {} not found on {} or has no columns",
                self.name,
                conn.dialect().name()
            )));
        }
        Ok(columns)
    }

    /// This description with an explicit projection, introspected from
    /// `conn` when `columns` is empty.
    pub async fn resolve_columns(self, cancel: &CancellationToken, conn: &dyn Conn) -> Result<Self> {
        if !self.columns.is_empty() {
            return Ok(self);
        }
        let columns = self.introspect_columns(cancel, conn).await?;
        Ok(self.with_columns(columns))
    }

    /// Put the identity column first in a non-empty projection.
    pub fn normalize_columns(&mut self) {
        let id = self.id_column.clone();
        self.columns.retain(|c| !c.eq_ignore_ascii_case(&id));
        if !self.columns.is_empty() {
            self.columns.insert(0, id);
        }
    }
}
