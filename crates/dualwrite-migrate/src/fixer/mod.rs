//! Convergence fixer: make the target row for one identity match base.
//!
//! Base is always authoritative. A row present in base is upserted into
//! target (only whitelisted columns are assigned on update); a row absent
//! from base is deleted from target. Re-applying a fix is a no-op.

mod consumer;

pub use consumer::{ConsumeStats, FixConsumer};

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{Conn, TableSpec};
use crate::error::{MigrateError, Result};

/// What a fix did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    /// Row inserted or updated from base.
    Upserted,
    /// Row deleted because base no longer has it.
    Deleted,
    /// Target already matched.
    Unchanged,
}

impl FixAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FixAction::Upserted => "upserted",
            FixAction::Deleted => "deleted",
            FixAction::Unchanged => "unchanged",
        }
    }
}

/// Fixer for one table.
pub struct Fixer {
    base: Arc<dyn Conn>,
    target: Arc<dyn Conn>,
    table: TableSpec,
    update_columns: Vec<String>,
}

impl Fixer {
    /// Create a fixer with an explicit column whitelist taken from
    /// `table.columns`.
    pub fn new(base: Arc<dyn Conn>, target: Arc<dyn Conn>, mut table: TableSpec) -> Result<Self> {
        table.normalize_columns();
        if table.columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "fixer for {} needs at least one column besides {}",
                table.name, table.id_column
            )));
        }
        let update_columns = table.update_columns();
        Ok(Self {
            base,
            target,
            table,
            update_columns,
        })
    }

    /// Create a fixer whose whitelist is every column of the base table.
    pub async fn introspect(
        cancel: &CancellationToken,
        base: Arc<dyn Conn>,
        target: Arc<dyn Conn>,
        table: TableSpec,
    ) -> Result<Self> {
        let columns = table.introspect_columns(cancel, base.as_ref()).await?;
        info!(
            "Fixer for {}: {} columns from {}",
            table.name,
            columns.len(),
            base.dialect().name()
        );
        Self::new(base, target, table.with_columns(columns))
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    /// Columns assigned when updating an existing target row.
    pub fn update_columns(&self) -> &[String] {
        &self.update_columns
    }

    /// Converge the target row for `id` onto base.
    ///
    /// Store errors are returned unchanged; nothing is retried.
    pub async fn fix(&self, cancel: &CancellationToken, id: i64) -> Result<FixAction> {
        let lookup = self.base.dialect().build_lookup_query(&self.table, &[id], false);
        let row = match self.base.query_row(cancel, &lookup.sql, &lookup.params).await {
            Ok(row) => Some(row),
            Err(e) if e.is_no_rows() => None,
            Err(e) => return Err(e),
        };

        let action = match row {
            Some(row) => {
                let upsert = self.target.dialect().build_upsert_query(
                    &self.table.name,
                    &self.table.id_column,
                    &self.table.columns,
                    &self.update_columns,
                    &row.into_values(),
                );
                let res = self.target.exec(cancel, &upsert.sql, &upsert.params).await?;
                if res.rows_affected == 0 {
                    FixAction::Unchanged
                } else {
                    FixAction::Upserted
                }
            }
            None => {
                let delete = self.target.dialect().build_delete_query(&self.table, id);
                let res = self.target.exec(cancel, &delete.sql, &delete.params).await?;
                if res.rows_affected == 0 {
                    FixAction::Unchanged
                } else {
                    FixAction::Deleted
                }
            }
        };

        debug!("Fixed {} id={}: {}", self.table.name, id, action.as_str());
        Ok(action)
    }
}
