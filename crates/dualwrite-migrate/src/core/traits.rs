//! Core traits for the pool layer the application talks to.
//!
//! - [`Conn`]: exec / query / query-row / prepare against one store
//! - [`TxBeginner`]: a [`Conn`] that can open transactions
//! - [`Transaction`]: an open transaction, itself a [`Conn`]
//! - [`Statement`]: a prepared statement
//! - [`Dialect`]: SQL syntax strategy for the validator and fixer
//!
//! Every store adapter and the dual-write router implement the same traits,
//! so swapping a plain pool for the router needs no call-site changes.
//!
//! # Cancellation
//!
//! Every operation takes a [`CancellationToken`]. Adapters stop waiting on
//! the store when it fires and report [`MigrateError::Cancelled`]; operations
//! that have not started yet never begin.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::row::{ExecResult, Row};
use super::schema::TableSpec;
use super::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for opening a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Isolation level; `None` keeps the server default.
    pub isolation: Option<IsolationLevel>,
    /// Open the transaction read-only.
    pub read_only: bool,
}

impl TxOptions {
    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Query-side operations available on a pool or an open transaction.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Execute a statement that returns no rows.
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult>;

    /// Run a query and collect all rows.
    async fn query(&self, cancel: &CancellationToken, sql: &str, args: &[SqlValue])
        -> Result<Vec<Row>>;

    /// Run a query expected to return one row.
    ///
    /// Returns [`MigrateError::NoRows`] when nothing matches; extra rows are
    /// ignored.
    async fn query_row(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Row> {
        self.query(cancel, sql, args)
            .await?
            .into_iter()
            .next()
            .ok_or(MigrateError::NoRows)
    }

    /// Prepare a statement for repeated execution.
    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>>;

    /// SQL dialect spoken by this store.
    fn dialect(&self) -> &dyn Dialect;

    /// Cheap liveness probe.
    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.query(cancel, "SELECT 1", &[]).await.map(|_| ())
    }
}

/// A pool that can open transactions.
///
/// This is the capability the dual-write router requires from both of its
/// stores; it is enforced by the router's constructor signature.
#[async_trait]
pub trait TxBeginner: Conn {
    async fn begin_tx(
        &self,
        cancel: &CancellationToken,
        opts: &TxOptions,
    ) -> Result<Box<dyn Transaction>>;
}

/// An open transaction.
///
/// A transaction finishes exactly once; a second `commit` or `rollback`
/// returns [`MigrateError::TransactionDone`].
#[async_trait]
pub trait Transaction: Conn {
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;
}

/// A prepared statement.
#[async_trait]
pub trait Statement: Send + Sync {
    /// SQL text of the statement.
    fn sql(&self) -> &str;

    async fn exec(&self, cancel: &CancellationToken, args: &[SqlValue]) -> Result<ExecResult>;

    async fn query(&self, cancel: &CancellationToken, args: &[SqlValue]) -> Result<Vec<Row>>;
}

/// A statement bound to the handle that prepared it.
///
/// Drivers cache server-side statements per connection, so executing the
/// same SQL text through the owning handle reuses the prepared plan.
pub struct BoundStatement<C> {
    conn: C,
    sql: String,
}

impl<C> BoundStatement<C>
where
    C: Conn + 'static,
{
    pub fn new(conn: C, sql: impl Into<String>) -> Self {
        Self {
            conn,
            sql: sql.into(),
        }
    }

    pub fn boxed(conn: C, sql: impl Into<String>) -> Box<dyn Statement> {
        Box::new(Self::new(conn, sql))
    }
}

#[async_trait]
impl<C> Statement for BoundStatement<C>
where
    C: Conn + 'static,
{
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn exec(&self, cancel: &CancellationToken, args: &[SqlValue]) -> Result<ExecResult> {
        self.conn.exec(cancel, &self.sql, args).await
    }

    async fn query(&self, cancel: &CancellationToken, args: &[SqlValue]) -> Result<Vec<Row>> {
        self.conn.query(cancel, &self.sql, args).await
    }
}

#[async_trait]
impl<T: Conn + ?Sized> Conn for Arc<T> {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        (**self).exec(cancel, sql, args).await
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<Row>> {
        (**self).query(cancel, sql, args).await
    }

    async fn query_row(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Row> {
        (**self).query_row(cancel, sql, args).await
    }

    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>> {
        (**self).prepare(cancel, sql).await
    }

    fn dialect(&self) -> &dyn Dialect {
        (**self).dialect()
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        (**self).ping(cancel).await
    }
}

/// Run a store future unless the token fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrateError::Cancelled),
        res = fut => res,
    }
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl BuiltQuery {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// SQL syntax strategy for different database engines.
///
/// Implementations supply quoting, placeholders, upsert and introspection;
/// the paging, lookup and delete builders are template methods shared by all
/// engines.
pub trait Dialect: Send + Sync {
    /// Get the dialect identifier (e.g., "postgres", "mysql", "sqlite").
    fn name(&self) -> &str;

    /// Quote a single identifier.
    fn quote_ident(&self, name: &str) -> String;

    /// Placeholder for the given 1-based parameter index.
    ///
    /// The value is passed so dialects with strict parameter typing can
    /// attach a cast.
    fn param_placeholder(&self, index: usize, value: &SqlValue) -> String;

    /// Statements that open a transaction with the given options, in order.
    fn build_begin_statements(&self, opts: &TxOptions) -> Vec<String>;

    /// Insert-or-update keyed on `id_column`.
    ///
    /// Only `update_columns` are assigned on conflict, and a row whose
    /// values already match must not be touched, so that re-applying the
    /// same upsert reports zero affected rows where the engine allows it.
    fn build_upsert_query(
        &self,
        table: &str,
        id_column: &str,
        columns: &[String],
        update_columns: &[String],
        values: &[SqlValue],
    ) -> BuiltQuery;

    /// Query returning one row per column (`column_name`) in ordinal order.
    fn build_list_columns_query(&self, spec: &TableSpec) -> BuiltQuery;

    /// Quote a possibly schema-qualified table name.
    fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Column list for full-row reads. The identity column always comes first.
    fn projection(&self, spec: &TableSpec) -> String {
        if spec.columns.is_empty() {
            format!(
                "{}, {}.*",
                self.quote_ident(&spec.id_column),
                self.quote_ident(spec.unqualified_name())
            )
        } else {
            spec.columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }

    /// One page of rows (or identities only) ordered by identity.
    fn build_page_query(
        &self,
        spec: &TableSpec,
        since: Option<&SqlValue>,
        ids_only: bool,
        limit: usize,
        offset: usize,
    ) -> BuiltQuery {
        let id = self.quote_ident(&spec.id_column);
        let cols = if ids_only {
            id.clone()
        } else {
            self.projection(spec)
        };
        let mut sql = format!("SELECT {} FROM {}", cols, self.quote_table(&spec.name));
        let mut params = Vec::new();

        if let (Some(since), Some(utime)) = (since, spec.utime_column.as_deref()) {
            sql.push_str(&format!(
                " WHERE {} >= {}",
                self.quote_ident(utime),
                self.param_placeholder(1, since)
            ));
            params.push(since.clone());
        }

        sql.push_str(&format!(" ORDER BY {} LIMIT {} OFFSET {}", id, limit, offset));
        BuiltQuery::new(sql, params)
    }

    /// Rows (or identities only) whose identity is in `ids`.
    fn build_lookup_query(&self, spec: &TableSpec, ids: &[i64], ids_only: bool) -> BuiltQuery {
        let id = self.quote_ident(&spec.id_column);
        let cols = if ids_only {
            id.clone()
        } else {
            self.projection(spec)
        };
        let params: Vec<SqlValue> = ids.iter().map(|v| SqlValue::I64(*v)).collect();
        let placeholders = params
            .iter()
            .enumerate()
            .map(|(i, v)| self.param_placeholder(i + 1, v))
            .collect::<Vec<_>>()
            .join(", ");

        BuiltQuery::new(
            format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                cols,
                self.quote_table(&spec.name),
                id,
                placeholders
            ),
            params,
        )
    }

    /// Delete one identity.
    fn build_delete_query(&self, spec: &TableSpec, id: i64) -> BuiltQuery {
        let value = SqlValue::I64(id);
        BuiltQuery::new(
            format!(
                "DELETE FROM {} WHERE {} = {}",
                self.quote_table(&spec.name),
                self.quote_ident(&spec.id_column),
                self.param_placeholder(1, &value)
            ),
            vec![value],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<u32> = cancellable(&cancel, async { Ok(1) }).await;
        assert!(matches!(res, Err(MigrateError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_through() {
        let cancel = CancellationToken::new();
        let res = cancellable(&cancel, async { Ok::<_, MigrateError>(5) }).await;
        assert_eq!(res.unwrap(), 5);
    }

    #[test]
    fn test_tx_options_builders() {
        let opts = TxOptions::default()
            .with_isolation(IsolationLevel::Serializable)
            .read_only();
        assert_eq!(opts.isolation, Some(IsolationLevel::Serializable));
        assert!(opts.read_only);
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
    }
}
