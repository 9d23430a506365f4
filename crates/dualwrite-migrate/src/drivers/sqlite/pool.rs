//! SQLite pool and transaction adapters.
//!
//! Uses SQLx for connection pooling. SQLite has no native UUID, decimal or
//! zoned timestamp type, so those values are bound as text.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult,
    SqliteRow,
};
use sqlx::{Column, Executor, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dialect::SqliteDialect;
use crate::config::StoreConfig;
use crate::core::row::{ExecResult, Row};
use crate::core::traits::{
    cancellable, BoundStatement, Conn, Dialect, Statement, Transaction, TxBeginner, TxOptions,
};
use crate::core::value::SqlValue;
use crate::drivers::common::POOL_CONNECTION_TIMEOUT;
use crate::error::{MigrateError, Result};

/// Path value selecting a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I16(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.clone()),
        SqlValue::Bytes(v) => query.bind(v.clone()),
        SqlValue::Uuid(v) => query.bind(v.hyphenated().to_string()),
        SqlValue::Decimal(v) => query.bind(v.to_string()),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeOffset(v) => query.bind(v.to_rfc3339()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
    }
}

fn build_query<'q>(sql: &'q str, args: &[SqlValue]) -> SqliteQuery<'q> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn decode_value(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();
    let column = || row.column(idx).name().to_string();

    // Decode by storage class; SQLite converts between classes on request
    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(idx).map(SqlValue::I64),
        "REAL" => row.try_get_unchecked::<f64, _>(idx).map(SqlValue::F64),
        "BLOB" => row.try_get_unchecked::<Vec<u8>, _>(idx).map(SqlValue::Bytes),
        _ => row.try_get_unchecked::<String, _>(idx).map(SqlValue::Text),
    };
    value.map_err(|e| MigrateError::decode(column(), e.to_string()))
}

fn decode_rows(rows: &[SqliteRow]) -> Result<Vec<Row>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into();

    rows.iter()
        .map(|row| {
            let values = (0..row.len())
                .map(|i| decode_value(row, i))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(Arc::clone(&columns), values))
        })
        .collect()
}

fn exec_result(res: &SqliteQueryResult) -> ExecResult {
    let result = ExecResult::new(res.rows_affected());
    match res.last_insert_rowid() {
        0 => result,
        id => result.with_last_insert_id(id),
    }
}

/// SQLite connection pool.
#[derive(Clone)]
pub struct SqlitePool {
    pool: sqlx::SqlitePool,
    dialect: SqliteDialect,
    store: Arc<str>,
}

impl SqlitePool {
    /// Open the database file named by `config.path`, creating it if needed.
    /// `store` labels the pool in logs.
    pub async fn connect(config: &StoreConfig, store: &str) -> Result<Self> {
        let path = config.path.as_deref().unwrap_or(MEMORY_PATH);
        if path == MEMORY_PATH {
            return Self::in_memory(store).await;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(POOL_CONNECTION_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, format!("opening {} SQLite database", store)))?;

        info!(
            "{}: opened SQLite database {} (pool size {})",
            store, path, config.max_connections
        );
        Ok(Self::from_pool(pool, store))
    }

    /// Private in-memory database.
    ///
    /// The pool holds exactly one connection that never expires, since every
    /// new connection would see an empty database.
    pub async fn in_memory(store: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, format!("opening {} in-memory SQLite", store)))?;
        debug!("{}: opened in-memory SQLite database", store);
        Ok(Self::from_pool(pool, store))
    }

    /// Wrap an existing SQLx pool.
    pub fn from_pool(pool: sqlx::SqlitePool, store: &str) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
            store: Arc::from(store),
        }
    }
}

#[async_trait]
impl Conn for SqlitePool {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        cancellable(cancel, async {
            let res = build_query(sql, args).execute(&self.pool).await?;
            Ok(exec_result(&res))
        })
        .await
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<Row>> {
        cancellable(cancel, async {
            let rows = build_query(sql, args).fetch_all(&self.pool).await?;
            decode_rows(&rows)
        })
        .await
    }

    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>> {
        cancellable(cancel, async {
            Executor::prepare(&self.pool, sql).await?;
            Ok(BoundStatement::boxed(self.clone(), sql))
        })
        .await
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }
}

#[async_trait]
impl TxBeginner for SqlitePool {
    async fn begin_tx(
        &self,
        cancel: &CancellationToken,
        opts: &TxOptions,
    ) -> Result<Box<dyn Transaction>> {
        cancellable(cancel, async {
            let mut conn = self.pool.acquire().await.map_err(|e| {
                MigrateError::pool(e, format!("getting {} SQLite connection", self.store))
            })?;
            for stmt in self.dialect.build_begin_statements(opts) {
                Executor::execute(&mut *conn, stmt.as_str()).await?;
            }
            debug!("{}: SQLite transaction started", self.store);
            Ok(Box::new(SqliteTx::new(conn, Arc::clone(&self.store))) as Box<dyn Transaction>)
        })
        .await
    }
}

/// Transaction pinned to one pooled connection.
///
/// Cloning shares the same transaction; prepared statements hold a clone.
#[derive(Clone)]
pub struct SqliteTx {
    inner: Arc<TxInner>,
}

struct TxInner {
    conn: Mutex<Option<PoolConnection<Sqlite>>>,
    dialect: SqliteDialect,
    store: Arc<str>,
}

impl SqliteTx {
    fn new(conn: PoolConnection<Sqlite>, store: Arc<str>) -> Self {
        Self {
            inner: Arc::new(TxInner {
                conn: Mutex::new(Some(conn)),
                dialect: SqliteDialect::new(),
                store,
            }),
        }
    }

    async fn finish(&self, sql: &str) -> Result<()> {
        let mut conn = self
            .inner
            .conn
            .lock()
            .await
            .take()
            .ok_or(MigrateError::TransactionDone)?;
        let res = Executor::execute(&mut *conn, sql).await;
        if let Err(e) = res {
            drop(conn.detach());
            return Err(e.into());
        }
        debug!("{}: SQLite {}", self.inner.store, sql);
        Ok(())
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        warn!(
            "{}: SQLite transaction dropped without commit or rollback; rolling back",
            self.store
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let res = Executor::execute(&mut *conn, "ROLLBACK").await;
                    if res.is_err() {
                        drop(conn.detach());
                    }
                });
            }
            Err(_) => drop(conn.detach()),
        }
    }
}

#[async_trait]
impl Conn for SqliteTx {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        cancellable(cancel, async {
            let mut guard = self.inner.conn.lock().await;
            let conn = guard.as_mut().ok_or(MigrateError::TransactionDone)?;
            let res = build_query(sql, args).execute(&mut **conn).await?;
            Ok(exec_result(&res))
        })
        .await
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<Row>> {
        cancellable(cancel, async {
            let mut guard = self.inner.conn.lock().await;
            let conn = guard.as_mut().ok_or(MigrateError::TransactionDone)?;
            let rows = build_query(sql, args).fetch_all(&mut **conn).await?;
            decode_rows(&rows)
        })
        .await
    }

    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>> {
        cancellable(cancel, async {
            let mut guard = self.inner.conn.lock().await;
            let conn = guard.as_mut().ok_or(MigrateError::TransactionDone)?;
            Executor::prepare(&mut **conn, sql).await?;
            Ok(BoundStatement::boxed(self.clone(), sql))
        })
        .await
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.inner.dialect
    }
}

#[async_trait]
impl Transaction for SqliteTx {
    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool_with_table() -> SqlitePool {
        let pool = SqlitePool::in_memory("test").await.unwrap();
        let cancel = CancellationToken::new();
        pool.exec(
            &cancel,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, price REAL, data BLOB)",
            &[],
        )
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_round_trip_values() {
        let pool = pool_with_table().await;
        let cancel = CancellationToken::new();
        let res = pool
            .exec(
                &cancel,
                "INSERT INTO items (id, label, price, data) VALUES (?, ?, ?, ?)",
                &[
                    SqlValue::I32(7),
                    SqlValue::Text("lamp".into()),
                    SqlValue::F64(9.5),
                    SqlValue::Null,
                ],
            )
            .await
            .unwrap();
        assert_eq!(res.rows_affected, 1);
        assert_eq!(res.last_insert_id, Some(7));

        let row = pool
            .query_row(&cancel, "SELECT id, label, price, data FROM items", &[])
            .await
            .unwrap();
        assert_eq!(row.get_i64("id").unwrap(), 7);
        assert_eq!(row.get_string("label").unwrap(), "lamp");
        assert_eq!(row.get("price"), Some(&SqlValue::F64(9.5)));
        assert_eq!(row.get("data"), Some(&SqlValue::Null));
    }

    #[tokio::test]
    async fn test_query_row_no_rows() {
        let pool = pool_with_table().await;
        let err = pool
            .query_row(&CancellationToken::new(), "SELECT id FROM items", &[])
            .await
            .unwrap_err();
        assert!(err.is_no_rows());
    }

    #[tokio::test]
    async fn test_transaction_rollback_and_done() {
        let pool = pool_with_table().await;
        let cancel = CancellationToken::new();

        let tx = pool.begin_tx(&cancel, &TxOptions::default()).await.unwrap();
        tx.exec(&cancel, "INSERT INTO items (id) VALUES (1)", &[])
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert!(matches!(tx.commit().await, Err(MigrateError::TransactionDone)));
        drop(tx);

        let rows = pool.query(&cancel, "SELECT id FROM items", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_prepared_statement_reuse() {
        let pool = pool_with_table().await;
        let cancel = CancellationToken::new();
        let stmt = pool
            .prepare(&cancel, "INSERT INTO items (id, label) VALUES (?, ?)")
            .await
            .unwrap();
        for id in 1..=3i64 {
            stmt.exec(&cancel, &[SqlValue::I64(id), SqlValue::Text(format!("item{}", id))])
                .await
                .unwrap();
        }
        let rows = pool.query(&cancel, "SELECT id FROM items", &[]).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_query() {
        let pool = pool_with_table().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool.query(&cancel, "SELECT id FROM items", &[]).await.unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
    }
}
