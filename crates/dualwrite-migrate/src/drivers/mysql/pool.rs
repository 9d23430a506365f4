//! MySQL/MariaDB pool and transaction adapters.
//!
//! Uses SQLx for connection pooling and async query execution.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow,
    MySqlSslMode,
};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column, Executor, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dialect::MysqlDialect;
use crate::config::StoreConfig;
use crate::core::row::{ExecResult, Row};
use crate::core::traits::{
    cancellable, BoundStatement, Conn, Dialect, Statement, Transaction, TxBeginner, TxOptions,
};
use crate::core::value::SqlValue;
use crate::drivers::common::{SslMode, POOL_CONNECTION_TIMEOUT};
use crate::error::{MigrateError, Result};

type MysqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

fn bind_value<'q>(query: MysqlQuery<'q>, value: &SqlValue) -> MysqlQuery<'q> {
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
        // CHAR(36) is the common MySQL representation
        SqlValue::Uuid(v) => query.bind(v.hyphenated().to_string()),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::DateTimeOffset(v) => query.bind(v.with_timezone(&Utc)),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
    }
}

fn build_query<'q>(sql: &'q str, args: &[SqlValue]) -> MysqlQuery<'q> {
    args.iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn get<'r, T>(row: &'r MySqlRow, idx: usize, wrap: impl FnOnce(T) -> SqlValue) -> Result<SqlValue>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get::<T, _>(idx)
        .map(wrap)
        .map_err(|e| MigrateError::decode(row.column(idx).name(), e.to_string()))
}

fn decode_value(row: &MySqlRow, idx: usize) -> Result<SqlValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_uppercase();

    match type_name.as_str() {
        // TINYINT(1)
        "BOOLEAN" => get::<bool>(row, idx, SqlValue::Bool),
        "TINYINT" => get::<i8>(row, idx, |v| SqlValue::I16(i16::from(v))),
        "TINYINT UNSIGNED" => get::<u8>(row, idx, |v| SqlValue::I16(i16::from(v))),
        "SMALLINT" => get::<i16>(row, idx, SqlValue::I16),
        "SMALLINT UNSIGNED" => get::<u16>(row, idx, |v| SqlValue::I32(i32::from(v))),
        "MEDIUMINT" | "INT" => get::<i32>(row, idx, SqlValue::I32),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
            get::<u32>(row, idx, |v| SqlValue::I64(i64::from(v)))
        }
        "BIGINT" => get::<i64>(row, idx, SqlValue::I64),
        "BIGINT UNSIGNED" => get::<u64>(row, idx, |v| match i64::try_from(v) {
            Ok(v) => SqlValue::I64(v),
            Err(_) => SqlValue::Decimal(rust_decimal::Decimal::from(v)),
        }),
        "FLOAT" => get::<f32>(row, idx, SqlValue::F32),
        "DOUBLE" => get::<f64>(row, idx, SqlValue::F64),
        "DECIMAL" => get::<rust_decimal::Decimal>(row, idx, SqlValue::Decimal),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            get::<Vec<u8>>(row, idx, SqlValue::Bytes)
        }
        "DATE" => get::<NaiveDate>(row, idx, SqlValue::Date),
        "TIME" => get::<NaiveTime>(row, idx, SqlValue::Time),
        "DATETIME" | "TIMESTAMP" => get::<NaiveDateTime>(row, idx, SqlValue::DateTime),
        // CHAR, VARCHAR, TEXT, ENUM, SET, JSON
        _ => row
            .try_get_unchecked::<String, _>(idx)
            .map(SqlValue::Text)
            .map_err(|e| MigrateError::decode(row.column(idx).name(), e.to_string())),
    }
}

fn decode_rows(rows: &[MySqlRow]) -> Result<Vec<Row>> {
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

fn exec_result(rows_affected: u64, last_insert_id: u64) -> ExecResult {
    let result = ExecResult::new(rows_affected);
    match i64::try_from(last_insert_id) {
        Ok(id) if id > 0 => result.with_last_insert_id(id),
        _ => result,
    }
}

fn mysql_ssl_mode(ssl_mode: &str) -> Result<MySqlSslMode> {
    Ok(match SslMode::parse(ssl_mode)? {
        SslMode::Disable => MySqlSslMode::Disabled,
        SslMode::Require => MySqlSslMode::Required,
        SslMode::VerifyCa => MySqlSslMode::VerifyCa,
        SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    })
}

/// MySQL/MariaDB connection pool.
#[derive(Clone)]
pub struct MysqlPool {
    pool: MySqlPool,
    dialect: MysqlDialect,
    store: Arc<str>,
}

impl MysqlPool {
    /// Connect and verify the connection. `store` labels the pool in logs.
    pub async fn connect(config: &StoreConfig, store: &str) -> Result<Self> {
        let ssl_mode = mysql_ssl_mode(&config.ssl_mode)?;
        if matches!(ssl_mode, MySqlSslMode::Disabled) {
            warn!(
                "{}: MySQL TLS is disabled. Credentials will be transmitted in plaintext.",
                store
            );
        }

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port())
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, format!("creating {} MySQL pool", store)))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, format!("testing {} MySQL connection", store)))?;

        info!(
            "{}: connected to MySQL {} (pool size {})",
            store,
            config.describe(),
            config.max_connections
        );

        Ok(Self::from_pool(pool, store))
    }

    /// Wrap an existing SQLx pool.
    pub fn from_pool(pool: MySqlPool, store: &str) -> Self {
        Self {
            pool,
            dialect: MysqlDialect::new(),
            store: Arc::from(store),
        }
    }
}

#[async_trait]
impl Conn for MysqlPool {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        cancellable(cancel, async {
            let res = build_query(sql, args).execute(&self.pool).await?;
            Ok(exec_result(res.rows_affected(), res.last_insert_id()))
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
impl TxBeginner for MysqlPool {
    async fn begin_tx(
        &self,
        cancel: &CancellationToken,
        opts: &TxOptions,
    ) -> Result<Box<dyn Transaction>> {
        cancellable(cancel, async {
            let mut conn = self.pool.acquire().await.map_err(|e| {
                MigrateError::pool(e, format!("getting {} MySQL connection", self.store))
            })?;
            for stmt in self.dialect.build_begin_statements(opts) {
                Executor::execute(&mut *conn, stmt.as_str()).await?;
            }
            debug!("{}: MySQL transaction started", self.store);
            Ok(Box::new(MysqlTx::new(conn, Arc::clone(&self.store))) as Box<dyn Transaction>)
        })
        .await
    }
}

/// Transaction pinned to one pooled connection.
///
/// Cloning shares the same transaction; prepared statements hold a clone.
#[derive(Clone)]
pub struct MysqlTx {
    inner: Arc<TxInner>,
}

struct TxInner {
    conn: Mutex<Option<PoolConnection<MySql>>>,
    dialect: MysqlDialect,
    store: Arc<str>,
}

impl MysqlTx {
    fn new(conn: PoolConnection<MySql>, store: Arc<str>) -> Self {
        Self {
            inner: Arc::new(TxInner {
                conn: Mutex::new(Some(conn)),
                dialect: MysqlDialect::new(),
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
            // Connection state is unknown; keep it out of the pool
            drop(conn.detach());
            return Err(e.into());
        }
        debug!("{}: MySQL {}", self.inner.store, sql);
        Ok(())
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        warn!(
            "{}: MySQL transaction dropped without commit or rollback; rolling back",
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
impl Conn for MysqlTx {
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
            Ok(exec_result(res.rows_affected(), res.last_insert_id()))
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
impl Transaction for MysqlTx {
    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
