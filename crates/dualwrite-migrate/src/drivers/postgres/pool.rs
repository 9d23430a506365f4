//! PostgreSQL pool and transaction adapters.
//!
//! Uses deadpool-postgres for connection pooling. Statements go through the
//! per-connection statement cache, and parameters are bound natively with the
//! explicit casts produced by [`PostgresDialect`].

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use deadpool_postgres::{ClientWrapper, Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dialect::PostgresDialect;
use crate::config::StoreConfig;
use crate::core::row::{ExecResult, Row};
use crate::core::traits::{
    cancellable, BoundStatement, Conn, Dialect, Statement, Transaction, TxBeginner, TxOptions,
};
use crate::core::value::SqlValue;
use crate::drivers::common::{SslMode, TlsBuilder, POOL_CONNECTION_TIMEOUT};
use crate::error::{MigrateError, Result};

type PgParam = Box<dyn ToSql + Sync + Send>;

/// NULL that binds to a parameter of any type.
#[derive(Debug)]
struct PgNull;

impl ToSql for PgNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn to_param(value: &SqlValue) -> PgParam {
    match value {
        SqlValue::Null => Box::new(PgNull),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::I16(v) => Box::new(*v),
        SqlValue::I32(v) => Box::new(*v),
        SqlValue::I64(v) => Box::new(*v),
        SqlValue::F32(v) => Box::new(*v),
        SqlValue::F64(v) => Box::new(*v),
        SqlValue::Text(v) => Box::new(v.clone()),
        SqlValue::Bytes(v) => Box::new(v.clone()),
        SqlValue::Uuid(v) => Box::new(*v),
        SqlValue::Decimal(v) => Box::new(*v),
        SqlValue::DateTime(v) => Box::new(*v),
        SqlValue::DateTimeOffset(v) => Box::new(*v),
        SqlValue::Date(v) => Box::new(*v),
        SqlValue::Time(v) => Box::new(*v),
    }
}

fn get<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    column: &str,
    wrap: impl FnOnce(T) -> SqlValue,
) -> Result<SqlValue>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
        .map(|v| v.map_or(SqlValue::Null, wrap))
        .map_err(|e| MigrateError::decode(column, e.to_string()))
}

fn decode_value(row: &tokio_postgres::Row, idx: usize, column: &str, ty: &Type) -> Result<SqlValue> {
    match ty.name() {
        "bool" => get::<bool>(row, idx, column, SqlValue::Bool),
        "int2" => get::<i16>(row, idx, column, SqlValue::I16),
        "int4" => get::<i32>(row, idx, column, SqlValue::I32),
        "int8" => get::<i64>(row, idx, column, SqlValue::I64),
        "oid" => get::<u32>(row, idx, column, |v| SqlValue::I64(i64::from(v))),
        "float4" => get::<f32>(row, idx, column, SqlValue::F32),
        "float8" => get::<f64>(row, idx, column, SqlValue::F64),
        "numeric" => get::<Decimal>(row, idx, column, SqlValue::Decimal),
        "bytea" => get::<Vec<u8>>(row, idx, column, SqlValue::Bytes),
        "uuid" => get::<Uuid>(row, idx, column, SqlValue::Uuid),
        "timestamp" => get::<NaiveDateTime>(row, idx, column, SqlValue::DateTime),
        "timestamptz" => get::<DateTime<FixedOffset>>(row, idx, column, SqlValue::DateTimeOffset),
        "date" => get::<NaiveDate>(row, idx, column, SqlValue::Date),
        "time" => get::<NaiveTime>(row, idx, column, SqlValue::Time),
        "json" | "jsonb" => get::<serde_json::Value>(row, idx, column, |v| {
            SqlValue::Text(v.to_string())
        }),
        // text, varchar, bpchar, name and anything else with a text encoding
        _ => get::<String>(row, idx, column, SqlValue::Text),
    }
}

fn decode_rows(rows: &[tokio_postgres::Row], columns: &Arc<[String]>) -> Result<Vec<Row>> {
    rows.iter()
        .map(|row| {
            let values = row
                .columns()
                .iter()
                .enumerate()
                .map(|(i, col)| decode_value(row, i, col.name(), col.type_()))
                .collect::<Result<Vec<_>>>()?;
            Ok(Row::new(Arc::clone(columns), values))
        })
        .collect()
}

async fn run_query(client: &ClientWrapper, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>> {
    let stmt = client.prepare_cached(sql).await?;
    let params: Vec<PgParam> = args.iter().map(to_param).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|p| &**p as &(dyn ToSql + Sync))
        .collect();
    let rows = client.query(&stmt, &refs).await?;
    let columns: Arc<[String]> = stmt
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into();
    decode_rows(&rows, &columns)
}

async fn run_exec(client: &ClientWrapper, sql: &str, args: &[SqlValue]) -> Result<ExecResult> {
    let stmt = client.prepare_cached(sql).await?;
    let params: Vec<PgParam> = args.iter().map(to_param).collect();
    let refs: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|p| &**p as &(dyn ToSql + Sync))
        .collect();
    let affected = client.execute(&stmt, &refs).await?;
    Ok(ExecResult::new(affected))
}

/// PostgreSQL connection pool.
#[derive(Clone)]
pub struct PostgresPool {
    pool: Pool,
    dialect: PostgresDialect,
    store: Arc<str>,
}

impl PostgresPool {
    /// Connect and verify the connection. `store` labels the pool in logs.
    pub async fn connect(config: &StoreConfig, store: &str) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port());
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let tls = TlsBuilder::new(SslMode::parse(&config.ssl_mode)?, store);
        let mgr = match tls.build()? {
            Some(connector) => Manager::from_config(pg_config, connector, mgr_config),
            None => {
                warn!(
                    "{}: PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.",
                    store
                );
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| MigrateError::pool(e, format!("creating {} PostgreSQL pool", store)))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("testing {} PostgreSQL connection", store)))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "{}: connected to PostgreSQL {} (pool size {}, ssl_mode={})",
            store,
            config.describe(),
            config.max_connections,
            tls.ssl_mode()
        );

        Ok(Self::from_pool(pool, store))
    }

    /// Wrap an existing deadpool pool.
    pub fn from_pool(pool: Pool, store: &str) -> Self {
        Self {
            pool,
            dialect: PostgresDialect::new(),
            store: Arc::from(store),
        }
    }

    async fn get_client(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| {
            MigrateError::pool(e, format!("getting {} PostgreSQL connection", self.store))
        })
    }
}

#[async_trait]
impl Conn for PostgresPool {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        cancellable(cancel, async {
            let client = self.get_client().await?;
            run_exec(&client, sql, args).await
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
            let client = self.get_client().await?;
            run_query(&client, sql, args).await
        })
        .await
    }

    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>> {
        cancellable(cancel, async {
            let client = self.get_client().await?;
            client.prepare_cached(sql).await?;
            Ok(BoundStatement::boxed(self.clone(), sql))
        })
        .await
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            let client = self.get_client().await?;
            client.simple_query("SELECT 1").await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TxBeginner for PostgresPool {
    async fn begin_tx(
        &self,
        cancel: &CancellationToken,
        opts: &TxOptions,
    ) -> Result<Box<dyn Transaction>> {
        cancellable(cancel, async {
            let client = self.get_client().await?;
            for stmt in self.dialect.build_begin_statements(opts) {
                client.batch_execute(&stmt).await?;
            }
            debug!("{}: PostgreSQL transaction started", self.store);
            Ok(Box::new(PostgresTx::new(client, Arc::clone(&self.store))) as Box<dyn Transaction>)
        })
        .await
    }
}

/// Transaction pinned to one pooled connection.
///
/// Cloning shares the same transaction; prepared statements hold a clone.
#[derive(Clone)]
pub struct PostgresTx {
    inner: Arc<TxInner>,
}

struct TxInner {
    client: Mutex<Option<Object>>,
    dialect: PostgresDialect,
    store: Arc<str>,
}

impl PostgresTx {
    fn new(client: Object, store: Arc<str>) -> Self {
        Self {
            inner: Arc::new(TxInner {
                client: Mutex::new(Some(client)),
                dialect: PostgresDialect::new(),
                store,
            }),
        }
    }

    async fn finish(&self, sql: &str) -> Result<()> {
        let client = self
            .inner
            .client
            .lock()
            .await
            .take()
            .ok_or(MigrateError::TransactionDone)?;
        let res = client.batch_execute(sql).await;
        if let Err(e) = res {
            // Connection state is unknown; keep it out of the pool
            drop(Object::take(client));
            return Err(e.into());
        }
        debug!("{}: PostgreSQL {}", self.inner.store, sql);
        Ok(())
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        let Some(client) = self.client.get_mut().take() else {
            return;
        };
        warn!(
            "{}: PostgreSQL transaction dropped without commit or rollback; rolling back",
            self.store
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let res = client.batch_execute("ROLLBACK").await;
                    if res.is_err() {
                        drop(Object::take(client));
                    }
                });
            }
            Err(_) => drop(Object::take(client)),
        }
    }
}

#[async_trait]
impl Conn for PostgresTx {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        cancellable(cancel, async {
            let guard = self.inner.client.lock().await;
            let client = guard.as_ref().ok_or(MigrateError::TransactionDone)?;
            run_exec(client, sql, args).await
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
            let guard = self.inner.client.lock().await;
            let client = guard.as_ref().ok_or(MigrateError::TransactionDone)?;
            run_query(client, sql, args).await
        })
        .await
    }

    async fn prepare(&self, cancel: &CancellationToken, sql: &str) -> Result<Box<dyn Statement>> {
        cancellable(cancel, async {
            let guard = self.inner.client.lock().await;
            let client = guard.as_ref().ok_or(MigrateError::TransactionDone)?;
            client.prepare_cached(sql).await?;
            Ok(BoundStatement::boxed(self.clone(), sql))
        })
        .await
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.inner.dialect
    }
}

#[async_trait]
impl Transaction for PostgresTx {
    async fn commit(&self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
