//! Store driver implementations.
//!
//! Each driver implements the pool traits from [`crate::core::traits`]:
//!
//! - [`postgres`]: PostgreSQL via deadpool-postgres
//! - [`mysql`]: MySQL/MariaDB via SQLx
//! - [`sqlite`]: SQLite via SQLx
//! - [`common`]: Shared utilities (TLS, pool timeouts)
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect`, `Conn`, `TxBeginner` and `Transaction`
//! 3. Add a `StoreType` variant and a branch in [`connect`]

pub mod common;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

// Re-export common utilities
pub use common::{SslMode, TlsBuilder};

// Re-export driver types
pub use mysql::{MysqlDialect, MysqlPool};
pub use postgres::{PostgresDialect, PostgresPool};
pub use sqlite::{SqliteDialect, SqlitePool};

use std::sync::Arc;

use crate::config::{StoreConfig, StoreType};
use crate::core::traits::TxBeginner;
use crate::error::Result;

/// Open a pool for the configured store. `store` labels it in logs.
pub async fn connect(config: &StoreConfig, store: &str) -> Result<Arc<dyn TxBeginner>> {
    let pool: Arc<dyn TxBeginner> = match config.r#type {
        StoreType::Postgres => Arc::new(PostgresPool::connect(config, store).await?),
        StoreType::Mysql => Arc::new(MysqlPool::connect(config, store).await?),
        StoreType::Sqlite => Arc::new(SqlitePool::connect(config, store).await?),
    };
    Ok(pool)
}
