//! # dualwrite-migrate
//!
//! Online migration of a table's system of record from one relational store
//! ("base") to another ("target") without downtime.
//!
//! - **Dual-write routing**: [`DualWritePool`] replaces the application's pool
//!   and routes reads, writes and transactions by a live-switchable
//!   [`Pattern`]
//! - **Consistency validation**: [`Validator`] scans both stores in both
//!   directions and publishes [`InconsistencyEvent`]s
//! - **Convergence repair**: [`Fixer`] forces the target row for one identity
//!   to match base; [`FixConsumer`] applies fixes from an event channel
//! - **Scheduling**: [`MigrationScheduler`] ties pattern switches to
//!   background validation runs
//!
//! PostgreSQL, MySQL and SQLite stores are supported.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dualwrite_migrate::{drivers, Config, DualWritePool};
//! use dualwrite_migrate::core::Conn;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> dualwrite_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let base = drivers::connect(&config.base, "base").await?;
//!     let target = drivers::connect(&config.target, "target").await?;
//!     let pool = Arc::new(DualWritePool::new(base, target, config.migration.pattern));
//!
//!     let cancel = CancellationToken::new();
//!     pool.exec(&cancel, "UPDATE users SET name = 'x' WHERE id = 1", &[]).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod dualwrite;
pub mod error;
pub mod fixer;
pub mod scheduler;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, StoreConfig, StoreType, ValidatorConfig};
pub use crate::core::{Entity, Pattern, Row, RowEntity, Side, SqlValue, TableSpec};
pub use dualwrite::{DualWritePool, DualWriteTx};
pub use error::{MigrateError, Result};
pub use fixer::{ConsumeStats, FixAction, FixConsumer, Fixer};
pub use scheduler::MigrationScheduler;
pub use verify::{
    ChannelSink, EventSink, InconsistencyEvent, InconsistencyKind, LogSink, ScanErrorPolicy,
    ValidationReport, Validator,
};
