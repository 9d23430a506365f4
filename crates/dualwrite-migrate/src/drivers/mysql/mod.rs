//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy for MySQL
//! - [`MysqlPool`]: SQLx backed pool
//! - [`MysqlTx`]: transaction on one pooled connection

mod dialect;
mod pool;

pub use dialect::MysqlDialect;
pub use pool::{MysqlPool, MysqlTx};
