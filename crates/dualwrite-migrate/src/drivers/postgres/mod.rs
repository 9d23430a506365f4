//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresPool`]: deadpool-postgres backed pool
//! - [`PostgresTx`]: transaction on one pooled connection

mod dialect;
mod pool;

pub use dialect::PostgresDialect;
pub use pool::{PostgresPool, PostgresTx};
