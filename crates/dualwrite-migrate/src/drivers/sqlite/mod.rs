//! SQLite driver.
//!
//! - [`SqliteDialect`]: SQL syntax strategy for SQLite
//! - [`SqlitePool`]: SQLx backed pool over a file or a private in-memory database
//! - [`SqliteTx`]: transaction on one pooled connection

mod dialect;
mod pool;

pub use dialect::SqliteDialect;
pub use pool::{SqlitePool, SqliteTx, MEMORY_PATH};
