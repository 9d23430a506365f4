//! Utilities shared across store drivers.
//!
//! - [`tls`]: rustls configuration for PostgreSQL connections

pub mod tls;

pub use tls::{SslMode, TlsBuilder};

use std::time::Duration;

/// How long a pool waits for a free connection.
pub(crate) const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
