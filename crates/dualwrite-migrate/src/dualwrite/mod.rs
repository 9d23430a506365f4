//! Dual-write routing layer.
//!
//! [`DualWritePool`] sits where the application's pool used to be and routes
//! each call by the current [`Pattern`](crate::core::Pattern):
//!
//! | Pattern        | Reads  | Writes                         |
//! |----------------|--------|--------------------------------|
//! | `base_only`    | base   | base                           |
//! | `base_first`   | base   | base, then target best-effort  |
//! | `target_first` | target | target, then base best-effort  |
//! | `target_only`  | target | target                         |
//!
//! The caller only ever sees the primary store's result. Secondary failures
//! are logged and left for the validator and fixer to repair.

mod pool;
mod tx;

#[cfg(test)]
pub(crate) mod mock;

pub use pool::DualWritePool;
pub use tx::DualWriteTx;

use tracing::{debug, warn};

use crate::core::{Pattern, Side};
use crate::error::MigrateError;

/// Log a failed best-effort operation on the secondary store.
fn log_secondary_failure(side: Side, pattern: Pattern, op: &str, sql: Option<&str>, err: &MigrateError) {
    if matches!(err, MigrateError::Cancelled) {
        debug!("Skipped {} on secondary {} under {}: cancelled", op, side, pattern);
        return;
    }
    match sql {
        Some(sql) => warn!(
            "Secondary {} failed on {} under {} (query: {}): {}",
            op, side, pattern, sql, err
        ),
        None => warn!("Secondary {} failed on {} under {}: {}", op, side, pattern, err),
    }
}
