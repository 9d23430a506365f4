//! Pattern-routed pool over a base and a target store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::log_secondary_failure;
use super::tx::DualWriteTx;
use crate::core::{
    AtomicPattern, Conn, Dialect, ExecResult, Pattern, Row, Side, SqlValue, Statement,
    Transaction, TxBeginner, TxOptions,
};
use crate::error::{MigrateError, Result};

/// Router implementing the pool traits over two stores.
///
/// Every call snapshots the pattern exactly once on entry, so a concurrent
/// [`set_pattern`](Self::set_pattern) never splits one call across two
/// routing modes.
pub struct DualWritePool {
    base: Arc<dyn TxBeginner>,
    target: Arc<dyn TxBeginner>,
    pattern: AtomicPattern,
}

impl DualWritePool {
    pub fn new(base: Arc<dyn TxBeginner>, target: Arc<dyn TxBeginner>, pattern: Pattern) -> Self {
        info!("Dual-write pool created with pattern {}", pattern);
        Self {
            base,
            target,
            pattern: AtomicPattern::new(pattern),
        }
    }

    /// Current routing pattern.
    pub fn pattern(&self) -> Result<Pattern> {
        self.pattern.load()
    }

    /// Switch the routing pattern. Calls already in flight keep the pattern
    /// they started with.
    pub fn set_pattern(&self, pattern: Pattern) {
        match self.pattern.swap(pattern) {
            Ok(previous) if previous == pattern => {
                info!("Dual-write pattern unchanged: {}", pattern)
            }
            Ok(previous) => info!("Dual-write pattern switched: {} -> {}", previous, pattern),
            Err(_) => info!("Dual-write pattern reset to {}", pattern),
        }
    }

    pub fn base(&self) -> &Arc<dyn TxBeginner> {
        &self.base
    }

    pub fn target(&self) -> &Arc<dyn TxBeginner> {
        &self.target
    }

    /// The physical store for one side.
    pub fn side(&self, side: Side) -> &Arc<dyn TxBeginner> {
        match side {
            Side::Base => &self.base,
            Side::Target => &self.target,
        }
    }
}

#[async_trait]
impl Conn for DualWritePool {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        let pattern = self.pattern.load()?;
        let result = self.side(pattern.primary()).exec(cancel, sql, args).await?;

        if let Some(secondary) = pattern.secondary() {
            if let Err(e) = self.side(secondary).exec(cancel, sql, args).await {
                log_secondary_failure(secondary, pattern, "exec", Some(sql), &e);
            }
        }
        Ok(result)
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<Row>> {
        let pattern = self.pattern.load()?;
        self.side(pattern.primary()).query(cancel, sql, args).await
    }

    async fn query_row(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Row> {
        let pattern = self.pattern.load()?;
        self.side(pattern.primary()).query_row(cancel, sql, args).await
    }

    async fn prepare(&self, _cancel: &CancellationToken, _sql: &str) -> Result<Box<dyn Statement>> {
        Err(MigrateError::Unsupported(
            "prepare is not supported by the dual-write pool".into(),
        ))
    }

    /// Dialect of the current primary store.
    fn dialect(&self) -> &dyn Dialect {
        match self.pattern.load() {
            Ok(pattern) => self.side(pattern.primary()).dialect(),
            Err(_) => self.base.dialect(),
        }
    }

    /// Both stores must answer.
    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let (base, target) = tokio::join!(self.base.ping(cancel), self.target.ping(cancel));
        base?;
        target
    }
}

#[async_trait]
impl TxBeginner for DualWritePool {
    async fn begin_tx(
        &self,
        cancel: &CancellationToken,
        opts: &TxOptions,
    ) -> Result<Box<dyn Transaction>> {
        let pattern = self.pattern.load()?;
        let primary = self.side(pattern.primary()).begin_tx(cancel, opts).await?;

        let secondary = match pattern.secondary() {
            Some(side) => match self.side(side).begin_tx(cancel, opts).await {
                Ok(tx) => Some(tx),
                Err(e) => {
                    log_secondary_failure(side, pattern, "begin", None, &e);
                    None
                }
            },
            None => None,
        };

        Ok(Box::new(DualWriteTx::new(pattern, primary, secondary)))
    }
}
