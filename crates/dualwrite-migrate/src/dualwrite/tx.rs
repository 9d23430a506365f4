//! Transaction opened by the dual-write pool.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::log_secondary_failure;
use crate::core::{Conn, Dialect, ExecResult, Pattern, Row, Side, SqlValue, Statement, Transaction};
use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Commit,
    Rollback,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Commit => "commit",
            Outcome::Rollback => "rollback",
        }
    }

    async fn apply(self, tx: &dyn Transaction) -> Result<()> {
        match self {
            Outcome::Commit => tx.commit().await,
            Outcome::Rollback => tx.rollback().await,
        }
    }
}

/// A primary transaction plus an optional secondary one.
///
/// The routing pattern is fixed when the transaction begins. The secondary
/// is absent when the pattern has no secondary or its begin failed; absent
/// handles are skipped.
pub struct DualWriteTx {
    pattern: Pattern,
    primary: Box<dyn Transaction>,
    secondary: Option<Box<dyn Transaction>>,
    finished: AtomicBool,
}

impl DualWriteTx {
    pub(crate) fn new(
        pattern: Pattern,
        primary: Box<dyn Transaction>,
        secondary: Option<Box<dyn Transaction>>,
    ) -> Self {
        debug!(
            "Dual-write transaction opened under {} (secondary {})",
            pattern,
            if secondary.is_some() { "open" } else { "absent" }
        );
        Self {
            pattern,
            primary,
            secondary,
            finished: AtomicBool::new(false),
        }
    }

    /// Pattern captured at begin.
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Whether this transaction holds a handle on `side`.
    pub fn has_side(&self, side: Side) -> bool {
        side == self.pattern.primary()
            || (self.secondary.is_some() && Some(side) == self.pattern.secondary())
    }

    /// Finish the primary, then the secondary.
    ///
    /// The transaction is done after the first call whatever its result. A
    /// failed primary commit rolls the secondary back and returns the
    /// primary's error.
    async fn finish(&self, outcome: Outcome) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(MigrateError::TransactionDone);
        }

        let secondary = self.secondary.as_deref().zip(self.pattern.secondary());
        if let Err(e) = outcome.apply(self.primary.as_ref()).await {
            if let (Outcome::Commit, Some((tx, side))) = (outcome, secondary) {
                if let Err(rollback) = tx.rollback().await {
                    log_secondary_failure(side, self.pattern, "rollback", None, &rollback);
                }
            }
            return Err(e);
        }

        if let Some((tx, side)) = secondary {
            if let Err(e) = outcome.apply(tx).await {
                log_secondary_failure(side, self.pattern, outcome.as_str(), None, &e);
            }
        }
        debug!("Dual-write transaction {} under {}", outcome.as_str(), self.pattern);
        Ok(())
    }
}

#[async_trait]
impl Conn for DualWriteTx {
    async fn exec(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<ExecResult> {
        let result = self.primary.exec(cancel, sql, args).await?;

        if let (Some(tx), Some(side)) = (&self.secondary, self.pattern.secondary()) {
            if let Err(e) = tx.exec(cancel, sql, args).await {
                log_secondary_failure(side, self.pattern, "exec", Some(sql), &e);
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
        self.primary.query(cancel, sql, args).await
    }

    async fn query_row(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Row> {
        self.primary.query_row(cancel, sql, args).await
    }

    async fn prepare(&self, _cancel: &CancellationToken, _sql: &str) -> Result<Box<dyn Statement>> {
        Err(MigrateError::Unsupported(
            "prepare is not supported inside a dual-write transaction".into(),
        ))
    }

    fn dialect(&self) -> &dyn Dialect {
        self.primary.dialect()
    }
}

#[async_trait]
impl Transaction for DualWriteTx {
    async fn commit(&self) -> Result<()> {
        self.finish(Outcome::Commit).await
    }

    async fn rollback(&self) -> Result<()> {
        self.finish(Outcome::Rollback).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::{TxBeginner, TxOptions};
    use crate::dualwrite::mock::{MockStore, Op};
    use crate::dualwrite::DualWritePool;

    async fn begin(pool: &DualWritePool) -> Box<dyn Transaction> {
        pool.begin_tx(&CancellationToken::new(), &TxOptions::default())
            .await
            .unwrap()
    }

    fn router(pattern: Pattern) -> (Arc<DualWritePool>, Arc<MockStore>, Arc<MockStore>) {
        let (base, target) = MockStore::pair();
        let pool = DualWritePool::new(base.clone(), target.clone(), pattern);
        (Arc::new(pool), base, target)
    }

    #[tokio::test]
    async fn test_base_first_begin_with_failing_target() {
        let cancel = CancellationToken::new();
        let (pool, base, target) = router(Pattern::BaseFirst);
        target.fail(Op::Begin);

        let tx = begin(&pool).await;
        tx.exec(&cancel, "UPDATE t SET a = 1", &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            base.calls(),
            vec!["base begin", "base exec tx UPDATE t SET a = 1", "base commit"]
        );
        assert_eq!(target.calls(), vec!["target begin"]);
    }

    #[tokio::test]
    async fn test_base_first_primary_begin_failure() {
        let (pool, base, target) = router(Pattern::BaseFirst);
        base.fail(Op::Begin);

        let res = pool
            .begin_tx(&CancellationToken::new(), &TxOptions::default())
            .await;
        assert!(matches!(res, Err(MigrateError::Pool { .. })));
        assert!(target.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pattern_captured_at_begin() {
        let cancel = CancellationToken::new();
        let (pool, base, target) = router(Pattern::BaseFirst);
        let tx = begin(&pool).await;

        pool.set_pattern(Pattern::TargetOnly);
        tx.exec(&cancel, "INSERT INTO t VALUES (1)", &[]).await.unwrap();
        let rows = tx.query(&cancel, "SELECT a FROM t", &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(rows[0].get_string("side").unwrap(), "base");
        assert_eq!(
            base.log(),
            vec![
                "base begin",
                "target begin",
                "base exec tx INSERT INTO t VALUES (1)",
                "target exec tx INSERT INTO t VALUES (1)",
                "base query tx SELECT a FROM t",
                "base commit",
                "target commit",
            ]
        );
        assert_eq!(target.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_primary_commit_failure_rolls_back_secondary() {
        let (pool, base, target) = router(Pattern::TargetFirst);
        target.fail(Op::Commit);

        let tx = begin(&pool).await;
        let err = tx.commit().await.unwrap_err();
        assert!(err.to_string().contains("injected commit failure"));
        assert_eq!(base.calls(), vec!["base begin", "base rollback"]);
        assert_eq!(target.calls(), vec!["target begin", "target commit"]);
        assert!(matches!(tx.rollback().await, Err(MigrateError::TransactionDone)));
    }

    #[tokio::test]
    async fn test_primary_rollback_failure_skips_secondary() {
        let (pool, base, target) = router(Pattern::BaseFirst);
        base.fail(Op::Rollback);

        let tx = begin(&pool).await;
        assert!(tx.rollback().await.is_err());
        assert_eq!(target.calls(), vec!["target begin"]);
    }

    #[tokio::test]
    async fn test_secondary_commit_failure_is_swallowed() {
        let (pool, base, target) = router(Pattern::BaseFirst);
        target.fail(Op::Commit);

        let tx = begin(&pool).await;
        target.heal(Op::Commit);
        tx.commit().await.unwrap();
        assert_eq!(base.calls(), vec!["base begin", "base commit"]);
        assert_eq!(target.calls(), vec!["target begin", "target commit"]);
    }

    #[tokio::test]
    async fn test_rollback_both_sides() {
        let (pool, base, target) = router(Pattern::TargetFirst);
        let tx = begin(&pool).await;
        tx.rollback().await.unwrap();
        assert_eq!(
            base.log(),
            vec!["target begin", "base begin", "target rollback", "base rollback"]
        );
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_second_finish_is_transaction_done() {
        let (pool, _base, _target) = router(Pattern::BaseOnly);
        let tx = begin(&pool).await;
        tx.commit().await.unwrap();
        assert!(matches!(tx.commit().await, Err(MigrateError::TransactionDone)));
        assert!(matches!(tx.rollback().await, Err(MigrateError::TransactionDone)));
    }

    #[tokio::test]
    async fn test_prepare_unsupported_in_tx() {
        let (pool, _base, _target) = router(Pattern::BaseFirst);
        let tx = begin(&pool).await;
        assert!(matches!(
            tx.prepare(&CancellationToken::new(), "SELECT 1").await,
            Err(MigrateError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_has_side() {
        let (pool, _base, target) = router(Pattern::BaseFirst);
        let tx = DualWriteTx::new(Pattern::BaseFirst, begin(&pool).await, None);
        assert!(tx.has_side(Side::Base));
        assert!(!tx.has_side(Side::Target));

        let secondary = target
            .begin_tx(&CancellationToken::new(), &TxOptions::default())
            .await
            .unwrap();
        let tx = DualWriteTx::new(Pattern::BaseFirst, begin(&pool).await, Some(secondary));
        assert!(tx.has_side(Side::Target));
    }
}
