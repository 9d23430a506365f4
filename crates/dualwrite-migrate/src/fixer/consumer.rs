//! Drains inconsistency events and applies fixes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{FixAction, Fixer};
use crate::core::Side;
use crate::error::{MigrateError, Result};
use crate::verify::InconsistencyEvent;

/// Counters for one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeStats {
    pub received: u64,
    pub upserted: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl ConsumeStats {
    fn record(&mut self, action: FixAction) {
        match action {
            FixAction::Upserted => self.upserted += 1,
            FixAction::Deleted => self.deleted += 1,
            FixAction::Unchanged => self.unchanged += 1,
        }
    }
}

/// Dispatches each event to the fixer oriented for its authority.
#[derive(Default)]
pub struct FixConsumer {
    fixers: HashMap<Side, Arc<Fixer>>,
}

impl FixConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fixer for events whose authority is `authority`.
    ///
    /// The fixer's base must be the physical store named by `authority`.
    pub fn with_fixer(mut self, authority: Side, fixer: Fixer) -> Self {
        self.fixers.insert(authority, Arc::new(fixer));
        self
    }

    /// Fix the identity named by one event.
    pub async fn handle(&self, cancel: &CancellationToken, event: InconsistencyEvent) -> Result<FixAction> {
        let fixer = self.fixers.get(&event.authority).ok_or_else(|| {
            MigrateError::Config(format!("no fixer registered for authority {}", event.authority))
        })?;
        fixer.fix(cancel, event.id).await
    }

    /// Consume events until the channel closes or `cancel` fires.
    ///
    /// Fix failures are logged and counted; they never stop the consumer.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        mut rx: mpsc::Receiver<InconsistencyEvent>,
    ) -> ConsumeStats {
        let mut stats = ConsumeStats::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            stats.received += 1;

            match self.handle(cancel, event).await {
                Ok(action) => stats.record(action),
                Err(MigrateError::Cancelled) => break,
                Err(e) => {
                    error!("Fix failed for {}: {}", event, e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Fix consumer stopped: {} events, {} upserted, {} deleted, {} unchanged, {} failed",
            stats.received, stats.upserted, stats.deleted, stats.unchanged, stats.failed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Conn, SqlValue, TableSpec};
    use crate::drivers::sqlite::SqlitePool;
    use crate::verify::{Direction, InconsistencyKind};

    async fn store(ids: &[i64]) -> Arc<SqlitePool> {
        let pool = SqlitePool::in_memory("test").await.unwrap();
        let cancel = CancellationToken::new();
        pool.exec(&cancel, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", &[])
            .await
            .unwrap();
        for id in ids {
            pool.exec(
                &cancel,
                "INSERT INTO t (id, v) VALUES (?, 'x')",
                &[SqlValue::I64(*id)],
            )
            .await
            .unwrap();
        }
        Arc::new(pool)
    }

    fn event(id: i64, kind: InconsistencyKind, authority: Side) -> InconsistencyEvent {
        InconsistencyEvent::new(id, Direction::BaseToTarget, kind, authority)
    }

    #[tokio::test]
    async fn test_consumer_applies_and_counts() {
        let base = store(&[1]).await;
        let target = store(&[2]).await;
        let spec = TableSpec::new("t").with_columns(["id", "v"]);
        let consumer =
            FixConsumer::new().with_fixer(Side::Base, Fixer::new(base, target.clone(), spec).unwrap());

        let (tx, rx) = mpsc::channel(8);
        tx.send(event(1, InconsistencyKind::TargetMissing, Side::Base)).await.unwrap();
        tx.send(event(1, InconsistencyKind::TargetMissing, Side::Base)).await.unwrap();
        tx.send(event(2, InconsistencyKind::BaseMissing, Side::Base)).await.unwrap();
        tx.send(event(3, InconsistencyKind::NotEqual, Side::Target)).await.unwrap();
        drop(tx);

        let stats = consumer.run(&CancellationToken::new(), rx).await;
        assert_eq!(
            stats,
            ConsumeStats {
                received: 4,
                upserted: 1,
                deleted: 1,
                unchanged: 1,
                failed: 1,
            }
        );

        let rows = target
            .query(&CancellationToken::new(), "SELECT id FROM t ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_i64("id").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_consumer_stops_on_cancel() {
        let consumer = FixConsumer::new();
        let (_tx, rx) = mpsc::channel::<InconsistencyEvent>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stats = consumer.run(&cancel, rx).await;
        assert_eq!(stats.received, 0);
    }
}
