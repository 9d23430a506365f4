//! Bidirectional consistency validation.
//!
//! A [`Validator`] runs two scans concurrently:
//!
//! - **Forward** (base to target): pages full rows out of base, looks the
//!   page's identities up in target and reports `TargetMissing` or `NotEqual`
//! - **Reverse** (target to base): pages identities out of target, looks them
//!   up in base and reports `BaseMissing`
//!
//! Findings are published to an [`EventSink`]; they are never errors. Read
//! failures are handled per direction by a [`ScanErrorPolicy`].

pub mod events;
pub mod types;

pub use events::{ChannelSink, Direction, EventSink, InconsistencyEvent, InconsistencyKind, LogSink};
pub use types::{ScanErrorPolicy, ScanStats, ValidationReport};

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ValidatorConfig;
use crate::core::{BuiltQuery, Conn, Entity, Row, RowEntity, Side, SqlValue, TableSpec};
use crate::error::{MigrateError, Result};

/// Default page size for both scans.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time allowed for the sink to accept one event.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of reading one page or lookup.
enum Fetch {
    Rows(Vec<Row>),
    /// The read failed and the policy says to carry on.
    Skipped,
}

/// Consistency validator for one table, generic over its entity type.
pub struct Validator<T> {
    base: Arc<dyn Conn>,
    target: Arc<dyn Conn>,
    sink: Arc<dyn EventSink>,
    table: TableSpec,
    authority: Side,
    batch_size: usize,
    notify_timeout: Duration,
    since: Option<SqlValue>,
    sleep_interval: Option<Duration>,
    forward_policy: ScanErrorPolicy,
    reverse_policy: ScanErrorPolicy,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Validator<T> {
    /// Create a validator treating `base` as authoritative.
    pub fn new(
        base: Arc<dyn Conn>,
        target: Arc<dyn Conn>,
        sink: Arc<dyn EventSink>,
        table: TableSpec,
    ) -> Self {
        Self {
            base,
            target,
            sink,
            table,
            authority: Side::Base,
            batch_size: DEFAULT_BATCH_SIZE,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            since: None,
            sleep_interval: None,
            forward_policy: ScanErrorPolicy::Abort,
            reverse_policy: ScanErrorPolicy::Continue,
            _entity: PhantomData,
        }
    }

    /// Label events with the physical store this validator treats as base.
    pub fn with_authority(mut self, authority: Side) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Only scan rows whose update-time column is at or after `since`.
    ///
    /// Ignored for tables without an update-time column.
    pub fn with_since(mut self, since: SqlValue) -> Self {
        if self.table.utime_column.is_none() {
            warn!(
                "Table {} has no utime_column; scanning all rows",
                self.table.name
            );
        }
        self.since = Some(since);
        self
    }

    /// Keep polling at the end of data instead of returning.
    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = Some(interval);
        self
    }

    pub fn with_error_policies(mut self, forward: ScanErrorPolicy, reverse: ScanErrorPolicy) -> Self {
        self.forward_policy = forward;
        self.reverse_policy = reverse;
        self
    }

    /// Apply batch size, timeouts, polling and policies from configuration.
    pub fn with_config(self, config: &ValidatorConfig) -> Self {
        let validator = self
            .with_batch_size(config.batch_size)
            .with_notify_timeout(config.notify_timeout())
            .with_error_policies(config.forward_error_policy, config.reverse_error_policy);
        match config.sleep_interval() {
            Some(interval) => validator.with_sleep_interval(interval),
            None => validator,
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    pub fn authority(&self) -> Side {
        self.authority
    }

    /// Run both scans concurrently and wait for both.
    ///
    /// A table described without columns is projected with every column of
    /// the base table. A hard error in either scan cancels the other one and
    /// is returned.
    pub async fn validate(&self, cancel: &CancellationToken) -> Result<ValidationReport> {
        let start = Instant::now();
        let table = self
            .table
            .clone()
            .resolve_columns(cancel, self.base.as_ref())
            .await?;
        info!(
            "Validating {} (authority {}, batch size {}, {} columns)",
            table.name,
            self.authority,
            self.batch_size,
            table.columns.len()
        );

        let forward_cancel = cancel.child_token();
        let reverse_cancel = cancel.child_token();
        let (forward, reverse) = tokio::join!(
            async {
                let result = self.forward_scan(&table, &forward_cancel).await;
                if result.is_err() {
                    reverse_cancel.cancel();
                }
                result
            },
            async {
                let result = self.reverse_scan(&table, &reverse_cancel).await;
                if result.is_err() {
                    forward_cancel.cancel();
                }
                result
            },
        );
        let (forward, reverse) = first_error(forward, reverse)?;
        let report = ValidationReport { forward, reverse };

        info!(
            "Validation of {} finished in {:?}: {} target missing, {} not equal, {} base missing",
            table.name,
            start.elapsed(),
            report.forward.target_missing,
            report.forward.not_equal,
            report.reverse.base_missing
        );
        Ok(report)
    }

    async fn forward_scan(&self, table: &TableSpec, cancel: &CancellationToken) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut offset = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let page = self.base.dialect().build_page_query(
                table,
                self.since.as_ref(),
                false,
                self.batch_size,
                offset,
            );
            let rows = match fetch(&*self.base, cancel, &page, self.forward_policy, "base page").await? {
                Fetch::Rows(rows) => rows,
                Fetch::Skipped => return Ok(stats),
            };

            if rows.is_empty() {
                match self.sleep_interval {
                    Some(interval) => {
                        pause(cancel, interval).await?;
                        continue;
                    }
                    None => break,
                }
            }

            let entities = decode::<T>(&rows)?;
            offset += rows.len();
            stats.pages += 1;
            stats.rows_scanned += rows.len() as u64;

            let ids: Vec<i64> = entities.iter().map(Entity::id).collect();
            let lookup = self.target.dialect().build_lookup_query(table, &ids, false);
            let found = match fetch(&*self.target, cancel, &lookup, self.forward_policy, "target lookup").await? {
                Fetch::Rows(rows) => decode::<T>(&rows)?,
                Fetch::Skipped => {
                    stats.pages_skipped += 1;
                    continue;
                }
            };
            let by_id: HashMap<i64, T> = found.into_iter().map(|e| (e.id(), e)).collect();

            for entity in &entities {
                let kind = match by_id.get(&entity.id()) {
                    None => {
                        stats.target_missing += 1;
                        InconsistencyKind::TargetMissing
                    }
                    Some(other) if !entity.compare_to(other) => {
                        stats.not_equal += 1;
                        InconsistencyKind::NotEqual
                    }
                    Some(_) => continue,
                };
                self.notify(entity.id(), Direction::BaseToTarget, kind, &mut stats)
                    .await;
            }

            debug!(
                "{} forward page at offset {}: {} rows, {} found in target",
                table.name,
                offset,
                entities.len(),
                by_id.len()
            );
        }

        Ok(stats)
    }

    async fn reverse_scan(&self, table: &TableSpec, cancel: &CancellationToken) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut offset = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let page = self.target.dialect().build_page_query(
                table,
                self.since.as_ref(),
                true,
                self.batch_size,
                offset,
            );
            let rows = match fetch(&*self.target, cancel, &page, self.reverse_policy, "target page").await? {
                Fetch::Rows(rows) => rows,
                Fetch::Skipped => return Ok(stats),
            };

            let ids = decode::<RowEntity>(&rows)?
                .iter()
                .map(Entity::id)
                .collect::<Vec<_>>();
            offset += ids.len();

            if !ids.is_empty() {
                stats.pages += 1;
                stats.rows_scanned += ids.len() as u64;

                let lookup = self.base.dialect().build_lookup_query(table, &ids, true);
                match fetch(&*self.base, cancel, &lookup, self.reverse_policy, "base lookup").await? {
                    Fetch::Rows(found) => {
                        let present: HashSet<i64> = decode::<RowEntity>(&found)?
                            .iter()
                            .map(Entity::id)
                            .collect();
                        for id in ids.iter().copied().filter(|id| !present.contains(id)) {
                            stats.base_missing += 1;
                            self.notify(
                                id,
                                Direction::TargetToBase,
                                InconsistencyKind::BaseMissing,
                                &mut stats,
                            )
                            .await;
                        }
                    }
                    Fetch::Skipped => stats.pages_skipped += 1,
                }
            }

            if ids.len() < self.batch_size {
                match self.sleep_interval {
                    Some(interval) => pause(cancel, interval).await?,
                    None => break,
                }
            }
        }

        Ok(stats)
    }

    /// Hand one event to the sink; failures are counted, never returned.
    async fn notify(
        &self,
        id: i64,
        direction: Direction,
        kind: InconsistencyKind,
        stats: &mut ScanStats,
    ) {
        let event = InconsistencyEvent::new(id, direction, kind, self.authority);
        match tokio::time::timeout(self.notify_timeout, self.sink.publish(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to publish {}: {}", event, e);
                stats.events_failed += 1;
            }
            Err(_) => {
                warn!(
                    "Timed out after {:?} publishing {}",
                    self.notify_timeout, event
                );
                stats.events_failed += 1;
            }
        }
    }
}

/// Pick the error to report from two scan results.
///
/// A scan stopped because its sibling failed ends with `Cancelled`; the
/// sibling's error is the one that happened first.
fn first_error(
    forward: Result<ScanStats>,
    reverse: Result<ScanStats>,
) -> Result<(ScanStats, ScanStats)> {
    match (forward, reverse) {
        (Ok(forward), Ok(reverse)) => Ok((forward, reverse)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(MigrateError::Cancelled), Err(e)) => Err(e),
        (Err(e), Err(_)) => Err(e),
    }
}

/// Run one read, applying the scan's error policy.
///
/// "No rows" is an empty result. Cancellation always propagates.
async fn fetch(
    conn: &dyn Conn,
    cancel: &CancellationToken,
    query: &BuiltQuery,
    policy: ScanErrorPolicy,
    what: &str,
) -> Result<Fetch> {
    match conn.query(cancel, &query.sql, &query.params).await {
        Ok(rows) => Ok(Fetch::Rows(rows)),
        Err(e) if e.is_no_rows() => Ok(Fetch::Rows(Vec::new())),
        Err(MigrateError::Cancelled) => Err(MigrateError::Cancelled),
        Err(e) => match policy {
            ScanErrorPolicy::Abort => Err(e),
            ScanErrorPolicy::Continue => {
                warn!("{} read on {} failed, continuing: {}", what, conn.dialect().name(), e);
                Ok(Fetch::Skipped)
            }
        },
    }
}

fn decode<T: Entity>(rows: &[Row]) -> Result<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}

async fn pause(cancel: &CancellationToken, interval: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(MigrateError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}
