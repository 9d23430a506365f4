//! Operator surface: pattern switching and background validation.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ValidatorConfig;
use crate::core::{Conn, Entity, Pattern, Side, SqlValue, TableSpec};
use crate::dualwrite::DualWritePool;
use crate::error::{MigrateError, Result};
use crate::verify::{EventSink, ValidationReport, Validator};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<Result<ValidationReport>>,
}

/// Runs at most one validation at a time for one table.
///
/// The validator follows the router's pattern: under `base_only` and
/// `base_first` it checks target against base with authority `base`; under
/// `target_first` and `target_only` it checks base against target with
/// authority `target`.
pub struct MigrationScheduler<T> {
    router: Arc<DualWritePool>,
    table: TableSpec,
    sink: Arc<dyn EventSink>,
    config: ValidatorConfig,
    running: Mutex<Option<Running>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> MigrationScheduler<T> {
    pub fn new(
        router: Arc<DualWritePool>,
        table: TableSpec,
        sink: Arc<dyn EventSink>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            router,
            table,
            sink,
            config,
            running: Mutex::new(None),
            _entity: PhantomData,
        }
    }

    pub fn router(&self) -> &Arc<DualWritePool> {
        &self.router
    }

    /// Switch the router's pattern and stop any running validation, whose
    /// orientation may no longer match.
    pub fn set_pattern(&self, pattern: Pattern) {
        self.router.set_pattern(pattern);
        if self.stop_validation() {
            info!(
                "Validation of {} stopped by pattern switch to {}",
                self.table.name, pattern
            );
        }
    }

    /// Validate the whole table once in the background.
    pub fn start_full_validation(&self) -> Result<()> {
        self.start(None, None)
    }

    /// Validate rows updated at or after `since`, polling every `interval`
    /// until stopped.
    pub fn start_incremental_validation(&self, since: SqlValue, interval: Duration) -> Result<()> {
        self.start(Some(since), Some(interval))
    }

    /// Cancel the running validation. Returns whether one was running.
    pub fn stop_validation(&self) -> bool {
        match self.lock().take() {
            Some(running) => {
                running.cancel.cancel();
                !running.handle.is_finished()
            }
            None => false,
        }
    }

    pub fn is_validating(&self) -> bool {
        self.lock()
            .as_ref()
            .map_or(false, |running| !running.handle.is_finished())
    }

    /// Wait for the current validation to end and take its result.
    ///
    /// Returns `None` when nothing was started since the last stop or wait.
    pub async fn wait(&self) -> Option<Result<ValidationReport>> {
        let running = self.lock().take()?;
        Some(match running.handle.await {
            Ok(result) => result,
            Err(e) => Err(MigrateError::Task(e.to_string())),
        })
    }

    fn start(&self, since: Option<SqlValue>, interval: Option<Duration>) -> Result<()> {
        let pattern = self.router.pattern()?;
        let validator = self.validator(pattern.primary(), since, interval);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let table = self.table.name.clone();

        info!(
            "Starting {} validation of {} under {}",
            if interval.is_some() { "incremental" } else { "full" },
            table,
            pattern
        );
        let handle = tokio::spawn(async move {
            let result = validator.validate(&token).await;
            match &result {
                Ok(report) => info!(
                    "Validation of {} complete: {} inconsistencies",
                    table,
                    report.inconsistencies()
                ),
                Err(MigrateError::Cancelled) => info!("Validation of {} stopped", table),
                Err(e) => error!("Validation of {} failed: {}", table, e),
            }
            result
        });

        if let Some(previous) = self.lock().replace(Running { cancel, handle }) {
            previous.cancel.cancel();
        }
        Ok(())
    }

    fn validator(
        &self,
        authority: Side,
        since: Option<SqlValue>,
        interval: Option<Duration>,
    ) -> Validator<T> {
        let base: Arc<dyn Conn> = Arc::new(Arc::clone(self.router.side(authority)));
        let target: Arc<dyn Conn> = Arc::new(Arc::clone(self.router.side(authority.opposite())));

        let mut validator = Validator::new(base, target, Arc::clone(&self.sink), self.table.clone())
            .with_authority(authority)
            .with_config(&self.config);
        if let Some(since) = since {
            validator = validator.with_since(since);
        }
        if let Some(interval) = interval {
            validator = validator.with_sleep_interval(interval);
        }
        validator
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for MigrationScheduler<T> {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = running.take() {
            running.cancel.cancel();
        }
    }
}
