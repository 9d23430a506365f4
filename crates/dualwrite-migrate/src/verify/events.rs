//! Inconsistency events and the sinks that carry them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::pattern::Side;
use crate::error::{MigrateError, Result};

/// Which scan produced an event. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    BaseToTarget,
    TargetToBase,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::BaseToTarget => "base_to_target",
            Direction::TargetToBase => "target_to_base",
        }
    }
}

/// What kind of divergence was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// Present in base, absent in target.
    TargetMissing,
    /// Present in target, absent in base.
    BaseMissing,
    /// Present in both with different content.
    NotEqual,
}

impl InconsistencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InconsistencyKind::TargetMissing => "target_missing",
            InconsistencyKind::BaseMissing => "base_missing",
            InconsistencyKind::NotEqual => "not_equal",
        }
    }
}

/// Divergence detected for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InconsistencyEvent {
    pub id: i64,
    pub direction: Direction,
    pub kind: InconsistencyKind,
    /// Physical store the producing validator treated as base.
    pub authority: Side,
}

impl InconsistencyEvent {
    pub fn new(id: i64, direction: Direction, kind: InconsistencyKind, authority: Side) -> Self {
        Self {
            id,
            direction,
            kind,
            authority,
        }
    }
}

impl fmt::Display for InconsistencyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} kind={} direction={} authority={}",
            self.id,
            self.kind.as_str(),
            self.direction.as_str(),
            self.authority
        )
    }
}

/// Destination for inconsistency events.
///
/// Delivery is at least once; consumers must tolerate duplicates.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: InconsistencyEvent) -> Result<()>;
}

/// In-process transport over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<InconsistencyEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<InconsistencyEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<InconsistencyEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, event: InconsistencyEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| MigrateError::Publish("event channel closed".into()))
    }
}

/// Writes each event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, event: InconsistencyEvent) -> Result<()> {
        warn!("Inconsistency detected: {}", event);
        Ok(())
    }
}
