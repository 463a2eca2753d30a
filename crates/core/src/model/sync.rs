use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::day_progress::DayProgress;
use super::ids::{ClientId, DayId};

/// How to reconcile a local and a remote copy of the same day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LocalWins,
    RemoteWins,
    #[default]
    Merge,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown conflict strategy: {0}")]
pub struct StrategyParseError(String);

impl ConflictStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_wins" => Ok(ConflictStrategy::LocalWins),
            "remote_wins" => Ok(ConflictStrategy::RemoteWins),
            "merge" => Ok(ConflictStrategy::Merge),
            other => Err(StrategyParseError(other.to_owned())),
        }
    }
}

/// Storage envelope around a `DayProgress`.
///
/// `dirty` is true iff a local mutation has not yet been acknowledged by the
/// remote. `sync_version` increases monotonically on each successful remote
/// write and arbitrates cross-device ordering instead of wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncableRecord {
    pub progress: DayProgress,
    pub dirty: bool,
    pub sync_version: i64,
    pub client_id: ClientId,
}

impl SyncableRecord {
    /// Wraps a freshly mutated record, pending push to the remote.
    #[must_use]
    pub fn new_dirty(progress: DayProgress, client_id: ClientId) -> Self {
        Self {
            progress,
            dirty: true,
            sync_version: 0,
            client_id,
        }
    }

    /// Wraps a record already acknowledged by the remote.
    #[must_use]
    pub fn clean(progress: DayProgress, sync_version: i64, client_id: ClientId) -> Self {
        Self {
            progress,
            dirty: false,
            sync_version,
            client_id,
        }
    }
}

/// Kinds of mutation that can wait in the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    SectionUpdate,
    QuizUpdate,
    SlideUpdate,
}

impl SyncAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::SectionUpdate => "section_update",
            SyncAction::QuizUpdate => "quiz_update",
            SyncAction::SlideUpdate => "slide_update",
        }
    }
}

impl FromStr for SyncAction {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "section_update" => Ok(SyncAction::SectionUpdate),
            "quiz_update" => Ok(SyncAction::QuizUpdate),
            "slide_update" => Ok(SyncAction::SlideUpdate),
            other => Err(StrategyParseError(other.to_owned())),
        }
    }
}

/// One pending mutation awaiting a successful sync pass.
///
/// Entries are consumed by a successful pass, retried otherwise, and reaped
/// after the retention window regardless of outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueEntry {
    pub id: Option<i64>,
    pub action: SyncAction,
    pub day: DayId,
    pub enqueued_at: DateTime<Utc>,
    pub retries: u32,
}

impl SyncQueueEntry {
    #[must_use]
    pub fn new(action: SyncAction, day: DayId, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            action,
            day,
            enqueued_at: now,
            retries: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_round_trips_through_str() {
        for strategy in [
            ConflictStrategy::LocalWins,
            ConflictStrategy::RemoteWins,
            ConflictStrategy::Merge,
        ] {
            assert_eq!(strategy.as_str().parse::<ConflictStrategy>().unwrap(), strategy);
        }
        assert!("newest_wins".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn default_strategy_is_merge() {
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::Merge);
    }

    #[test]
    fn action_round_trips_through_str() {
        for action in [
            SyncAction::SectionUpdate,
            SyncAction::QuizUpdate,
            SyncAction::SlideUpdate,
        ] {
            assert_eq!(action.as_str().parse::<SyncAction>().unwrap(), action);
        }
    }
}
