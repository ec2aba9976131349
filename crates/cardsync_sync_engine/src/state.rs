//! Sync state machine and cycle bookkeeping.

use cardsync_sync_protocol::SyncConflict;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// The state of the sync engine.
///
/// ```text
///           trigger                success
///   Idle ───────────▶ Syncing ───────────▶ Idle
///    ▲                   │ failure
///    │ retry timer       ▼
///    └────────────── Retrying
///
///   any ── connectivity lost ──▶ Offline ── restored ──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Waiting for the next trigger.
    #[default]
    Idle,
    /// A cycle is running.
    Syncing,
    /// The last cycle failed and a retry is scheduled.
    Retrying,
    /// No connectivity. Triggers are ignored.
    Offline,
}

impl SyncState {
    /// Returns true if a cycle is running.
    #[must_use]
    pub fn is_syncing(self) -> bool {
        self == SyncState::Syncing
    }

    /// Returns the state after a connectivity change.
    #[must_use]
    pub fn on_connectivity(self, online: bool) -> SyncState {
        match (self, online) {
            (_, false) => SyncState::Offline,
            (SyncState::Offline, true) => SyncState::Idle,
            (state, true) => state,
        }
    }

    /// Returns the state after a cycle ended.
    #[must_use]
    pub fn after_cycle(success: bool, online: bool) -> SyncState {
        match (online, success) {
            (false, _) => SyncState::Offline,
            (true, true) => SyncState::Idle,
            (true, false) => SyncState::Retrying,
        }
    }
}

/// Cumulative counters of the engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that completed.
    pub cycles_completed: u64,
    /// Cycles that failed.
    pub cycles_failed: u64,
    /// Changes acknowledged by push.
    pub changes_pushed: u64,
    /// Pulled changes that modified local state.
    pub changes_pulled: u64,
    /// Entity conflicts reported by push.
    pub conflicts: u64,
    /// Full syncs performed.
    pub full_syncs: u64,
    /// Completion time of the last successful cycle.
    pub last_success: Option<DateTime<Utc>>,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncCycleResult {
    /// Whether the cycle completed.
    pub success: bool,
    /// Failure message.
    pub error: Option<String>,
    /// Changes acknowledged by push.
    pub pushed: usize,
    /// Pulled changes that modified local state.
    pub pulled: usize,
    /// Pulled changes skipped because the entity has newer local edits.
    pub deferred: usize,
    /// Entity conflicts reported by push.
    pub conflicts: usize,
    /// Whether local state was replaced by a full sync.
    pub full_sync_performed: bool,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    /// Creates a failed result.
    #[must_use]
    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            duration,
            ..Self::default()
        }
    }
}

/// Snapshot of everything a UI needs to render sync status.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Engine state.
    pub state: SyncState,
    /// Whether the device is online.
    pub is_online: bool,
    /// Watermark of the last successful cycle.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Number of unsynced local changes.
    pub pending_changes: usize,
    /// Whether a cycle is running.
    pub sync_in_progress: bool,
    /// Message of the last failure, cleared by the next success.
    pub sync_error: Option<String>,
    /// Conflicts reported since the engine started.
    pub conflicts: Vec<SyncConflict>,
    /// Result of the last consistency validation.
    pub data_consistent: bool,
}
