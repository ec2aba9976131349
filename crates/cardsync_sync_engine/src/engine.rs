//! The sync engine.
//!
//! One cycle runs push, pull, consistency validation and, when the server
//! recommends it, a full sync. The pending log entries of the push snapshot
//! are removed and the watermark advanced only after every step succeeded,
//! so a failed cycle loses nothing and the next one repeats the same work.

use crate::applier::SyncApplier;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::listeners::{StatusListeners, StatusSubscription};
use crate::state::{SyncCycleResult, SyncState, SyncStats, SyncStatus};
use crate::transport::SyncTransport;
use cardsync_core::PendingChangeLog;
use cardsync_sync_protocol::{
    ChangeRecord, ConflictResolution, ConflictResolutionRequest, EntityConflict, FullSyncRequest,
    PullRequest, PushRequest, SyncConflict, ValidateRequest,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Sync engine.
///
/// Cycles are serialized: a call made while another cycle runs returns
/// [`SyncError::AlreadySyncing`] without doing anything.
pub struct SyncEngine<T: SyncTransport, A: SyncApplier> {
    config: SyncConfig,
    transport: T,
    applier: A,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    conflicts: RwLock<Vec<SyncConflict>>,
    online: AtomicBool,
    in_flight: AtomicBool,
    data_consistent: AtomicBool,
    listeners: StatusListeners,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What the steps of one cycle produced.
#[derive(Default)]
struct CycleCounts {
    pushed: usize,
    pulled: usize,
    deferred: usize,
    conflicts: usize,
    full_sync: bool,
}

impl<T: SyncTransport, A: SyncApplier> SyncEngine<T, A> {
    /// Creates a new sync engine. The device is assumed online.
    pub fn new(config: SyncConfig, transport: T, applier: A) -> Self {
        Self {
            config,
            transport,
            applier,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            conflicts: RwLock::new(Vec::new()),
            online: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            data_consistent: AtomicBool::new(true),
            listeners: StatusListeners::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the applier.
    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns every conflict recorded since the engine started.
    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.conflicts.read().clone()
    }

    /// Forgets resolved conflicts and returns how many were dropped.
    pub fn clear_resolved_conflicts(&self) -> usize {
        let mut conflicts = self.conflicts.write();
        let before = conflicts.len();
        conflicts.retain(|c| !c.is_resolved());
        before - conflicts.len()
    }

    /// Returns true if the device is considered online.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity change.
    ///
    /// Returns true if the device went from offline to online, which is
    /// when a cycle should be triggered.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return false;
        }
        {
            let mut state = self.state.write();
            *state = state.on_connectivity(online);
        }
        info!(online, "connectivity changed");
        self.notify();
        online
    }

    /// Returns a snapshot of the sync status.
    pub fn status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            state,
            is_online: self.is_online(),
            last_sync_time: self.applier.last_sync_time(),
            pending_changes: self.applier.pending_count(),
            sync_in_progress: state.is_syncing(),
            sync_error: self.stats.read().last_error.clone(),
            conflicts: self.conflicts(),
            data_consistent: self.data_consistent.load(Ordering::SeqCst),
        }
    }

    /// Registers a listener called with the status after every change.
    pub fn add_status_listener<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Runs one sync cycle and reports its outcome. Never fails.
    pub fn trigger_sync(&self) -> SyncCycleResult {
        let start = Instant::now();
        match self.sync() {
            Ok(result) => result,
            Err(e) => SyncCycleResult::failed(e.to_string(), start.elapsed()),
        }
    }

    /// Runs one sync cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Offline`] or [`SyncError::AlreadySyncing`] if
    /// the cycle could not start, otherwise the error of the failed step.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        self.run_exclusive(|engine, _| engine.cycle())
    }

    /// Runs cycles until one succeeds, sleeping between attempts.
    ///
    /// Gives up after `max_attempts` or on a non-retryable error.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub fn sync_with_retry(&self, max_attempts: u32) -> SyncResult<SyncCycleResult> {
        let mut attempt = 1;
        loop {
            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, ?delay, "sync failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Replaces local state with the server's complete state.
    ///
    /// Pending changes are kept and pushed by the next cycle.
    ///
    /// # Errors
    ///
    /// Same as [`SyncEngine::sync`].
    pub fn force_full_sync(&self) -> SyncResult<SyncCycleResult> {
        self.run_exclusive(|engine, start| {
            let pulled = engine.full_sync(true, &HashSet::new())?.1;
            Ok(SyncCycleResult {
                success: true,
                pulled,
                full_sync_performed: true,
                duration: start.elapsed(),
                ..SyncCycleResult::default()
            })
        })
    }

    /// Settles a conflict on the server.
    ///
    /// The local copy converges on the next pull.
    ///
    /// # Errors
    ///
    /// Fails if offline, if a merge has no data, or if the server did not
    /// confirm the resolution.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
        merged_data: Option<Value>,
    ) -> SyncResult<()> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        if resolution == ConflictResolution::Merge && merged_data.is_none() {
            return Err(SyncError::Conflict(format!(
                "merge of {conflict_id} requires merged data"
            )));
        }

        let request = ConflictResolutionRequest {
            conflict_id: conflict_id.to_string(),
            resolution,
            merged_data,
        };
        let response = self.transport.resolve_conflicts(std::slice::from_ref(&request))?;
        if !response.success || !response.resolved.iter().any(|id| id == conflict_id) {
            return Err(SyncError::Conflict(format!(
                "server did not resolve {conflict_id}"
            )));
        }

        self.mark_resolved(conflict_id, resolution);
        info!(conflict_id, ?resolution, "conflict resolved");
        self.notify();
        Ok(())
    }

    fn run_exclusive<F>(&self, f: F) -> SyncResult<SyncCycleResult>
    where
        F: FnOnce(&Self, Instant) -> SyncResult<SyncCycleResult>,
    {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync already in progress, request coalesced");
            return Err(SyncError::AlreadySyncing);
        }
        let _in_flight = InFlight(&self.in_flight);

        let start = Instant::now();
        self.set_state(SyncState::Syncing);

        let result = f(self, start).map(|mut result| {
            result.duration = start.elapsed();
            result
        });
        match &result {
            Ok(cycle) => self.record_success(cycle),
            Err(e) => self.record_failure(e),
        }
        self.set_state(SyncState::after_cycle(result.is_ok(), self.is_online()));
        result
    }

    fn cycle(&self) -> SyncResult<SyncCycleResult> {
        let last_sync = self.applier.last_sync_time();
        let pending = self.applier.pending_changes();
        let pushed_ids: HashSet<String> = pending.iter().map(|c| c.id.clone()).collect();
        let mut counts = CycleCounts::default();

        if !pending.is_empty() {
            let changes = if self.config.compact_pending {
                PendingChangeLog::from_entries(pending).compacted()
            } else {
                pending
            };
            let (pushed, conflicts) = self.push(last_sync, &changes)?;
            counts.pushed = pushed;
            counts.conflicts = conflicts.len();
            self.handle_conflicts(&conflicts)?;
        }

        let request = PullRequest {
            last_sync_time: last_sync,
            client_id: self.applier.client_id().to_string(),
            platform: self.config.platform.clone(),
        };
        let pull = self.transport.pull(&request)?;
        pull.validate()?;
        let outcome = self.applier.apply_remote_changes(&pull.changes, &pushed_ids)?;
        counts.pulled = outcome.applied;
        counts.deferred = outcome.deferred;
        let mut sync_time = pull.server_time.unwrap_or_else(Utc::now);

        if self.config.validate_consistency && !self.validate()? {
            warn!("local state diverged from server, running full sync");
            let (full_sync_time, pulled) = self.full_sync(false, &pushed_ids)?;
            sync_time = full_sync_time;
            counts.pulled += pulled;
            counts.full_sync = true;
        }

        let removed = self.applier.complete_cycle(&pushed_ids, sync_time)?;
        debug!(removed, %sync_time, "pending log trimmed");

        Ok(SyncCycleResult {
            success: true,
            error: None,
            pushed: counts.pushed,
            pulled: counts.pulled,
            deferred: counts.deferred,
            conflicts: counts.conflicts,
            full_sync_performed: counts.full_sync,
            duration: std::time::Duration::ZERO,
        })
    }

    fn push(
        &self,
        last_sync: Option<DateTime<Utc>>,
        changes: &[cardsync_core::PendingChange],
    ) -> SyncResult<(usize, Vec<EntityConflict>)> {
        let client_id = self.applier.client_id();
        let request = PushRequest {
            last_sync_time: last_sync,
            client_id: client_id.to_string(),
            platform: self.config.platform.clone(),
            changes: changes
                .iter()
                .map(|c| ChangeRecord::from_pending(c, client_id))
                .collect(),
        };
        let response = self.transport.push(&request)?;
        response.validate(request.changes.len())?;
        debug!(
            submitted = request.changes.len(),
            accepted = response.stats.pushed_changes,
            conflicts = response.conflicts.len(),
            "push acknowledged"
        );
        Ok((response.stats.pushed_changes, response.conflicts))
    }

    /// Records conflicts and applies the automatic resolution of the policy.
    fn handle_conflicts(&self, conflicts: &[EntityConflict]) -> SyncResult<()> {
        if conflicts.is_empty() {
            return Ok(());
        }
        let resolution = self.config.conflict_policy.auto_resolution();
        for conflict in conflicts {
            warn!(
                conflict_id = %conflict.conflict_id,
                entity_type = %conflict.entity_type,
                entity_id = conflict.entity_id.as_deref().unwrap_or(""),
                fields = conflict.conflicts.len(),
                "push conflict"
            );
        }

        if resolution == Some(ConflictResolution::ClientWins) {
            let requests: Vec<ConflictResolutionRequest> = conflicts
                .iter()
                .map(|c| ConflictResolutionRequest {
                    conflict_id: c.conflict_id.clone(),
                    resolution: ConflictResolution::ClientWins,
                    merged_data: None,
                })
                .collect();
            let response = self.transport.resolve_conflicts(&requests)?;
            if !response.success {
                return Err(SyncError::Conflict(
                    "server rejected client-wins resolution".into(),
                ));
            }
        }

        self.conflicts.write().extend(
            conflicts
                .iter()
                .flat_map(|c| SyncConflict::from_entity_conflict(c, resolution)),
        );
        Ok(())
    }

    /// Returns false if the server recommends a full sync.
    fn validate(&self) -> SyncResult<bool> {
        let request = ValidateRequest {
            client_id: self.applier.client_id().to_string(),
            entity_checksums: self.applier.entity_checksums(),
        };
        let response = self.transport.validate_consistency(&request)?;
        self.data_consistent
            .store(response.overall_consistent, Ordering::SeqCst);
        if !response.overall_consistent {
            warn!(recommendation = ?response.recommendation, "consistency check failed");
        }
        Ok(!response.needs_full_sync())
    }

    /// Downloads and applies a full snapshot. Returns its time and size.
    fn full_sync(
        &self,
        force: bool,
        pushed: &HashSet<String>,
    ) -> SyncResult<(DateTime<Utc>, usize)> {
        let request = FullSyncRequest {
            client_id: self.applier.client_id().to_string(),
            platform: self.config.platform.clone(),
            force,
        };
        let response = self.transport.full_sync(&request)?;
        response.validate()?;
        let sync_time = response.server_time.unwrap_or_else(Utc::now);
        let replaced = self.applier.replace_all(&response.changes, pushed, sync_time)?;
        self.data_consistent.store(true, Ordering::SeqCst);
        self.stats.write().full_syncs += 1;
        Ok((sync_time, replaced))
    }

    fn mark_resolved(&self, conflict_id: &str, resolution: ConflictResolution) {
        for conflict in self
            .conflicts
            .write()
            .iter_mut()
            .filter(|c| c.conflict_id == conflict_id)
        {
            conflict.resolution = Some(resolution);
        }
    }

    fn record_success(&self, result: &SyncCycleResult) {
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.changes_pushed += result.pushed as u64;
        stats.changes_pulled += result.pulled as u64;
        stats.conflicts += result.conflicts as u64;
        stats.last_success = Some(Utc::now());
        stats.last_error = None;
        info!(
            pushed = result.pushed,
            pulled = result.pulled,
            conflicts = result.conflicts,
            full_sync = result.full_sync_performed,
            duration_ms = result.duration.as_millis() as u64,
            "sync cycle completed"
        );
    }

    fn record_failure(&self, error: &SyncError) {
        let mut stats = self.stats.write();
        stats.cycles_failed += 1;
        stats.last_error = Some(error.to_string());
        warn!(error = %error, retryable = error.is_retryable(), "sync cycle failed");
    }

    fn set_state(&self, state: SyncState) {
        let changed = {
            let mut current = self.state.write();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.notify();
        }
    }

    fn notify(&self) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.notify(&self.status());
    }
}
