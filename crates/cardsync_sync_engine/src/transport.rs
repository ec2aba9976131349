//! Transport abstraction for sync requests.

use crate::error::{SyncError, SyncResult};
use cardsync_sync_protocol::{
    ConflictResolutionRequest, Endpoint, FullSyncRequest, FullSyncResponse, FullSyncStats,
    PullRequest, PullResponse, PushRequest, PushResponse, PushStats, ResolveConflictsResponse,
    ValidateRequest, ValidateResponse,
};
use parking_lot::Mutex;
use std::collections::HashMap;

/// The five sync endpoints as blocking calls.
///
/// Implementations must be thread-safe. Every call either returns the decoded
/// response or a [`SyncError`] classifying the failure.
pub trait SyncTransport: Send + Sync {
    /// Uploads pending changes.
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Downloads changes since the request watermark.
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Compares client checksums with the server's.
    fn validate_consistency(&self, request: &ValidateRequest) -> SyncResult<ValidateResponse>;

    /// Downloads the complete server state.
    fn full_sync(&self, request: &FullSyncRequest) -> SyncResult<FullSyncResponse>;

    /// Settles conflicts manually.
    fn resolve_conflicts(
        &self,
        requests: &[ConflictResolutionRequest],
    ) -> SyncResult<ResolveConflictsResponse>;
}

/// Scriptable transport for tests.
///
/// Every endpoint answers with a configurable response; the defaults
/// describe a server with nothing to report.
pub struct MockTransport {
    push_response: Mutex<PushResponse>,
    pull_response: Mutex<PullResponse>,
    validate_response: Mutex<ValidateResponse>,
    full_sync_response: Mutex<FullSyncResponse>,
    failures: Mutex<HashMap<Endpoint, u32>>,
    calls: Mutex<Vec<Endpoint>>,
    push_requests: Mutex<Vec<PushRequest>>,
    resolve_requests: Mutex<Vec<ConflictResolutionRequest>>,
}

impl MockTransport {
    /// Creates a mock transport with empty successful responses.
    pub fn new() -> Self {
        Self {
            push_response: Mutex::new(PushResponse {
                success: true,
                stats: PushStats::default(),
                conflicts: Vec::new(),
            }),
            pull_response: Mutex::new(PullResponse {
                success: true,
                changes: Vec::new(),
                server_time: None,
            }),
            validate_response: Mutex::new(ValidateResponse {
                overall_consistent: true,
                recommendation: None,
            }),
            full_sync_response: Mutex::new(FullSyncResponse {
                success: true,
                stats: FullSyncStats::default(),
                changes: Vec::new(),
                server_time: None,
            }),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            push_requests: Mutex::new(Vec::new()),
            resolve_requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the push response.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_response.lock() = response;
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_response.lock() = response;
    }

    /// Sets the validation response.
    pub fn set_validate_response(&self, response: ValidateResponse) {
        *self.validate_response.lock() = response;
    }

    /// Sets the full sync response.
    pub fn set_full_sync_response(&self, response: FullSyncResponse) {
        *self.full_sync_response.lock() = response;
    }

    /// Makes the next `times` calls to `endpoint` fail with a retryable
    /// network error.
    pub fn fail_next(&self, endpoint: Endpoint, times: u32) {
        self.failures.lock().insert(endpoint, times);
    }

    /// Returns the endpoints called so far, in order.
    pub fn calls(&self) -> Vec<Endpoint> {
        self.calls.lock().clone()
    }

    /// Returns every push request received.
    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.push_requests.lock().clone()
    }

    /// Returns every resolution received.
    pub fn resolve_requests(&self) -> Vec<ConflictResolutionRequest> {
        self.resolve_requests.lock().clone()
    }

    fn record(&self, endpoint: Endpoint) -> SyncResult<()> {
        self.calls.lock().push(endpoint);
        let mut failures = self.failures.lock();
        match failures.get_mut(&endpoint) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(SyncError::network_retryable(format!(
                    "injected failure on {}",
                    endpoint.path()
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.record(Endpoint::Push)?;
        self.push_requests.lock().push(request.clone());
        let mut response = self.push_response.lock().clone();
        if response.stats.pushed_changes == 0 {
            response.stats.pushed_changes = request.changes.len();
        }
        Ok(response)
    }

    fn pull(&self, _request: &PullRequest) -> SyncResult<PullResponse> {
        self.record(Endpoint::Pull)?;
        Ok(self.pull_response.lock().clone())
    }

    fn validate_consistency(&self, _request: &ValidateRequest) -> SyncResult<ValidateResponse> {
        self.record(Endpoint::ValidateConsistency)?;
        Ok(self.validate_response.lock().clone())
    }

    fn full_sync(&self, _request: &FullSyncRequest) -> SyncResult<FullSyncResponse> {
        self.record(Endpoint::FullSync)?;
        Ok(self.full_sync_response.lock().clone())
    }

    fn resolve_conflicts(
        &self,
        requests: &[ConflictResolutionRequest],
    ) -> SyncResult<ResolveConflictsResponse> {
        self.record(Endpoint::ResolveConflicts)?;
        self.resolve_requests.lock().extend_from_slice(requests);
        Ok(ResolveConflictsResponse {
            success: true,
            resolved: requests.iter().map(|r| r.conflict_id.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_request() -> PullRequest {
        PullRequest {
            last_sync_time: None,
            client_id: "c".into(),
            platform: "test".into(),
        }
    }

    #[test]
    fn default_responses_succeed() {
        let transport = MockTransport::new();
        let response = transport.pull(&pull_request()).unwrap();
        assert!(response.success);
        assert!(response.changes.is_empty());
        assert_eq!(transport.calls(), vec![Endpoint::Pull]);
    }

    #[test]
    fn injected_failures_run_out() {
        let transport = MockTransport::new();
        transport.fail_next(Endpoint::Pull, 2);

        assert!(transport.pull(&pull_request()).unwrap_err().is_retryable());
        assert!(transport.pull(&pull_request()).is_err());
        assert!(transport.pull(&pull_request()).is_ok());
    }

    #[test]
    fn push_acknowledges_every_change_by_default() {
        let transport = MockTransport::new();
        let request = PushRequest {
            last_sync_time: None,
            client_id: "c".into(),
            platform: "test".into(),
            changes: Vec::new(),
        };
        let response = transport.push(&request).unwrap();
        assert_eq!(response.stats.pushed_changes, 0);
        assert_eq!(transport.push_requests().len(), 1);
    }
}
