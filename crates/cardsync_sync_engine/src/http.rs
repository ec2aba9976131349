//! HTTP transport implementation.
//!
//! Requests and responses are JSON bodies sent by POST to
//! `{server_url}{endpoint path}`. The HTTP client itself is abstracted by
//! [`HttpClient`] so tests can route requests straight into a server.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use cardsync_sync_protocol::{
    decode, encode, ConflictResolutionRequest, Endpoint, FullSyncRequest, FullSyncResponse,
    PullRequest, PullResponse, PushRequest, PushResponse, ResolveConflictsResponse,
    ValidateRequest, ValidateResponse,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpFailure {
    /// No response within the timeout.
    #[error("request timed out")]
    Timeout,
    /// The request could not be sent or the response not read.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server answered with a non-success status.
    #[error("server returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl From<HttpFailure> for SyncError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Timeout => SyncError::Timeout,
            HttpFailure::Connect(message) => SyncError::network_retryable(message),
            HttpFailure::Status { status, .. } if status >= 500 || status == 408 || status == 429 => {
                SyncError::network_retryable(failure.to_string())
            }
            HttpFailure::Status { .. } => SyncError::network_fatal(failure.to_string()),
        }
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpFailure>;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the message of the last failed request, cleared by a success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_json<Req, Res>(&self, endpoint: Endpoint, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = encode(request)?;
        let url = format!("{}{}", self.base_url, endpoint.path());
        debug!(%url, bytes = body.len(), "sending sync request");

        let response = self.client.post(&url, body).map_err(|failure| {
            warn!(%url, error = %failure, "sync request failed");
            *self.last_error.write() = Some(failure.to_string());
            SyncError::from(failure)
        })?;
        *self.last_error.write() = None;

        Ok(decode(&response)?)
    }
}

impl HttpTransport<ReqwestClient> {
    /// Creates a transport for `config.server_url` backed by reqwest.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        Ok(Self::new(
            config.server_url.clone(),
            ReqwestClient::new(config.timeout)?,
        ))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post_json(Endpoint::Push, request)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_json(Endpoint::Pull, request)
    }

    fn validate_consistency(&self, request: &ValidateRequest) -> SyncResult<ValidateResponse> {
        self.post_json(Endpoint::ValidateConsistency, request)
    }

    fn full_sync(&self, request: &FullSyncRequest) -> SyncResult<FullSyncResponse> {
        self.post_json(Endpoint::FullSync, request)
    }

    fn resolve_conflicts(
        &self,
        requests: &[ConflictResolutionRequest],
    ) -> SyncResult<ResolveConflictsResponse> {
        self.post_json(Endpoint::ResolveConflicts, &requests)
    }
}

/// Blocking reqwest client with a per-request timeout.
///
/// Must not be created or dropped on an async runtime thread; the sync
/// driver runs cycles on the blocking pool for that reason.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::network_fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpFailure> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .map_err(reqwest_failure)?;

        let status = response.status();
        let bytes = response.bytes().map_err(reqwest_failure)?;
        if !status.is_success() {
            return Err(HttpFailure::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes.to_vec())
    }
}

fn reqwest_failure(err: reqwest::Error) -> HttpFailure {
    if err.is_timeout() {
        HttpFailure::Timeout
    } else {
        HttpFailure::Connect(err.to_string())
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

/// Servers that can answer loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpFailure>;
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpFailure> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardsync_sync_protocol::PushStats;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<Result<Vec<u8>, HttpFailure>>>,
        urls: Mutex<Vec<String>>,
    }

    impl TestClient {
        fn respond(&self, response: Result<Vec<u8>, HttpFailure>) {
            *self.response.lock() = Some(response);
        }
    }

    impl HttpClient for TestClient {
        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, HttpFailure> {
            self.urls.lock().push(url.to_string());
            self.response
                .lock()
                .clone()
                .unwrap_or_else(|| Err(HttpFailure::Connect("no response set".into())))
        }
    }

    fn pull_request() -> PullRequest {
        PullRequest {
            last_sync_time: None,
            client_id: "c".into(),
            platform: "test".into(),
        }
    }

    #[test]
    fn base_url_trailing_slash() {
        let transport = HttpTransport::new("https://sync.example.com/", TestClient::default());
        assert_eq!(transport.base_url(), "https://sync.example.com");
    }

    #[test]
    fn requests_go_to_endpoint_paths() {
        let client = TestClient::default();
        client.respond(Ok(br#"{"success": true, "changes": []}"#.to_vec()));
        let transport = HttpTransport::new("https://sync.example.com", client);

        let response = transport.pull(&pull_request()).unwrap();
        assert!(response.success);
        assert_eq!(
            transport.client.urls.lock().as_slice(),
            ["https://sync.example.com/sync/pull"]
        );
    }

    #[test]
    fn failures_are_classified() {
        let client = TestClient::default();
        client.respond(Err(HttpFailure::Timeout));
        let transport = HttpTransport::new("https://sync.example.com", client);
        assert!(matches!(transport.pull(&pull_request()), Err(SyncError::Timeout)));
        assert_eq!(transport.last_error().as_deref(), Some("request timed out"));

        transport.client.respond(Err(HttpFailure::Status {
            status: 503,
            body: String::new(),
        }));
        assert!(transport.pull(&pull_request()).unwrap_err().is_retryable());

        transport.client.respond(Err(HttpFailure::Status {
            status: 400,
            body: "bad request".into(),
        }));
        assert!(!transport.pull(&pull_request()).unwrap_err().is_retryable());
    }

    #[test]
    fn undecodable_body_is_protocol_error() {
        let client = TestClient::default();
        client.respond(Ok(b"<html>".to_vec()));
        let transport = HttpTransport::new("https://sync.example.com", client);
        assert!(matches!(
            transport.pull(&pull_request()),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn success_clears_last_error() {
        let client = TestClient::default();
        client.respond(Err(HttpFailure::Connect("refused".into())));
        let transport = HttpTransport::new("https://sync.example.com", client);
        assert!(transport.pull(&pull_request()).is_err());
        assert!(transport.last_error().is_some());

        let body = serde_json::to_vec(&PushResponse {
            success: true,
            stats: PushStats { pushed_changes: 0 },
            conflicts: vec![],
        })
        .unwrap();
        transport.client.respond(Ok(body));
        let request = PushRequest {
            last_sync_time: None,
            client_id: "c".into(),
            platform: "test".into(),
            changes: vec![],
        };
        assert!(transport.push(&request).is_ok());
        assert_eq!(transport.last_error(), None);
    }

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle_post(&self, path: &str, _body: &[u8]) -> Result<Vec<u8>, HttpFailure> {
            Ok(path.as_bytes().to_vec())
        }
    }

    #[test]
    fn loopback_strips_host() {
        let client = LoopbackClient::new(EchoServer);
        let body = client
            .post("https://sync.example.com/api/sync/push", Vec::new())
            .unwrap();
        assert_eq!(body, b"/sync/push");
    }
}
