//! Authenticated JSON transport to the remote build service.
//!
//! Response classes:
//!
//! | status | meaning                      | handling                                   |
//! |--------|------------------------------|--------------------------------------------|
//! | 2xx    | success                      | body returned, retry counter reset         |
//! | 403    | environment still starting   | start call, wait, retry                    |
//! | 502    | environment warming up       | wait, retry                                |
//! | 400    | `{errors:[{title}]}`         | [`SyncError::User`]                        |
//! | other  | unexpected                   | [`SyncError::Status`] (fatal)              |

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{io_err, SyncError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const REPOSITORY_HEADER: &str = "X-Confetti-Repository";

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One remote call. Query values are encoded by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl RemoteRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sends requests to the remote and classifies the outcome.
pub trait Transport: Send + Sync {
    fn send(&self, request: &RemoteRequest) -> Result<String, SyncError>;
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

pub trait AuthProvider: Send + Sync {
    fn access_token(&self) -> Result<String, SyncError>;
}

/// A token known up front, e.g. from `CONFETTI_ACCESS_TOKEN`.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl AuthProvider for StaticToken {
    fn access_token(&self) -> Result<String, SyncError> {
        Ok(self.0.clone())
    }
}

/// Token persisted by the login flow as `{"access_token": "..."}`.
#[derive(Debug)]
pub struct TokenFile {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: String,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }
}

impl AuthProvider for TokenFile {
    fn access_token(&self) -> Result<String, SyncError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        let payload: TokenPayload = serde_json::from_str(&raw)?;
        if payload.access_token.is_empty() {
            return Err(SyncError::Auth(format!(
                "empty access token in {}",
                self.path.display()
            )));
        }
        *cached = Some(payload.access_token.clone());
        Ok(payload.access_token)
    }
}

// ---------------------------------------------------------------------------
// Retry state
// ---------------------------------------------------------------------------

/// Transient failures seen across every in-flight call since the last
/// success. Each call bounds its own retries; this is only a gauge.
#[derive(Debug, Default)]
pub struct RetryState {
    attempts: AtomicU32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transient failure and return the new attempt count.
    pub fn record_failure(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// 403: the development environment has not been started yet.
    Starting,
    /// 502: the environment is up but not serving yet.
    WarmingUp,
    User(String),
    Fatal,
}

#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    title: String,
}

pub fn classify(status: u16, body: &str) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        403 => ResponseClass::Starting,
        502 => ResponseClass::WarmingUp,
        400 => match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed
                .errors
                .into_iter()
                .next()
                .map(|e| ResponseClass::User(e.title))
                .unwrap_or(ResponseClass::Fatal),
            Err(_) => ResponseClass::Fatal,
        },
        _ => ResponseClass::Fatal,
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// Out-of-band request that boots the remote environment.
#[derive(Debug, Clone)]
pub struct StartEnvironment {
    pub url: String,
    pub body: Value,
}

pub struct HttpTransport {
    agent: ureq::Agent,
    auth: Arc<dyn AuthProvider>,
    repository: String,
    retry: Arc<RetryState>,
    policy: RetryPolicy,
    start: Option<StartEnvironment>,
}

impl HttpTransport {
    pub fn new(auth: Arc<dyn AuthProvider>, repository: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            auth,
            repository: repository.into(),
            retry: Arc::new(RetryState::new()),
            policy: RetryPolicy::default(),
            start: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_start_environment(mut self, start: StartEnvironment) -> Self {
        self.start = Some(start);
        self
    }

    /// One HTTP round trip: status code and body, or a transport failure.
    fn round_trip(&self, request: &RemoteRequest) -> Result<(u16, String), SyncError> {
        let token = self.auth.access_token()?;
        let mut req = self
            .agent
            .request(request.method.as_str(), &request.url)
            .timeout(request.timeout)
            .set("Accept", "application/json")
            .set("Authorization", &format!("Bearer {token}"))
            .set(REPOSITORY_HEADER, &self.repository);
        for (key, value) in &request.query {
            req = req.query(key, value);
        }
        tracing::trace!(method = request.method.as_str(), url = %request.url, "sending request");

        let result = match &request.body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(SyncError::Transport {
                    url: request.url.clone(),
                    message: err.to_string(),
                })
            }
        };
        let status = response.status();
        let body = response
            .into_string()
            .map_err(|e| io_err(PathBuf::from(&request.url), e))?;
        Ok((status, body))
    }

    fn start_environment(&self) {
        let Some(start) = &self.start else {
            return;
        };
        let request = RemoteRequest::new(Method::Post, &start.url).json(start.body.clone());
        match self.round_trip(&request) {
            Ok((status, _)) if (200..300).contains(&status) => {
                tracing::debug!("requested remote environment start");
            }
            Ok((status, body)) => {
                tracing::debug!(status, body = %body, "start environment request not accepted");
            }
            Err(err) => tracing::debug!(error = %err, "start environment request failed"),
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &RemoteRequest) -> Result<String, SyncError> {
        let mut attempts = 0;
        loop {
            let (status, body) = self.round_trip(request)?;
            match classify(status, &body) {
                ResponseClass::Success => {
                    self.retry.reset();
                    return Ok(body);
                }
                class @ (ResponseClass::Starting | ResponseClass::WarmingUp) => {
                    attempts += 1;
                    let pending = self.retry.record_failure();
                    if attempts > self.policy.max_attempts {
                        return Err(SyncError::RemoteNotReady {
                            attempts: attempts - 1,
                        });
                    }
                    if class == ResponseClass::Starting {
                        self.start_environment();
                    }
                    tracing::warn!(
                        attempt = attempts,
                        pending,
                        "remote environment is still starting, retrying in {:?}",
                        self.policy.interval,
                    );
                    std::thread::sleep(self.policy.interval);
                }
                ResponseClass::User(title) => return Err(SyncError::User { title }),
                ResponseClass::Fatal => {
                    return Err(SyncError::Status {
                        status,
                        method: request.method.as_str().to_string(),
                        url: request.url.clone(),
                        body,
                    })
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

type Responder = Box<dyn Fn(&RemoteRequest) -> Result<String, SyncError> + Send + Sync>;

/// Records every request instead of sending it.
///
/// Replies come from a scripted queue first, then from the responder
/// (default: empty body). Backs `--dry-run` and the test suites.
pub struct RecordingTransport {
    requests: Mutex<Vec<RemoteRequest>>,
    scripted: Mutex<VecDeque<Result<String, SyncError>>>,
    responder: Responder,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(String::new()))
    }

    pub fn with_responder(
        responder: impl Fn(&RemoteRequest) -> Result<String, SyncError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
        }
    }

    /// Queue a reply for the next request.
    pub fn push_reply(&self, reply: Result<String, SyncError>) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn requests_with(&self, method: Method) -> Vec<RemoteRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: &RemoteRequest) -> Result<String, SyncError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match scripted {
            Some(reply) => reply,
            None => (self.responder)(request),
        }
    }
}
