//! Request execution infrastructure.
//!
//! Provides the abstraction layer between request descriptors and the server
//! that answers them. The same workload can run against a real forum server
//! over HTTP or against an in-memory simulation.

use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::descriptor::{FailureKind, Method, RequestDescriptor, Timestamp};

/// Header carrying the auth token on authenticated calls.
pub const AUTH_HEADER: &str = "Auth";

/// Error code the server reports on success.
pub const ECODE_OK: &str = "0";

/// Error code the server reports when a list has no more entries.
pub const ECODE_NO_MORE_ENTRIES: &str = "3004";

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Longest response excerpt kept in an error message.
const ERROR_EXCERPT_CHARS: usize = 200;

/// Errors that can occur while executing a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// Connection refused, reset, DNS failure and the like.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected the request.
    #[error("application error (status {status}, ecode {ecode}): {emsg}")]
    Application {
        /// HTTP status code.
        status: u16,
        /// Error code from the body, empty if absent.
        ecode: String,
        /// Error message from the body.
        emsg: String,
    },

    /// A 200 response whose body is not valid JSON.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Invalid executor configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ExecutorError {
    /// Returns the failure classification reported in stage results.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Transport(_) | Self::InvalidConfig(_) => FailureKind::Transport,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Application { .. } => FailureKind::Application,
            Self::Malformed(_) => FailureKind::Malformed,
        }
    }

    /// Returns true if the server reported that a list has no more entries.
    #[must_use]
    pub fn is_no_more_entries(&self) -> bool {
        matches!(self, Self::Application { ecode, .. } if ecode == ECODE_NO_MORE_ENTRIES)
    }

    /// Builds an application error carrying a server error code.
    #[must_use]
    pub fn application(status: u16, ecode: impl Into<String>, emsg: impl Into<String>) -> Self {
        Self::Application {
            status,
            ecode: ecode.into(),
            emsg: emsg.into(),
        }
    }
}

/// Trait for executing request descriptors.
///
/// This abstraction allows the same workload to run against:
/// - A real forum server over HTTP
/// - A simulated server with fault injection
#[allow(async_fn_in_trait)]
pub trait ApiExecutor {
    /// Returns the current timestamp in microseconds.
    fn now(&self) -> Timestamp;

    /// Sends one request and returns the decoded success body.
    ///
    /// Implementations must not retry: every call issues at most one request.
    async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError>;
}

/// Reads the `ecode` field, accepting both string and numeric codes.
fn ecode_of(body: &Value) -> Option<String> {
    match body.get("ecode")? {
        Value::String(code) => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

fn excerpt(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(ERROR_EXCERPT_CHARS)
        .collect()
}

/// Classifies a raw HTTP response.
///
/// Success requires status 200 and, when an `ecode` is present, `ecode == "0"`.
///
/// # Errors
///
/// Returns `Application` for any other status or error code, and `Malformed`
/// for a 200 response whose body is not JSON.
pub fn classify_response(status: u16, body: &[u8]) -> Result<Value, ExecutorError> {
    let decoded = serde_json::from_slice::<Value>(body);

    if status != 200 {
        let (ecode, emsg) = match &decoded {
            Ok(value) => (
                ecode_of(value).unwrap_or_default(),
                value
                    .get("emsg")
                    .and_then(Value::as_str)
                    .map_or_else(|| excerpt(body), str::to_string),
            ),
            Err(_) => (String::new(), excerpt(body)),
        };
        return Err(ExecutorError::Application { status, ecode, emsg });
    }

    let value = decoded.map_err(|e| ExecutorError::Malformed(format!("{e}: {}", excerpt(body))))?;
    match ecode_of(&value) {
        Some(ecode) if ecode != ECODE_OK => {
            let emsg = value
                .get("emsg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Err(ExecutorError::Application { status, ecode, emsg })
        }
        _ => Ok(value),
    }
}

/// Configuration for the HTTP executor.
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 512,
        }
    }
}

/// Builder for `HttpExecutor`.
#[derive(Debug, Default)]
pub struct HttpExecutorBuilder {
    config: HttpExecutorConfig,
}

impl HttpExecutorBuilder {
    /// Creates a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the idle pool size per host.
    #[must_use]
    pub const fn pool_max_idle_per_host(mut self, size: usize) -> Self {
        self.config.pool_max_idle_per_host = size;
        self
    }

    /// Builds the executor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base URL is not an `http(s)` URL or the
    /// HTTP client cannot be created.
    pub fn build(self) -> Result<HttpExecutor, ExecutorError> {
        HttpExecutor::new(self.config)
    }
}

/// Executor that sends requests to a forum server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    /// Start time for timestamp generation.
    start_time: Instant,
}

impl HttpExecutor {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> HttpExecutorBuilder {
        HttpExecutorBuilder::new()
    }

    /// Creates an executor with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the base URL is not an `http(s)` URL or the
    /// HTTP client cannot be created.
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutorError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ExecutorError::InvalidConfig(format!(
                "base url must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| ExecutorError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: config.request_timeout,
            start_time: Instant::now(),
        })
    }

    /// Returns the API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(&self, err: &reqwest::Error) -> ExecutorError {
        if err.is_timeout() {
            ExecutorError::Timeout(self.request_timeout)
        } else {
            ExecutorError::Transport(err.to_string())
        }
    }

    /// Waits until the server accepts connections.
    ///
    /// Any HTTP response counts as ready, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the server does not answer within `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ExecutorError> {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if self.client.get(&self.base_url).send().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        Err(ExecutorError::Timeout(timeout))
    }
}

impl ApiExecutor for HttpExecutor {
    #[allow(clippy::cast_possible_truncation)] // Won't overflow for reasonable run durations.
    fn now(&self) -> Timestamp {
        self.start_time.elapsed().as_micros() as u64
    }

    async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Value, ExecutorError> {
        let endpoint = descriptor.endpoint();
        let url = format!("{}{}", self.base_url, endpoint.path());

        let mut request = match endpoint.method() {
            Method::Get => {
                let query: Vec<(&str, String)> = descriptor
                    .payload()
                    .iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key.as_str(), value)
                    })
                    .collect();
                self.client.get(&url).query(&query)
            }
            Method::Post => self.client.post(&url).json(descriptor.payload()),
        };
        if let Some(token) = descriptor.auth_token() {
            request = request.header(AUTH_HEADER, token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.transport_error(&e))?;

        classify_response(status, &body)
    }
}
