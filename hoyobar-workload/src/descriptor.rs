//! Request descriptors and their outcomes.
//!
//! A descriptor is an in-memory, immutable representation of one pending
//! request. Building descriptors never touches the network; dispatching them
//! never touches the random source.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Timestamp in microseconds since executor start.
pub type Timestamp = u64;

/// JSON object used for request payloads and expected values.
pub type Fields = Map<String, Value>;

/// Fields never rendered in diagnostics.
const REDACTED_FIELDS: [&str; 2] = ["password", "vcode"];

/// Longest value rendered in a descriptor summary.
const SUMMARY_VALUE_CHARS: usize = 32;

/// One phase of the workload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Register a new user.
    Register,
    /// Log an existing user in.
    Login,
    /// Create a post.
    CreatePost,
    /// Reply to a post.
    Reply,
    /// Fetch one page of a list endpoint.
    ListQuery,
}

impl Stage {
    /// Returns the stage name used in logs and reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::CreatePost => "create_post",
            Self::Reply => "reply",
            Self::ListQuery => "list_query",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// HTTP method of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Query parameters, no body.
    Get,
    /// JSON body.
    Post,
}

/// An endpoint of the forum API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `POST /user/register`.
    Register,
    /// `POST /user/login`.
    Login,
    /// `POST /post/create`.
    CreatePost,
    /// `POST /post/reply`.
    Reply,
    /// `GET /post/list`.
    PostList,
    /// `GET /post/reply/list`.
    ReplyList,
}

impl Endpoint {
    /// Returns the path relative to the API base URL.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Register => "/user/register",
            Self::Login => "/user/login",
            Self::CreatePost => "/post/create",
            Self::Reply => "/post/reply",
            Self::PostList => "/post/list",
            Self::ReplyList => "/post/reply/list",
        }
    }

    /// Returns the HTTP method.
    #[must_use]
    pub const fn method(self) -> Method {
        match self {
            Self::PostList | Self::ReplyList => Method::Get,
            Self::Register | Self::Login | Self::CreatePost | Self::Reply => Method::Post,
        }
    }

    /// Returns the pipeline stage this endpoint belongs to.
    #[must_use]
    pub const fn stage(self) -> Stage {
        match self {
            Self::Register => Stage::Register,
            Self::Login => Stage::Login,
            Self::CreatePost => Stage::CreatePost,
            Self::Reply => Stage::Reply,
            Self::PostList | Self::ReplyList => Stage::ListQuery,
        }
    }
}

/// A pending request, decoupled from the act of sending it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    slot: usize,
    stage: Stage,
    endpoint: Endpoint,
    payload: Fields,
    auth_token: Option<String>,
    expected: Option<Fields>,
}

impl RequestDescriptor {
    /// Creates a descriptor for `endpoint` occupying result slot `slot`.
    #[must_use]
    pub const fn new(slot: usize, endpoint: Endpoint, payload: Fields) -> Self {
        Self {
            slot,
            stage: endpoint.stage(),
            endpoint,
            payload,
            auth_token: None,
            expected: None,
        }
    }

    /// Attaches the token sent in the `Auth` header.
    #[must_use]
    pub fn with_auth(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Attaches values the response is later checked against.
    #[must_use]
    pub fn with_expected(mut self, expected: Fields) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Returns the result slot (position in the generated sequence).
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the pipeline stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Returns the request payload (JSON body or query parameters).
    #[must_use]
    pub const fn payload(&self) -> &Fields {
        &self.payload
    }

    /// Returns the auth token, if the call is authenticated.
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Returns the expected values, if any.
    #[must_use]
    pub const fn expected(&self) -> Option<&Fields> {
        self.expected.as_ref()
    }

    /// Returns a string payload field.
    #[must_use]
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Decodes a record from the payload overlaid with a response body.
    ///
    /// Create endpoints echo only the new ID, so the record is assembled from
    /// what was sent plus what came back. Response fields win on conflict.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged object does not decode as `T`.
    pub fn merge_response<T: DeserializeOwned>(&self, body: &Value) -> Result<T, serde_json::Error> {
        let mut merged = self.payload.clone();
        if let Value::Object(fields) = body {
            merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        serde_json::from_value(Value::Object(merged))
    }

    /// Renders a short diagnostic summary. Secrets are never included.
    #[must_use]
    pub fn summary(&self) -> String {
        let fields: Vec<String> = self
            .payload
            .iter()
            .filter(|(k, _)| !REDACTED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| format!("{k}={}", truncate_value(v)))
            .collect();
        format!("{}#{} {{{}}}", self.stage, self.slot, fields.join(", "))
    }
}

fn truncate_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= SUMMARY_VALUE_CHARS {
        text
    } else {
        let head: String = text.chars().take(SUMMARY_VALUE_CHARS).collect();
        format!("{head}...")
    }
}

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connection refused, reset, or other network-level error.
    Transport,
    /// The per-request timeout expired.
    Timeout,
    /// Non-success status or error code in the body.
    Application,
    /// The response could not be decoded.
    Malformed,
}

impl FailureKind {
    /// Returns the kind name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Application => "application",
            Self::Malformed => "malformed",
        }
    }
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)
    }
}

/// Result of dispatching one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The server accepted the request; holds the decoded JSON body.
    Success(Value),
    /// The request failed.
    Failure(Failure),
}

impl Outcome {
    /// Returns true if this outcome is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the response body for a success.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        match self {
            Self::Success(body) => Some(body),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            Self::Success(_) => None,
        }
    }
}

/// An outcome tagged with its result slot and latency.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Slot of the descriptor that produced this outcome.
    pub slot: usize,
    /// Stage of the descriptor.
    pub stage: Stage,
    /// What happened.
    pub outcome: Outcome,
    /// Wall-clock latency in microseconds.
    pub latency_us: u64,
}
