//! Upstream request and event types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// How the caller consumes the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Blocking,
    #[default]
    Streaming,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Blocking => "blocking",
            Mode::Streaming => "streaming",
        }
    }
}

/// Normalized representation of one upstream call.
///
/// Input fields keep insertion order. Blank values are never stored, so
/// absence of a field is the only "not provided" signal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpstreamRequest {
    query: String,
    inputs: Vec<(String, String)>,
    mode: Mode,
    conversation_id: String,
}

impl UpstreamRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Add a named input; `None`, empty and whitespace-only values are skipped.
    /// A repeated name replaces the earlier value in place.
    pub fn input<V: AsRef<str>>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        let Some(value) = value else { return self };
        let value = value.as_ref();
        if value.trim().is_empty() {
            return self;
        }
        let name = name.into();
        match self.inputs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.inputs.push((name, value.to_string())),
        }
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn inputs(&self) -> &[(String, String)] {
        &self.inputs
    }

    pub fn get_input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn request_mode(&self) -> Mode {
        self.mode
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Inputs as a JSON object.
    pub fn inputs_json(&self) -> Value {
        let map: Map<String, Value> = self
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

/// Discriminant of an upstream event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Incremental output, or any other non-terminal informational event.
    ContentDelta,
    /// Upstream finished successfully.
    Final,
    /// Keepalive.
    Ping,
    /// Upstream reported a failure; terminal.
    Error,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Final | EventKind::Error)
    }
}

/// One decoded upstream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEvent {
    pub kind: EventKind,
    /// Event name passed through to the downstream (`message`, `message_end`, ...).
    pub name: String,
    /// Raw frame data, forwarded untouched.
    pub raw: String,
    /// Text carried by the frame, if any.
    pub content: Option<String>,
    /// Human-readable error text for `Error` events.
    pub message: Option<String>,
}

impl UpstreamEvent {
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Errors raised by upstream transports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// DNS, TLS, refused connection, connect timeout.
    #[error("failed to connect to upstream: {0}")]
    Connect(String),

    /// The upstream rejected the credentials or signed URL.
    #[error("upstream rejected credentials: {0}")]
    Auth(String),

    /// Sending the request frame failed.
    #[error("failed to send request upstream: {0}")]
    Transmit(String),

    /// A single frame could not be decoded.
    #[error("malformed upstream frame: {0}")]
    Protocol(String),

    /// The transport broke while reading.
    #[error("upstream stream interrupted: {0}")]
    Stream(String),
}

impl UpstreamError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect(_) => "connect",
            UpstreamError::Auth(_) => "auth",
            UpstreamError::Transmit(_) => "transmit",
            UpstreamError::Protocol(_) => "protocol",
            UpstreamError::Stream(_) => "stream",
        }
    }
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;
