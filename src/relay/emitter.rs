//! Downstream events and the consumer-side stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::relay::session::SessionState;
use crate::upstream::{EventKind, UpstreamEvent};

/// One event pushed to the downstream consumer.
///
/// Serializes as `{event, data}`; the remaining fields are local metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownstreamEvent {
    pub event: String,
    pub data: String,
    #[serde(skip)]
    pub kind: EventKind,
    #[serde(skip)]
    pub content: Option<String>,
    #[serde(skip)]
    pub message: Option<String>,
    /// Set on the last event of a session: the state the session ended in.
    #[serde(skip)]
    pub closing: Option<SessionState>,
}

impl DownstreamEvent {
    /// Pass an upstream event through unchanged.
    pub fn from_upstream(event: &UpstreamEvent) -> Self {
        Self {
            event: event.name.clone(),
            data: event.raw.clone(),
            kind: event.kind,
            content: event.content.clone(),
            message: event.message.clone(),
            closing: None,
        }
    }

    /// Synthesized `error` event.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            event: "error".to_string(),
            data: json!({"event": "error", "message": message}).to_string(),
            kind: EventKind::Error,
            content: None,
            message: Some(message),
            closing: None,
        }
    }

    pub fn closing(mut self, state: SessionState) -> Self {
        self.closing = Some(state);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.closing.is_some()
    }
}

/// Receiving end of a streaming session.
///
/// Dropping it cancels the session.
#[derive(Debug)]
pub struct EventStream {
    session_id: Uuid,
    rx: mpsc::Receiver<DownstreamEvent>,
}

impl EventStream {
    pub(crate) fn new(session_id: Uuid, rx: mpsc::Receiver<DownstreamEvent>) -> Self {
        Self { session_id, rx }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next event, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<DownstreamEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = DownstreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
