//! Transport-agnostic upstream handle.

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use serde_json::Value;

use crate::upstream::frame::{self, RawFrame};
use crate::upstream::types::{UpstreamError, UpstreamEvent, UpstreamRequest, UpstreamResult};

/// Byte-level connection to one upstream response.
///
/// Implementations only move frames; interpretation lives in [`frame`].
#[async_trait]
pub trait UpstreamTransport: Send {
    /// Send the serialized request payload.
    async fn send(&mut self, payload: String) -> UpstreamResult<()>;

    /// Next raw frame. `None` once the upstream has closed.
    async fn recv(&mut self) -> Option<UpstreamResult<RawFrame>>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Opens transports for one configured upstream.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Upstream name, used as dedup target and in logs/metrics.
    fn name(&self) -> &str;

    /// Build the wire payload for a request.
    fn payload(&self, request: &UpstreamRequest) -> Value;

    /// Establish a transport. Fails with `Connect` or `Auth`.
    async fn open(&self, request: &UpstreamRequest) -> UpstreamResult<UpstreamHandle>;
}

/// An open upstream call producing a finite sequence of events.
///
/// The sequence ends after the first terminal event or when the transport
/// closes. A handle is not restartable; open a new one instead.
pub struct UpstreamHandle {
    transport: Box<dyn UpstreamTransport>,
    finished: bool,
}

impl UpstreamHandle {
    pub fn new(transport: Box<dyn UpstreamTransport>) -> Self {
        Self {
            transport,
            finished: false,
        }
    }

    /// Transmit the request payload.
    pub async fn send(&mut self, payload: &Value) -> UpstreamResult<()> {
        let body = serde_json::to_string(payload)
            .map_err(|e| UpstreamError::Transmit(format!("failed to serialize payload: {e}")))?;
        self.transport.send(body).await
    }

    /// Next decoded event.
    ///
    /// A malformed frame yields `Some(Err(Protocol))` and the sequence
    /// continues. A broken transport yields one `Some(Err(Stream))` and then
    /// `None`.
    pub async fn next_event(&mut self) -> Option<UpstreamResult<UpstreamEvent>> {
        if self.finished {
            return None;
        }
        match self.transport.recv().await {
            None => {
                self.finished = true;
                None
            }
            Some(Err(e)) => {
                self.finished = !matches!(e, UpstreamError::Protocol(_));
                Some(Err(e))
            }
            Some(Ok(raw)) => {
                let decoded = frame::decode(&raw);
                if matches!(&decoded, Ok(event) if event.is_terminal()) {
                    self.finished = true;
                }
                Some(decoded)
            }
        }
    }

    /// Whether the sequence has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn close(&mut self) {
        self.finished = true;
        self.transport.close().await;
    }

    /// Consume the handle as a stream of events.
    pub fn into_events(self) -> impl Stream<Item = UpstreamResult<UpstreamEvent>> + Send {
        stream::unfold(self, |mut handle| async move {
            let item = handle.next_event().await?;
            Some((item, handle))
        })
    }
}

impl std::fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamHandle")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::scripted::{ScriptedTransport, Step};
    use crate::upstream::types::EventKind;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_sequence_ends_after_terminal_event() {
        let transport = ScriptedTransport::new(vec![
            Step::delta("a"),
            Step::finish(),
            Step::delta("ignored"),
        ]);
        let mut handle = UpstreamHandle::new(Box::new(transport));

        assert_eq!(handle.next_event().await.unwrap().unwrap().kind, EventKind::ContentDelta);
        assert_eq!(handle.next_event().await.unwrap().unwrap().kind, EventKind::Final);
        assert!(handle.is_finished());
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_end_sequence() {
        let transport = ScriptedTransport::new(vec![
            Step::Frame(RawFrame::sse("message", "{broken")),
            Step::delta("b"),
        ]);
        let events: Vec<_> = UpstreamHandle::new(Box::new(transport))
            .into_events()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Err(UpstreamError::Protocol(_))));
        assert_eq!(events[1].as_ref().unwrap().content.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_broken_transport_ends_sequence() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(UpstreamError::Stream("reset".into())),
            Step::delta("never"),
        ]);
        let mut handle = UpstreamHandle::new(Box::new(transport));
        assert!(matches!(handle.next_event().await, Some(Err(UpstreamError::Stream(_)))));
        assert!(handle.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_send_serializes_payload() {
        let transport = ScriptedTransport::new(vec![]);
        let sent = transport.sent();
        let mut handle = UpstreamHandle::new(Box::new(transport));
        handle.send(&serde_json::json!({"query": "hi"})).await.unwrap();
        assert_eq!(sent.lock().unwrap().as_slice(), [r#"{"query":"hi"}"#.to_string()]);
    }
}
