//! HTTP POST upstream answered by a server-sent event stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use url::Url;

use crate::config::UpstreamConfig;
use crate::upstream::auth::{self, UpstreamAuth};
use crate::upstream::client::{UpstreamConnector, UpstreamHandle, UpstreamTransport};
use crate::upstream::frame::RawFrame;
use crate::upstream::types::{UpstreamError, UpstreamRequest, UpstreamResult};

type FrameStream = Pin<Box<dyn Stream<Item = UpstreamResult<RawFrame>> + Send>>;

/// Longest error body quoted back in a `Transmit` error.
const MAX_ERROR_BODY: usize = 512;

/// Connector for agent-style SSE endpoints.
#[derive(Debug, Clone)]
pub struct SseConnector {
    name: String,
    url: Url,
    user: String,
    auth: Arc<dyn UpstreamAuth>,
    client: reqwest::Client,
}

impl SseConnector {
    pub fn new(
        name: impl Into<String>,
        url: Url,
        user: impl Into<String>,
        auth: Arc<dyn UpstreamAuth>,
        connect_timeout: Duration,
    ) -> UpstreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url,
            user: user.into(),
            auth,
            client,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> UpstreamResult<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| UpstreamError::Connect(format!("invalid URL '{}': {e}", config.url)))?;
        Self::new(
            config.name.clone(),
            url,
            config.user.clone(),
            auth::from_api_key(config.api_key.as_deref())?,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }
}

#[async_trait]
impl UpstreamConnector for SseConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload(&self, request: &UpstreamRequest) -> Value {
        json!({
            "query": request.query(),
            "mode": request.request_mode().as_str(),
            "conversation_id": request.conversation_id(),
            "user": self.user,
            "inputs": request.inputs_json(),
        })
    }

    /// HTTP has no separate handshake; the connection is made when the
    /// payload is sent, and connect failures surface from `send`.
    async fn open(&self, _request: &UpstreamRequest) -> UpstreamResult<UpstreamHandle> {
        let url = self.auth.connect_url(&self.url)?;
        let transport = SseTransport {
            client: self.client.clone(),
            url,
            authorization: self.auth.authorization(),
            frames: None,
        };
        Ok(UpstreamHandle::new(Box::new(transport)))
    }
}

struct SseTransport {
    client: reqwest::Client,
    url: Url,
    authorization: Option<String>,
    frames: Option<FrameStream>,
}

#[async_trait]
impl UpstreamTransport for SseTransport {
    async fn send(&mut self, payload: String) -> UpstreamResult<()> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .body(payload);
        if let Some(value) = &self.authorization {
            request = request.header(AUTHORIZATION, value);
        }

        let response = request.send().await.map_err(send_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpstreamError::Auth(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(UpstreamError::Transmit(format!("HTTP {status}: {body}")));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        let frames: FrameStream = if is_event_stream {
            let text = response.bytes_stream().scan(Vec::new(), |pending, chunk| {
                future::ready(Some(chunk.map(|bytes| decode_utf8_lossy(pending, &bytes))))
            });
            Box::pin(text.eventsource().scan(false, |broken, item| {
                if *broken {
                    return future::ready(None);
                }
                let frame = match item {
                    Ok(event) => Ok(RawFrame::Sse {
                        event: event.event,
                        data: event.data,
                    }),
                    Err(EventStreamError::Utf8(e)) => {
                        Err(UpstreamError::Protocol(format!("invalid UTF-8 in event stream: {e}")))
                    }
                    // The parser cannot resynchronise past a line it rejected.
                    Err(EventStreamError::Parser(e)) => {
                        *broken = true;
                        Err(UpstreamError::Protocol(format!("malformed event stream: {e}")))
                    }
                    Err(EventStreamError::Transport(e)) => Err(UpstreamError::Stream(e.to_string())),
                };
                future::ready(Some(frame))
            }))
        } else {
            // Blocking-mode upstreams answer with one JSON document.
            Box::pin(stream::once(async move {
                response
                    .text()
                    .await
                    .map(RawFrame::Text)
                    .map_err(|e| UpstreamError::Stream(e.to_string()))
            }))
        };
        self.frames = Some(frames);
        tracing::debug!(url = %self.url, %status, is_event_stream, "Upstream response started");
        Ok(())
    }

    async fn recv(&mut self) -> Option<UpstreamResult<RawFrame>> {
        self.frames.as_mut()?.next().await
    }

    async fn close(&mut self) {
        self.frames = None;
    }
}

/// Decode `chunk` after any bytes held back from the previous one.
///
/// Invalid sequences become U+FFFD so one bad line cannot stall the event
/// parser. A sequence cut off at the end of the chunk is kept in `pending`.
fn decode_utf8_lossy(pending: &mut Vec<u8>, chunk: &[u8]) -> String {
    pending.extend_from_slice(chunk);
    let mut text = String::with_capacity(pending.len());
    let mut start = 0;
    while start < pending.len() {
        match std::str::from_utf8(&pending[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = pending.len();
            }
            Err(e) => {
                let end = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[start..end]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = end + len;
                    }
                    None => {
                        start = end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    text
}

fn send_error(e: reqwest::Error) -> UpstreamError {
    if e.is_connect() || e.is_timeout() {
        UpstreamError::Connect(e.to_string())
    } else {
        UpstreamError::Transmit(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::auth::NoAuth;

    fn connector() -> SseConnector {
        SseConnector::new(
            "agent",
            Url::parse("http://127.0.0.1:1/v1/chat-messages").unwrap(),
            "admin",
            Arc::new(NoAuth),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let request = UpstreamRequest::new("A")
            .input("call_id", Some("1"))
            .input("differ", Some(" "))
            .conversation("c-9");
        let payload = connector().payload(&request);
        assert_eq!(
            payload,
            json!({
                "query": "A",
                "mode": "streaming",
                "conversation_id": "c-9",
                "user": "admin",
                "inputs": {"call_id": "1"},
            })
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let connector = connector();
        let request = UpstreamRequest::new("A");
        let mut handle = connector.open(&request).await.unwrap();
        let result = handle.send(&connector.payload(&request)).await;
        assert!(matches!(result, Err(UpstreamError::Connect(_))), "{result:?}");
    }

    #[test]
    fn test_lossy_decode_replaces_bad_bytes_and_keeps_split_chars() {
        let mut pending = Vec::new();
        assert_eq!(decode_utf8_lossy(&mut pending, b"data: \xff\xfe\n"), "data: \u{FFFD}\u{FFFD}\n");
        assert!(pending.is_empty());

        // "é" is 0xC3 0xA9, split across two chunks.
        assert_eq!(decode_utf8_lossy(&mut pending, b"caf\xc3"), "caf");
        assert_eq!(pending, vec![0xc3]);
        assert_eq!(decode_utf8_lossy(&mut pending, b"\xa9!"), "é!");
        assert!(pending.is_empty());
    }
}
