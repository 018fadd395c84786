//! WebSocket upstream carrying JSON envelopes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::{ChatParameters, UpstreamConfig};
use crate::upstream::auth::{self, UpstreamAuth};
use crate::upstream::client::{UpstreamConnector, UpstreamHandle, UpstreamTransport};
use crate::upstream::frame::RawFrame;
use crate::upstream::types::{UpstreamError, UpstreamRequest, UpstreamResult};

/// Connector for envelope-style chat endpoints.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    name: String,
    url: Url,
    app_id: String,
    chat: ChatParameters,
    auth: Arc<dyn UpstreamAuth>,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(
        name: impl Into<String>,
        url: Url,
        app_id: impl Into<String>,
        chat: ChatParameters,
        auth: Arc<dyn UpstreamAuth>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            url,
            app_id: app_id.into(),
            chat,
            auth,
            connect_timeout,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> UpstreamResult<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| UpstreamError::Connect(format!("invalid URL '{}': {e}", config.url)))?;
        Ok(Self::new(
            config.name.clone(),
            url,
            config.app_id.clone().unwrap_or_default(),
            config.chat.clone(),
            auth::from_api_key(config.api_key.as_deref())?,
            Duration::from_secs(config.connect_timeout_secs),
        ))
    }

    fn websocket_url(&self) -> UpstreamResult<Url> {
        let mut url = self.auth.connect_url(&self.url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme)
            .map_err(|_| UpstreamError::Connect(format!("cannot use scheme '{scheme}'")))?;
        Ok(url)
    }
}

#[async_trait]
impl UpstreamConnector for WebSocketConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload(&self, request: &UpstreamRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = self.chat.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(json!({"role": "system", "content": prompt}));
        }
        messages.push(json!({"role": "user", "content": request.query()}));

        json!({
            "header": {
                "app_id": self.app_id,
                "uid": request.conversation_id(),
            },
            "parameter": {
                "chat": {
                    "domain": self.chat.domain,
                    "temperature": self.chat.temperature,
                    "max_tokens": self.chat.max_tokens,
                    "top_k": self.chat.top_k,
                    "tools": [{
                        "type": "web_search",
                        "web_search": {"enable": self.chat.web_search, "search_mode": "normal"},
                    }],
                },
            },
            "payload": {
                "message": {"text": messages},
            },
        })
    }

    async fn open(&self, _request: &UpstreamRequest) -> UpstreamResult<UpstreamHandle> {
        let url = self.websocket_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;
        if let Some(value) = self.auth.authorization() {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| UpstreamError::Auth(format!("invalid credential: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                UpstreamError::Connect(format!(
                    "handshake timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(handshake_error)?;

        tracing::debug!(
            upstream = %self.name,
            status = %response.status(),
            "WebSocket handshake complete"
        );
        Ok(UpstreamHandle::new(Box::new(WebSocketTransport {
            stream,
            closed: false,
        })))
    }
}

fn handshake_error(e: WsError) -> UpstreamError {
    match e {
        WsError::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            UpstreamError::Auth(format!("handshake rejected with HTTP {}", response.status()))
        }
        WsError::Http(response) => {
            UpstreamError::Connect(format!("handshake failed with HTTP {}", response.status()))
        }
        other => UpstreamError::Connect(other.to_string()),
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl UpstreamTransport for WebSocketTransport {
    async fn send(&mut self, payload: String) -> UpstreamResult<()> {
        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| UpstreamError::Transmit(e.to_string()))
    }

    async fn recv(&mut self) -> Option<UpstreamResult<RawFrame>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(RawFrame::Text(text.as_str().to_string()))),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map(RawFrame::Text)
                            .map_err(|_| UpstreamError::Protocol("binary frame is not UTF-8".into())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Upstream closed WebSocket");
                    self.closed = true;
                    return None;
                }
                // Pings are answered by tungstenite.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    self.closed = true;
                    return None;
                }
                Err(e) => {
                    self.closed = true;
                    return Some(Err(UpstreamError::Stream(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::auth::NoAuth;

    fn connector(url: &str, system_prompt: Option<&str>) -> WebSocketConnector {
        let chat = ChatParameters {
            system_prompt: system_prompt.map(str::to_string),
            ..ChatParameters::default()
        };
        WebSocketConnector::new(
            "spark",
            Url::parse(url).unwrap(),
            "app-1",
            chat,
            Arc::new(NoAuth),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_envelope_payload() {
        let payload = connector("wss://example.com/v1/x1", Some("be brief"))
            .payload(&UpstreamRequest::new("hello"));

        assert_eq!(payload["header"]["app_id"], "app-1");
        assert_eq!(payload["parameter"]["chat"]["domain"], "x1");
        assert_eq!(payload["parameter"]["chat"]["max_tokens"], 32768);
        assert_eq!(payload["parameter"]["chat"]["tools"][0]["web_search"]["enable"], false);
        let text = payload["payload"]["message"]["text"].as_array().unwrap();
        assert_eq!(text.len(), 2);
        assert_eq!(text[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(text[1], json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_payload_without_system_prompt() {
        let payload = connector("wss://example.com/v1/x1", None).payload(&UpstreamRequest::new("q"));
        assert_eq!(payload["payload"]["message"]["text"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_http_schemes_are_upgraded() {
        let url = connector("https://example.com/v1/x1", None).websocket_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        let url = connector("http://127.0.0.1:9000/ws", None).websocket_url().unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let connector = connector("ws://127.0.0.1:1/ws", None);
        let result = connector.open(&UpstreamRequest::new("q")).await;
        assert!(matches!(result, Err(UpstreamError::Connect(_))), "{result:?}");
    }
}
