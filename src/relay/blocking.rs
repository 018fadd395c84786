//! Blocking adapter: run a streaming session and return the concatenated answer.

use std::time::Duration;

use tokio::time::Instant;

use crate::relay::error::{RelayError, RelayResult};
use crate::relay::session::SessionState;
use crate::relay::streaming::StreamingRelay;
use crate::upstream::{EventKind, UpstreamConnector, UpstreamRequest};

/// Aggregated outcome of a blocking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedResult {
    /// Concatenated content of every delta, plus any content on the final frame.
    pub answer: String,
    /// Events received, terminal included.
    pub events: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct BlockingAdapter {
    relay: StreamingRelay,
}

impl BlockingAdapter {
    pub fn new(relay: StreamingRelay) -> Self {
        Self { relay }
    }

    /// Run one call to completion within `timeout`.
    ///
    /// The timeout covers waiting for admission too. On expiry the event
    /// stream is dropped, which cancels the session and frees its permit.
    pub async fn call_and_collect(
        &self,
        connector: &dyn UpstreamConnector,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> RelayResult<AggregatedResult> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.collect(connector, request, started)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    upstream = %connector.name(),
                    timeout_secs = timeout.as_secs(),
                    "Blocking call timed out"
                );
                Err(RelayError::Timeout(format!(
                    "no terminal event within {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn collect(
        &self,
        connector: &dyn UpstreamConnector,
        request: &UpstreamRequest,
        started: Instant,
    ) -> RelayResult<AggregatedResult> {
        let mut stream = self.relay.start(connector, request).await?;
        let mut answer = String::new();
        let mut events = 0;

        while let Some(event) = stream.recv().await {
            events += 1;
            match event.closing {
                Some(SessionState::TimedOut) => {
                    return Err(RelayError::Timeout(event.message.unwrap_or_default()));
                }
                Some(SessionState::Errored) => {
                    return Err(RelayError::Upstream(
                        event.message.unwrap_or_else(|| "upstream error".to_string()),
                    ));
                }
                _ => {}
            }
            if matches!(event.kind, EventKind::ContentDelta | EventKind::Final) {
                if let Some(content) = &event.content {
                    answer.push_str(content);
                }
            }
            if event.is_terminal() {
                break;
            }
        }

        tracing::debug!(
            session_id = %stream.session_id(),
            events,
            answer_len = answer.len(),
            "Blocking call collected"
        );
        Ok(AggregatedResult {
            answer,
            events,
            elapsed: started.elapsed(),
        })
    }
}
