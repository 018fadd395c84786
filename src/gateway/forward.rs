//! Fire-one-POST forwarding of bot payloads.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::relay::{RelayError, RelayResult};

/// Result of a forwarded POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardOutcome {
    pub status: u16,
    pub body: String,
}

/// Posts JSON payloads to caller-supplied targets.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> RelayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// POST `payload` to `target` once. Non-2xx statuses are reported, not raised.
    pub async fn post(&self, target: &str, payload: &Value) -> RelayResult<ForwardOutcome> {
        let url = Url::parse(target)
            .map_err(|e| RelayError::InvalidRequest(format!("invalid target '{target}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidRequest(format!(
                "unsupported target scheme '{}'",
                url.scheme()
            )));
        }

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| RelayError::Forward(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        tracing::info!(target = %target, status, "Payload forwarded");
        Ok(ForwardOutcome { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rejects_bad_targets() {
        let forwarder = Forwarder::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            forwarder.post("not a url", &json!({})).await,
            Err(RelayError::InvalidRequest(_))
        ));
        assert!(matches!(
            forwarder.post("ftp://files.example.com/x", &json!({})).await,
            Err(RelayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_forward_error() {
        let forwarder = Forwarder::new(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            forwarder.post("http://127.0.0.1:1/hook", &json!({"a": 1})).await,
            Err(RelayError::Forward(_))
        ));
    }
}
