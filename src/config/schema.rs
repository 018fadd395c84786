//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Admission control (concurrent upstream calls).
    pub admission: AdmissionConfig,

    /// Duplicate suppression settings.
    pub dedup: DedupConfig,

    /// Streaming session timeouts and buffering.
    pub session: SessionConfig,

    /// Upstream service definitions.
    pub upstreams: Vec<UpstreamConfig>,

    /// Which upstream each HTTP endpoint talks to.
    pub routes: RoutesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl RelayConfig {
    /// Look up an upstream definition by name.
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrent upstream calls.
    pub capacity: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { capacity: 10 }
    }
}

/// Duplicate suppression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Cooldown window in seconds during which a repeat is suppressed.
    pub cooldown_secs: u64,

    /// Normalization rules applied before fingerprinting, in order.
    pub rules: Vec<NormalizationRuleConfig>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 180,
            rules: vec![
                NormalizationRuleConfig {
                    pattern: r"截止至 \d{2}:\d{2}:\d{2}".to_string(),
                    replacement: "截止至 XX:XX:XX".to_string(),
                },
                NormalizationRuleConfig {
                    pattern: r"as of \d{2}:\d{2}:\d{2}".to_string(),
                    replacement: "as of XX:XX:XX".to_string(),
                },
            ],
        }
    }
}

/// A single regex substitution rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NormalizationRuleConfig {
    /// Regular expression matching the volatile fragment.
    pub pattern: String,

    /// Placeholder text substituted for every match.
    pub replacement: String,
}

/// Streaming session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum silence from the upstream before the session times out.
    pub idle_timeout_secs: u64,

    /// Hard ceiling on a session's total lifetime.
    pub absolute_timeout_secs: u64,

    /// Downstream buffer (events) before backpressure applies.
    pub channel_capacity: usize,

    /// Default timeout for blocking calls.
    pub blocking_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            absolute_timeout_secs: 300,
            channel_capacity: 64,
            blocking_timeout_secs: 300,
        }
    }
}

/// Wire protocol spoken by an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    /// HTTP POST answered by a chunked `event:` / `data:` stream.
    Sse,
    /// WebSocket carrying JSON envelopes.
    Websocket,
}

/// Upstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Name used by callers and in logs/metrics.
    pub name: String,

    /// Transport kind.
    pub kind: UpstreamKind,

    /// Endpoint URL (`https://` for SSE, `wss://` for WebSocket).
    pub url: String,

    /// API key; `env:NAME` reads it from the environment.
    #[serde(default)]
    pub api_key: Option<String>,

    /// `user` value sent with SSE requests.
    #[serde(default = "default_user")]
    pub user: String,

    /// Connection establishment timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Application id placed in the WebSocket envelope header.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Chat parameters for WebSocket upstreams.
    #[serde(default)]
    pub chat: ChatParameters,
}

fn default_user() -> String {
    "admin".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

/// Model parameters sent in the WebSocket `parameter.chat` block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatParameters {
    pub domain: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_k: u32,
    /// System prompt prepended to every conversation.
    pub system_prompt: Option<String>,
    pub web_search: bool,
}

impl Default for ChatParameters {
    fn default() -> Self {
        Self {
            domain: "x1".to_string(),
            temperature: 0.5,
            max_tokens: 32768,
            top_k: 4,
            system_prompt: None,
            web_search: false,
        }
    }
}

/// HTTP endpoint to upstream mapping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// Upstream behind `/api/agent/*`.
    pub agent_upstream: String,

    /// Upstream behind `/api/analyze`.
    pub analysis_upstream: String,

    /// Query sent when a call record carries none.
    pub default_query: String,

    /// Timeout for forwarded bot payloads, in seconds.
    pub forward_timeout_secs: u64,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            agent_upstream: "agent".to_string(),
            analysis_upstream: "spark".to_string(),
            default_query: "请帮助处理这个请求".to_string(),
            forward_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
