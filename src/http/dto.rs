//! Request and response bodies for the HTTP endpoints.

use serde::{Deserialize, Serialize};

use crate::relay::AggregatedResult;
use crate::upstream::{Mode, UpstreamRequest};

/// Timeout for `/api/analyze` when the caller gives none.
pub const DEFAULT_ANALYZE_TIMEOUT_SECS: u64 = 300;

/// A call-center record submitted for agent processing.
///
/// Fields accept both the record's own camelCase names and the upstream
/// input names (`call_id`, `call_time`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub query: Option<String>,
    #[serde(alias = "conversation_id")]
    pub conversation_id: Option<String>,

    #[serde(alias = "call_id")]
    pub call_id: Option<String>,
    #[serde(alias = "call_time")]
    pub call_day_yd: Option<String>,
    #[serde(alias = "differ")]
    pub differentiation: Option<String>,
    #[serde(alias = "business")]
    pub business_all: Option<String>,
    #[serde(alias = "dl_label")]
    pub dl_label: Option<String>,
    #[serde(alias = "rg_label")]
    pub rg_label: Option<String>,
    #[serde(alias = "first_id")]
    pub first_solution: Option<String>,
    #[serde(alias = "call_number")]
    pub incoming_call: Option<String>,
    #[serde(alias = "refuse")]
    pub rejection: Option<String>,
    #[serde(alias = "rob_call")]
    pub dialogue_text: Option<String>,
    #[serde(alias = "hw_text")]
    pub content: Option<String>,
    #[serde(alias = "hw_label")]
    pub traffic_label: Option<String>,
    #[serde(alias = "user_no")]
    pub user_no: Option<String>,
    #[serde(alias = "user_query")]
    pub user_query: Option<String>,
}

impl CallRecord {
    /// Map to an upstream request. Blank fields are dropped.
    ///
    /// The query is the first non-blank of `query` and `userQuery`, else
    /// `default_query`.
    pub fn to_request(&self, default_query: &str, mode: Mode) -> UpstreamRequest {
        let query = [self.query.as_deref(), self.user_query.as_deref()]
            .into_iter()
            .flatten()
            .find(|q| !q.trim().is_empty())
            .unwrap_or(default_query);

        UpstreamRequest::new(query)
            .mode(mode)
            .conversation(self.conversation_id.clone().unwrap_or_default())
            .input("call_id", self.call_id.as_deref())
            .input("call_time", self.call_day_yd.as_deref())
            .input("differ", self.differentiation.as_deref())
            .input("business", self.business_all.as_deref())
            .input("dl_label", self.dl_label.as_deref())
            .input("rg_label", self.rg_label.as_deref())
            .input("first_id", self.first_solution.as_deref())
            .input("call_number", self.incoming_call.as_deref())
            .input("refuse", self.rejection.as_deref())
            .input("rob_call", self.dialogue_text.as_deref())
            .input("hw_text", self.content.as_deref())
            .input("hw_label", self.traffic_label.as_deref())
            .input("user_no", self.user_no.as_deref())
            .input("user_query", self.user_query.as_deref())
    }
}

/// `/api/agent/chat` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// `completed` or `suppressed`.
    pub status: String,
    pub answer: Option<String>,
    pub events: usize,
    pub elapsed_ms: u64,
}

impl ChatResponse {
    pub fn completed(result: AggregatedResult) -> Self {
        Self {
            status: "completed".to_string(),
            answer: Some(result.answer),
            events: result.events,
            elapsed_ms: result.elapsed.as_millis() as u64,
        }
    }

    pub fn suppressed() -> Self {
        Self {
            status: "suppressed".to_string(),
            answer: None,
            events: 0,
            elapsed_ms: 0,
        }
    }
}

/// `/api/analyze` request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(alias = "contentData")]
    pub content_data: Option<String>,
    #[serde(alias = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
}

impl AnalyzeRequest {
    /// Requested timeout; missing or zero means the default.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_seconds
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_ANALYZE_TIMEOUT_SECS)
    }
}

/// `/api/analyze` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub data: Option<String>,
    pub error_message: Option<String>,
}

impl AnalyzeResponse {
    pub fn success(data: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
        }
    }
}

/// `/api/bot/forward` query string.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardQuery {
    pub url: String,
}

/// `/api/bot/forward` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardResponse {
    /// `forwarded` or `suppressed`.
    pub status: String,
    pub target_status: Option<u16>,
    pub body: Option<String>,
}
