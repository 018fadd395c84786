//! Endpoint handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::config::RoutesConfig;
use crate::dedup::Dispatch;
use crate::gateway::{Gateway, GatewayStatus};
use crate::http::dto::{
    AnalyzeRequest, AnalyzeResponse, CallRecord, ChatResponse, ForwardQuery, ForwardResponse,
};
use crate::http::request::request_id;
use crate::relay::{DownstreamEvent, RelayError};
use crate::upstream::{Mode, UpstreamRequest};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub routes: Arc<RoutesConfig>,
}

/// `POST /api/agent/chat`: blocking, dedup-guarded agent call.
pub async fn agent_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<CallRecord>,
) -> Result<Json<ChatResponse>, RelayError> {
    let request = record.to_request(&state.routes.default_query, Mode::Blocking);
    tracing::debug!(
        request_id = %request_id(&headers),
        inputs = request.inputs().len(),
        "Agent chat request"
    );

    let response = match state
        .gateway
        .handle_blocking_deduplicated(&state.routes.agent_upstream, &request)
        .await?
    {
        Dispatch::Completed(result) => ChatResponse::completed(result),
        Dispatch::Suppressed => ChatResponse::suppressed(),
    };
    Ok(Json(response))
}

/// `POST /api/agent/stream`: agent call relayed as server-sent events.
pub async fn agent_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<CallRecord>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RelayError> {
    let request = record.to_request(&state.routes.default_query, Mode::Streaming);
    let events = state
        .gateway
        .handle_streaming(&state.routes.agent_upstream, &request)
        .await?;
    tracing::debug!(
        request_id = %request_id(&headers),
        session_id = %events.session_id(),
        "Agent stream opened"
    );

    Ok(Sse::new(events.map(|event| Ok(to_sse(event)))).keep_alive(KeepAlive::default()))
}

fn to_sse(event: DownstreamEvent) -> Event {
    let name: String = event.event.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    Event::default().event(name).data(event.data.replace('\r', ""))
}

/// `POST /api/analyze`: blocking analysis call against the analysis upstream.
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> (StatusCode, Json<AnalyzeResponse>) {
    let content = body.content_data.clone().unwrap_or_default();
    if content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AnalyzeResponse::failure("content_data must not be empty")),
        );
    }

    let timeout = Duration::from_secs(body.timeout_secs());
    let request = UpstreamRequest::new(content).mode(Mode::Blocking);
    match state
        .gateway
        .handle_blocking(&state.routes.analysis_upstream, &request, Some(timeout))
        .await
    {
        Ok(result) => (StatusCode::OK, Json(AnalyzeResponse::success(result.answer))),
        Err(e) => {
            tracing::warn!(error = %e, "Analysis failed");
            (e.status_code(), Json(AnalyzeResponse::failure(e.to_string())))
        }
    }
}

/// `POST /api/bot/forward?url=...`: dedup-guarded JSON forward.
pub async fn bot_forward(
    State(state): State<AppState>,
    Query(query): Query<ForwardQuery>,
    Json(payload): Json<Value>,
) -> Result<Json<ForwardResponse>, RelayError> {
    let response = match state.gateway.forward(&query.url, &payload).await? {
        Dispatch::Completed(outcome) => ForwardResponse {
            status: "forwarded".to_string(),
            target_status: Some(outcome.status),
            body: Some(outcome.body),
        },
        Dispatch::Suppressed => ForwardResponse {
            status: "suppressed".to_string(),
            target_status: None,
            body: None,
        },
    };
    Ok(Json(response))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(state.gateway.status())
}
