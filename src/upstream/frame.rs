//! Upstream frame decoding.
//!
//! Three framing variants can end a response:
//! - a named SSE event (`message_end`, `workflow_finished`, `error`)
//! - a JSON envelope whose `header.status == 2` (or `header.code != 0` for errors)
//! - the sentinel line `[DONE]`
//!
//! Everything else decodes into a non-terminal event or a protocol error that
//! the relay logs and skips.

use serde_json::Value;

use crate::upstream::types::{EventKind, UpstreamError, UpstreamEvent, UpstreamResult};

const DONE_SENTINEL: &str = "[DONE]";

/// Envelope status marking the last frame of a WebSocket response.
const STATUS_FINAL: i64 = 2;

/// A frame as read off the wire, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// One `event:` / `data:` record. `event` is empty or `message` when unnamed.
    Sse { event: String, data: String },
    /// A WebSocket text frame or a whole non-streamed JSON body.
    Text(String),
}

impl RawFrame {
    pub fn sse(event: impl Into<String>, data: impl Into<String>) -> Self {
        RawFrame::Sse {
            event: event.into(),
            data: data.into(),
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        RawFrame::Text(data.into())
    }
}

/// Interpret one raw frame.
pub fn decode(frame: &RawFrame) -> UpstreamResult<UpstreamEvent> {
    match frame {
        RawFrame::Sse { event, data } => decode_sse(event, data),
        RawFrame::Text(text) => decode_text(text),
    }
}

fn decode_sse(event: &str, data: &str) -> UpstreamResult<UpstreamEvent> {
    let trimmed = data.trim();
    if trimmed == DONE_SENTINEL {
        return Ok(done_event());
    }

    let named = !event.is_empty() && event != "message";
    if trimmed.is_empty() {
        return match event {
            "ping" => Ok(simple(EventKind::Ping, "ping", data)),
            "error" => Ok(error_event("error", data, "upstream reported an error".to_string())),
            _ => Err(UpstreamError::Protocol(format!("empty data for event '{event}'"))),
        };
    }

    let json: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        // A named error with a plain-text body is still an error.
        Err(_) if event == "error" => {
            return Ok(error_event("error", data, trimmed.to_string()));
        }
        Err(e) => return Err(UpstreamError::Protocol(format!("invalid JSON in '{event}' event: {e}"))),
    };

    let name = if named {
        event.to_string()
    } else {
        json.get("event")
            .and_then(Value::as_str)
            .unwrap_or("message")
            .to_string()
    };
    Ok(classify(&name, &json, data))
}

fn decode_text(text: &str) -> UpstreamResult<UpstreamEvent> {
    let trimmed = text.trim();
    if trimmed == DONE_SENTINEL {
        return Ok(done_event());
    }

    let json: Value = serde_json::from_str(trimmed)
        .map_err(|e| UpstreamError::Protocol(format!("invalid JSON frame: {e}")))?;

    if let Some(header) = json.get("header").and_then(Value::as_object) {
        let code = header.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let sid = header.get("sid").and_then(Value::as_str).unwrap_or("unknown");
            let detail = header
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream error");
            let message = format!("{detail} (code {code}, sid {sid})");
            return Ok(error_event("error", text, message));
        }

        let status = header.get("status").and_then(Value::as_i64).unwrap_or(0);
        let content = extract_content(&json);
        let (kind, name) = if status == STATUS_FINAL {
            (EventKind::Final, "final")
        } else {
            (EventKind::ContentDelta, "message")
        };
        return Ok(UpstreamEvent {
            kind,
            name: name.to_string(),
            raw: text.to_string(),
            content,
            message: None,
        });
    }

    match json.get("event").and_then(Value::as_str) {
        Some(name) => Ok(classify(name, &json, text)),
        None => Err(UpstreamError::Protocol("frame has neither header nor event".to_string())),
    }
}

fn classify(name: &str, json: &Value, raw: &str) -> UpstreamEvent {
    match name {
        "message_end" | "workflow_finished" | "final" | "done" => UpstreamEvent {
            kind: EventKind::Final,
            name: name.to_string(),
            raw: raw.to_string(),
            content: extract_content(json),
            message: None,
        },
        "error" => {
            let message = json
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream reported an error")
                .to_string();
            error_event(name, raw, message)
        }
        "ping" => simple(EventKind::Ping, name, raw),
        _ => UpstreamEvent {
            kind: EventKind::ContentDelta,
            name: name.to_string(),
            raw: raw.to_string(),
            content: extract_content(json),
            message: None,
        },
    }
}

/// Pull the text payload out of the known envelope shapes.
fn extract_content(json: &Value) -> Option<String> {
    if let Some(answer) = json.get("answer").and_then(Value::as_str) {
        return Some(answer.to_string());
    }

    if let Some(texts) = json
        .pointer("/payload/choices/text")
        .and_then(Value::as_array)
    {
        let joined: String = texts
            .iter()
            .filter_map(|t| t.get("content").and_then(Value::as_str))
            .collect();
        return (!joined.is_empty()).then_some(joined);
    }

    ["content", "text"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn simple(kind: EventKind, name: &str, raw: &str) -> UpstreamEvent {
    UpstreamEvent {
        kind,
        name: name.to_string(),
        raw: raw.to_string(),
        content: None,
        message: None,
    }
}

fn error_event(name: &str, raw: &str, message: String) -> UpstreamEvent {
    UpstreamEvent {
        kind: EventKind::Error,
        name: name.to_string(),
        raw: raw.to_string(),
        content: None,
        message: Some(message),
    }
}

fn done_event() -> UpstreamEvent {
    simple(EventKind::Final, "done", DONE_SENTINEL)
}
