//! In-memory upstream that replays a fixed script.
//!
//! Compiled only for unit tests. Each open replays the same script on a
//! fresh transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::upstream::client::{UpstreamConnector, UpstreamHandle, UpstreamTransport};
use crate::upstream::frame::RawFrame;
use crate::upstream::types::{UpstreamError, UpstreamRequest, UpstreamResult};

/// One scripted action.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver a frame.
    Frame(RawFrame),
    /// Wait before the next step.
    Delay(Duration),
    /// Fail the read with a transport error.
    Fail(UpstreamError),
    /// Never produce anything again.
    Hang,
}

impl Step {
    /// `message` event carrying `answer`.
    pub fn delta(answer: &str) -> Self {
        Step::Frame(RawFrame::sse(
            "message",
            json!({"event": "message", "answer": answer}).to_string(),
        ))
    }

    /// `message_end` terminal event.
    pub fn finish() -> Self {
        Step::Frame(RawFrame::sse("message", r#"{"event":"message_end"}"#))
    }

    /// `error` terminal event.
    pub fn error(message: &str) -> Self {
        Step::Frame(RawFrame::sse(
            "error",
            json!({"event": "error", "message": message}).to_string(),
        ))
    }

    pub fn ping() -> Self {
        Step::Frame(RawFrame::sse("ping", ""))
    }

    pub fn delay_ms(ms: u64) -> Self {
        Step::Delay(Duration::from_millis(ms))
    }
}

/// Transport replaying a script.
#[derive(Debug)]
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            sent: Arc::default(),
            closed: Arc::default(),
        }
    }

    /// Payloads received by `send`.
    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    /// Set once `close` has been called.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(&mut self, payload: String) -> UpstreamResult<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<UpstreamResult<RawFrame>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.steps.pop_front()? {
                Step::Frame(frame) => return Some(Ok(frame)),
                Step::Delay(d) => tokio::time::sleep(d).await,
                Step::Fail(e) => return Some(Err(e)),
                Step::Hang => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`ScriptedTransport`]s.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    name: String,
    script: Vec<Step>,
    open_error: Option<UpstreamError>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(name: impl Into<String>, script: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            script,
            open_error: None,
            opens: Arc::default(),
            closes: Arc::default(),
            sent: Arc::default(),
        }
    }

    /// Make every `open` fail with `error`.
    pub fn failing(name: impl Into<String>, error: UpstreamError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new(name, Vec::new())
        }
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of transports closed by their session.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every payload sent through any transport.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload(&self, request: &UpstreamRequest) -> Value {
        json!({
            "query": request.query(),
            "mode": request.request_mode().as_str(),
            "conversation_id": request.conversation_id(),
            "inputs": request.inputs_json(),
        })
    }

    async fn open(&self, _request: &UpstreamRequest) -> UpstreamResult<UpstreamHandle> {
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(UpstreamHandle::new(Box::new(CountingTransport {
            inner: ScriptedTransport {
                steps: self.script.clone().into(),
                sent: self.sent.clone(),
                closed: Arc::default(),
            },
            closes: self.closes.clone(),
            counted: false,
        })))
    }
}

/// Scripted transport that reports its first close to the connector.
struct CountingTransport {
    inner: ScriptedTransport,
    closes: Arc<AtomicUsize>,
    counted: bool,
}

#[async_trait]
impl UpstreamTransport for CountingTransport {
    async fn send(&mut self, payload: String) -> UpstreamResult<()> {
        self.inner.send(payload).await
    }

    async fn recv(&mut self) -> Option<UpstreamResult<RawFrame>> {
        self.inner.recv().await
    }

    async fn close(&mut self) {
        if !self.counted {
            self.counted = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close().await;
    }
}
