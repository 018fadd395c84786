//! One in-flight streaming relay.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::admission::AdmissionPermit;
use crate::config::SessionConfig;
use crate::observability::metrics;
use crate::relay::emitter::DownstreamEvent;
use crate::upstream::{EventKind, UpstreamError, UpstreamEvent, UpstreamHandle};

/// How long a terminal event may wait for buffer space before it is dropped.
const TERMINAL_DELIVERY_GRACE: Duration = Duration::from_secs(5);

/// Stand-in deadline when `Instant + Duration` would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Session lifecycle. Every state but `Open` is a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Open,
    Completed,
    TimedOut,
    Errored,
    /// The downstream consumer went away.
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Completed => "completed",
            SessionState::TimedOut => "timed_out",
            SessionState::Errored => "errored",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// Idle and absolute ceilings for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub absolute_timeout: Duration,
}

impl SessionLimits {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            absolute_timeout: Duration::from_secs(config.absolute_timeout_secs),
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub upstream: String,
    pub state: SessionState,
    pub forwarded: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy)]
enum Deadline {
    Idle,
    Absolute,
}

enum Step {
    DownstreamGone,
    ShuttingDown,
    Expired(Deadline),
    Upstream(Option<Result<UpstreamEvent, UpstreamError>>),
}

enum Delivery {
    Sent,
    Closed,
    Expired,
}

/// Pumps upstream events to one downstream consumer until a terminal state.
///
/// Owns its admission permit; the permit is released when the session is
/// dropped at the end of [`StreamSession::run`].
pub struct StreamSession {
    id: Uuid,
    upstream_name: String,
    upstream: UpstreamHandle,
    downstream: mpsc::Sender<DownstreamEvent>,
    limits: SessionLimits,
    state: SessionState,
    started_at: Instant,
    last_activity_at: Instant,
    forwarded: usize,
    shutdown: Option<broadcast::Receiver<()>>,
    _permit: Option<AdmissionPermit>,
}

impl StreamSession {
    pub fn new(
        upstream_name: impl Into<String>,
        upstream: UpstreamHandle,
        downstream: mpsc::Sender<DownstreamEvent>,
        limits: SessionLimits,
        permit: Option<AdmissionPermit>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            upstream_name: upstream_name.into(),
            upstream,
            downstream,
            limits,
            state: SessionState::Open,
            started_at: now,
            last_activity_at: now,
            forwarded: 0,
            shutdown: None,
            _permit: permit,
        }
    }

    /// End the session with an error event when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to a terminal state, then close the upstream.
    pub async fn run(mut self) -> SessionSummary {
        tracing::debug!(session_id = %self.id, upstream = %self.upstream_name, "Session started");
        let absolute_deadline = deadline_after(self.started_at, self.limits.absolute_timeout);

        while !self.state.is_terminal() {
            let idle_deadline = deadline_after(self.last_activity_at, self.limits.idle_timeout);
            let (deadline, which) = if idle_deadline <= absolute_deadline {
                (idle_deadline, Deadline::Idle)
            } else {
                (absolute_deadline, Deadline::Absolute)
            };

            let step = tokio::select! {
                biased;
                _ = self.downstream.closed() => Step::DownstreamGone,
                _ = shutdown_signal(&mut self.shutdown) => Step::ShuttingDown,
                read = tokio::time::timeout_at(deadline, self.upstream.next_event()) => match read {
                    Ok(item) => Step::Upstream(item),
                    Err(_) => Step::Expired(which),
                },
            };

            match step {
                Step::DownstreamGone => {
                    tracing::info!(session_id = %self.id, "Downstream disconnected, cancelling session");
                    self.transition(SessionState::Cancelled);
                }
                Step::ShuttingDown => self.shut_down().await,
                Step::Expired(which) => self.time_out(which).await,
                Step::Upstream(None) => {
                    tracing::debug!(session_id = %self.id, "Upstream closed without terminal event");
                    self.transition(SessionState::Completed);
                }
                Step::Upstream(Some(Ok(event))) => self.on_event(event, absolute_deadline).await,
                Step::Upstream(Some(Err(UpstreamError::Protocol(reason)))) => {
                    self.last_activity_at = Instant::now();
                    tracing::warn!(session_id = %self.id, %reason, "Skipping malformed upstream frame");
                }
                Step::Upstream(Some(Err(e))) => {
                    metrics::record_upstream_error(&self.upstream_name, e.kind());
                    self.fail(e.to_string()).await;
                }
            }
        }

        self.upstream.close().await;

        let elapsed = self.started_at.elapsed();
        metrics::record_session(&self.upstream_name, self.state.as_str(), elapsed);
        tracing::info!(
            session_id = %self.id,
            upstream = %self.upstream_name,
            outcome = self.state.as_str(),
            forwarded = self.forwarded,
            elapsed_ms = elapsed.as_millis() as u64,
            "Session finished"
        );

        SessionSummary {
            id: self.id,
            upstream: self.upstream_name.clone(),
            state: self.state,
            forwarded: self.forwarded,
            elapsed,
        }
    }

    async fn on_event(&mut self, event: UpstreamEvent, absolute_deadline: Instant) {
        self.last_activity_at = Instant::now();
        if self.state.is_terminal() {
            tracing::debug!(session_id = %self.id, event = %event.name, "Dropping event after terminal state");
            return;
        }
        if event.kind == EventKind::Ping {
            tracing::trace!(session_id = %self.id, "Upstream ping");
        }

        let closing = match event.kind {
            EventKind::Final => Some(SessionState::Completed),
            EventKind::Error => Some(SessionState::Errored),
            EventKind::ContentDelta | EventKind::Ping => None,
        };

        let mut out = DownstreamEvent::from_upstream(&event);
        out.closing = closing;

        match closing {
            None => match self.deliver(out, absolute_deadline).await {
                Delivery::Sent => {}
                Delivery::Closed => {
                    tracing::info!(session_id = %self.id, "Downstream disconnected, cancelling session");
                    self.transition(SessionState::Cancelled);
                }
                Delivery::Expired => self.time_out(Deadline::Absolute).await,
            },
            Some(next) => {
                if let Some(message) = &event.message {
                    tracing::warn!(session_id = %self.id, %message, "Upstream reported an error");
                }
                if !matches!(self.deliver(out, absolute_deadline).await, Delivery::Sent) {
                    tracing::warn!(session_id = %self.id, "Failed to deliver terminal event");
                }
                self.transition(next);
            }
        }
    }

    async fn time_out(&mut self, which: Deadline) {
        if !self.transition(SessionState::TimedOut) {
            return;
        }
        let message = match which {
            Deadline::Idle => format!(
                "upstream idle for {}s, session timed out",
                self.limits.idle_timeout.as_secs()
            ),
            Deadline::Absolute => format!(
                "session exceeded {}s limit",
                self.limits.absolute_timeout.as_secs()
            ),
        };
        tracing::warn!(session_id = %self.id, upstream = %self.upstream_name, %message, "Session timed out");
        self.push_terminal(DownstreamEvent::error(message).closing(SessionState::TimedOut))
            .await;
    }

    async fn shut_down(&mut self) {
        if !self.transition(SessionState::Errored) {
            return;
        }
        tracing::info!(session_id = %self.id, upstream = %self.upstream_name, "Relay shutting down, closing session");
        self.push_terminal(
            DownstreamEvent::error("relay is shutting down").closing(SessionState::Errored),
        )
        .await;
    }

    async fn fail(&mut self, message: String) {
        if !self.transition(SessionState::Errored) {
            return;
        }
        tracing::warn!(session_id = %self.id, upstream = %self.upstream_name, %message, "Upstream stream failed");
        self.push_terminal(DownstreamEvent::error(message).closing(SessionState::Errored))
            .await;
    }

    /// Forward one event, bounded by the session's absolute deadline.
    async fn deliver(&mut self, event: DownstreamEvent, deadline: Instant) -> Delivery {
        match tokio::time::timeout_at(deadline, self.downstream.send(event)).await {
            Ok(Ok(())) => {
                self.forwarded += 1;
                Delivery::Sent
            }
            Ok(Err(_)) => Delivery::Closed,
            Err(_) => Delivery::Expired,
        }
    }

    /// Best-effort delivery of a synthesized terminal event; never retried.
    async fn push_terminal(&mut self, event: DownstreamEvent) {
        match tokio::time::timeout(TERMINAL_DELIVERY_GRACE, self.downstream.send(event)).await {
            Ok(Ok(())) => self.forwarded += 1,
            _ => tracing::warn!(session_id = %self.id, "Failed to deliver terminal event"),
        }
    }

    /// Move to a terminal state. Returns `false` if already terminal.
    fn transition(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() {
            tracing::debug!(
                session_id = %self.id,
                current = self.state.as_str(),
                attempted = next.as_str(),
                "Ignoring transition out of terminal state"
            );
            return false;
        }
        self.state = next;
        true
    }
}

fn deadline_after(start: Instant, limit: Duration) -> Instant {
    start
        .checked_add(limit)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Resolves on the shutdown signal. Never resolves without a receiver or
/// once the sender is gone.
async fn shutdown_signal(shutdown: &mut Option<broadcast::Receiver<()>>) {
    if let Some(rx) = shutdown {
        match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => *shutdown = None,
        }
    }
    std::future::pending::<()>().await
}
