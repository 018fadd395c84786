//! Caller-facing operations over the relay.
//!
//! # Data Flow
//! ```text
//! handle_streaming(upstream, req)
//!     → connector lookup → StreamingRelay::start → EventStream
//!
//! handle_blocking(upstream, req)
//!     → connector lookup → BlockingAdapter::call_and_collect
//!
//! handle_blocking_deduplicated(upstream, req)
//!     → connector.payload(req)
//!     → DuplicateSuppressor::should_suppress(upstream, payload)
//!         suppressed → Dispatch::Suppressed (no upstream call)
//!         accepted   → handle_blocking
//!
//! forward(target, payload)
//!     → DuplicateSuppressor::should_suppress(target, payload)
//!     → Forwarder::post
//! ```
//!
//! # Design Decisions
//! - Connectors are built once at startup from config and shared
//! - One admission pool covers every upstream
//! - Forwarding is dedup-guarded but not admission-controlled

pub mod forward;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::admission::AdmissionController;
use crate::config::{RelayConfig, SessionConfig};
use crate::dedup::{Dispatch, DuplicateSuppressor, Normalizer};
use crate::lifecycle::Shutdown;
use crate::relay::{
    AggregatedResult, BlockingAdapter, EventStream, RelayError, RelayResult, SessionLimits,
    StreamingRelay,
};
use crate::upstream::{connector_from_config, UpstreamConnector, UpstreamRequest};

pub use forward::{ForwardOutcome, Forwarder};

/// Point-in-time view for `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub capacity: usize,
    pub available_permits: usize,
    pub in_flight: usize,
    pub dedup_entries: usize,
    pub upstreams: Vec<String>,
}

/// Shared entry point for every relay operation.
pub struct Gateway {
    connectors: HashMap<String, Arc<dyn UpstreamConnector>>,
    relay: StreamingRelay,
    blocking: BlockingAdapter,
    suppressor: Arc<DuplicateSuppressor>,
    forwarder: Forwarder,
    blocking_timeout: Duration,
}

impl Gateway {
    /// Build a gateway with no upstreams registered.
    pub fn new(
        capacity: usize,
        session: &SessionConfig,
        suppressor: DuplicateSuppressor,
        forward_timeout: Duration,
    ) -> RelayResult<Self> {
        let relay = StreamingRelay::new(
            AdmissionController::new(capacity),
            SessionLimits::from_config(session),
            session.channel_capacity,
        );
        Ok(Self {
            connectors: HashMap::new(),
            blocking: BlockingAdapter::new(relay.clone()),
            relay,
            suppressor: Arc::new(suppressor),
            forwarder: Forwarder::new(forward_timeout)?,
            blocking_timeout: Duration::from_secs(session.blocking_timeout_secs),
        })
    }

    /// Build a gateway and its connectors from configuration.
    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let normalizer = Normalizer::from_config(&config.dedup.rules)
            .map_err(|e| RelayError::Config(format!("dedup rule: {e}")))?;
        let suppressor =
            DuplicateSuppressor::new(Duration::from_secs(config.dedup.cooldown_secs), normalizer);

        let mut gateway = Self::new(
            config.admission.capacity,
            &config.session,
            suppressor,
            Duration::from_secs(config.routes.forward_timeout_secs),
        )?;
        for upstream in &config.upstreams {
            let connector = connector_from_config(upstream)
                .map_err(|e| RelayError::Config(format!("upstream '{}': {e}", upstream.name)))?;
            gateway = gateway.with_connector(connector);
        }
        Ok(gateway)
    }

    /// Close open streaming sessions when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: &Shutdown) -> Self {
        self.relay = self.relay.with_shutdown(shutdown.sender());
        self.blocking = BlockingAdapter::new(self.relay.clone());
        self
    }

    /// Register (or replace) a connector under its own name.
    pub fn with_connector(mut self, connector: Arc<dyn UpstreamConnector>) -> Self {
        self.connectors.insert(connector.name().to_string(), connector);
        self
    }

    fn connector(&self, upstream: &str) -> RelayResult<&Arc<dyn UpstreamConnector>> {
        self.connectors
            .get(upstream)
            .ok_or_else(|| RelayError::UnknownUpstream(upstream.to_string()))
    }

    /// Start a streaming session.
    pub async fn handle_streaming(
        &self,
        upstream: &str,
        request: &UpstreamRequest,
    ) -> RelayResult<EventStream> {
        let connector = self.connector(upstream)?;
        self.relay.start(connector.as_ref(), request).await
    }

    /// Run a call to completion. `timeout` defaults to the configured blocking timeout.
    pub async fn handle_blocking(
        &self,
        upstream: &str,
        request: &UpstreamRequest,
        timeout: Option<Duration>,
    ) -> RelayResult<AggregatedResult> {
        let connector = self.connector(upstream)?;
        let timeout = timeout.unwrap_or(self.blocking_timeout);
        self.blocking
            .call_and_collect(connector.as_ref(), request, timeout)
            .await
    }

    /// Like [`Gateway::handle_blocking`], unless an equivalent request was
    /// accepted within the cooldown window.
    pub async fn handle_blocking_deduplicated(
        &self,
        upstream: &str,
        request: &UpstreamRequest,
    ) -> RelayResult<Dispatch<AggregatedResult>> {
        let connector = self.connector(upstream)?;
        let payload = connector.payload(request);
        if self.suppressor.should_suppress(upstream, &payload) {
            tracing::info!(upstream = %upstream, "Duplicate blocking request suppressed");
            return Ok(Dispatch::Suppressed);
        }
        self.blocking
            .call_and_collect(connector.as_ref(), request, self.blocking_timeout)
            .await
            .map(Dispatch::Completed)
    }

    /// Forward a JSON payload to `target` unless it repeats a recent one.
    pub async fn forward(
        &self,
        target: &str,
        payload: &Value,
    ) -> RelayResult<Dispatch<ForwardOutcome>> {
        if self.suppressor.should_suppress(target, payload) {
            tracing::info!(target = %target, "Duplicate forward suppressed");
            return Ok(Dispatch::Suppressed);
        }
        self.forwarder.post(target, payload).await.map(Dispatch::Completed)
    }

    pub fn suppressor(&self) -> &Arc<DuplicateSuppressor> {
        &self.suppressor
    }

    pub fn admission(&self) -> &AdmissionController {
        self.relay.admission()
    }

    pub fn status(&self) -> GatewayStatus {
        let admission = self.relay.admission();
        let mut upstreams: Vec<String> = self.connectors.keys().cloned().collect();
        upstreams.sort();
        GatewayStatus {
            capacity: admission.capacity(),
            available_permits: admission.available_permits(),
            in_flight: admission.in_flight(),
            dedup_entries: self.suppressor.len(),
            upstreams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::scripted::{ScriptedConnector, Step};

    fn gateway(connector: ScriptedConnector) -> Gateway {
        let suppressor = DuplicateSuppressor::new(Duration::from_secs(180), Normalizer::default());
        Gateway::new(10, &SessionConfig::default(), suppressor, Duration::from_secs(1))
            .unwrap()
            .with_connector(Arc::new(connector))
    }

    fn call_record() -> UpstreamRequest {
        UpstreamRequest::new("A").input("call_id", Some("1"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_cooldown_calls_upstream_once() {
        let connector = ScriptedConnector::new("T", vec![Step::delta("ok"), Step::finish()]);
        let gateway = gateway(connector.clone());

        let first = gateway.handle_blocking_deduplicated("T", &call_record()).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = gateway.handle_blocking_deduplicated("T", &call_record()).await.unwrap();

        assert_eq!(first.completed().unwrap().answer, "ok");
        assert!(second.is_suppressed());
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_again_after_cooldown() {
        let connector = ScriptedConnector::new("T", vec![Step::finish()]);
        let gateway = gateway(connector.clone());

        assert!(!gateway.handle_blocking_deduplicated("T", &call_record()).await.unwrap().is_suppressed());
        tokio::time::advance(Duration::from_secs(181)).await;
        assert!(!gateway.handle_blocking_deduplicated("T", &call_record()).await.unwrap().is_suppressed());
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test]
    async fn test_unknown_upstream() {
        let gateway = gateway(ScriptedConnector::new("T", vec![]));
        let err = gateway
            .handle_blocking("missing", &call_record(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownUpstream(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_streaming_and_status() {
        let connector = ScriptedConnector::new("T", vec![Step::delta("x"), Step::Hang]);
        let gateway = gateway(connector);

        let mut stream = gateway.handle_streaming("T", &call_record()).await.unwrap();
        assert_eq!(stream.recv().await.unwrap().content.as_deref(), Some("x"));

        let status = gateway.status();
        assert_eq!(status.capacity, 10);
        assert_eq!(status.in_flight, 1);
        assert_eq!(status.upstreams, ["T"]);
    }
}
