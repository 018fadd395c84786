//! Session setup: admission, connect, send, spawn.

use tokio::sync::{broadcast, mpsc};

use crate::admission::AdmissionController;
use crate::observability::metrics;
use crate::relay::emitter::EventStream;
use crate::relay::error::RelayResult;
use crate::relay::session::{SessionLimits, StreamSession};
use crate::upstream::{UpstreamConnector, UpstreamRequest};

/// Starts streaming sessions against upstream connectors.
#[derive(Debug, Clone)]
pub struct StreamingRelay {
    admission: AdmissionController,
    limits: SessionLimits,
    channel_capacity: usize,
    shutdown: Option<broadcast::Sender<()>>,
}

impl StreamingRelay {
    pub fn new(admission: AdmissionController, limits: SessionLimits, channel_capacity: usize) -> Self {
        Self {
            admission,
            limits,
            channel_capacity: channel_capacity.max(1),
            shutdown: None,
        }
    }

    /// Sessions started from now on close when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: broadcast::Sender<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Open a session and run it on its own task.
    pub async fn start(
        &self,
        connector: &dyn UpstreamConnector,
        request: &UpstreamRequest,
    ) -> RelayResult<EventStream> {
        let (session, stream) = self.prepare(connector, request).await?;
        tokio::spawn(session.run());
        Ok(stream)
    }

    /// Acquire a permit, connect and send, without starting the pump.
    ///
    /// On any failure the permit is released before returning.
    pub async fn prepare(
        &self,
        connector: &dyn UpstreamConnector,
        request: &UpstreamRequest,
    ) -> RelayResult<(StreamSession, EventStream)> {
        let upstream = connector.name();
        let permit = self.admission.acquire().await;

        let mut handle = match connector.open(request).await {
            Ok(handle) => handle,
            Err(e) => {
                metrics::record_upstream_error(upstream, e.kind());
                tracing::error!(upstream = %upstream, error = %e, "Failed to open upstream");
                return Err(e.into());
            }
        };

        if let Err(e) = handle.send(&connector.payload(request)).await {
            metrics::record_upstream_error(upstream, e.kind());
            tracing::error!(upstream = %upstream, error = %e, "Failed to send upstream request");
            handle.close().await;
            return Err(e.into());
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut session = StreamSession::new(upstream, handle, tx, self.limits, Some(permit));
        if let Some(shutdown) = &self.shutdown {
            session = session.with_shutdown(shutdown.subscribe());
        }
        let stream = EventStream::new(session.id(), rx);
        tracing::debug!(
            session_id = %session.id(),
            upstream = %upstream,
            in_flight = self.admission.in_flight(),
            "Upstream request sent"
        );
        Ok((session, stream))
    }
}
