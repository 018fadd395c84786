//! Upstream AI service clients.
//!
//! # Data Flow
//! ```text
//! UpstreamRequest
//!     → UpstreamConnector::payload (SSE JSON body or WebSocket envelope)
//!     → UpstreamConnector::open (auth.rs applies credentials)
//!     → UpstreamHandle::send
//!     → UpstreamTransport::recv (sse.rs | websocket.rs; scripted.rs in unit tests)
//!     → frame.rs decode → UpstreamEvent
//! ```
//!
//! # Design Decisions
//! - Transports move frames, `frame.rs` interprets them; one decoder for all wire formats
//! - A handle yields a finite sequence that ends at the first terminal event
//! - Malformed frames are per-frame errors, not connection errors

pub mod auth;
pub mod client;
pub mod frame;
#[cfg(test)]
pub mod scripted;
pub mod sse;
pub mod types;
pub mod websocket;

use std::sync::Arc;

pub use client::{UpstreamConnector, UpstreamHandle, UpstreamTransport};
pub use frame::RawFrame;
pub use sse::SseConnector;
pub use types::{EventKind, Mode, UpstreamError, UpstreamEvent, UpstreamRequest, UpstreamResult};
pub use websocket::WebSocketConnector;

use crate::config::{UpstreamConfig, UpstreamKind};

/// Build the connector for a configured upstream.
pub fn connector_from_config(config: &UpstreamConfig) -> UpstreamResult<Arc<dyn UpstreamConnector>> {
    let connector: Arc<dyn UpstreamConnector> = match config.kind {
        UpstreamKind::Sse => Arc::new(SseConnector::from_config(config)?),
        UpstreamKind::Websocket => Arc::new(WebSocketConnector::from_config(config)?),
    };
    tracing::info!(
        upstream = %config.name,
        kind = ?config.kind,
        url = %config.url,
        "Upstream registered"
    );
    Ok(connector)
}
