//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, body limit)
//! - Serve until the shutdown signal fires

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::gateway::Gateway;
use crate::http::handlers::{self, AppState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};

/// HTTP front end for the relay.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>, config: &RelayConfig) -> Self {
        let state = AppState {
            gateway,
            routes: Arc::new(config.routes.clone()),
        };
        Self {
            router: Self::build_router(state, config.listener.max_body_size),
        }
    }

    fn build_router(state: AppState, max_body_size: usize) -> Router {
        Router::new()
            .route("/api/agent/chat", post(handlers::agent_chat))
            .route("/api/agent/stream", post(handlers::agent_stream))
            .route("/api/analyze", post(handlers::analyze))
            .route("/api/bot/forward", post(handlers::bot_forward))
            .route("/health", get(handlers::health))
            .route("/status", get(handlers::status))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(DefaultBodyLimit::disable())
                    .layer(RequestBodyLimitLayer::new(max_body_size)),
            )
    }

    /// The configured router, for in-process serving.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
