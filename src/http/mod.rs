//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! request
//!     → request.rs (x-request-id assigned / propagated)
//!     → TraceLayer (access log)
//!     → handlers.rs (dto.rs → UpstreamRequest → Gateway)
//!     → JSON body, or SSE stream for /api/agent/stream
//!     → response.rs (RelayError → status code)
//! ```

pub mod dto;
pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use handlers::AppState;
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
