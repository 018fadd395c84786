//! Streaming AI relay.
//!
//! Fronts conversational AI upstreams (HTTP/SSE agents and WebSocket chat
//! services), relays their incremental output to callers in order, bounds
//! concurrent upstream calls, and suppresses near-duplicate requests.

// Core subsystems
pub mod config;
pub mod gateway;
pub mod http;
pub mod relay;
pub mod upstream;

// Request shaping
pub mod admission;
pub mod dedup;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::RelayConfig;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
