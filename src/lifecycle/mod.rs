//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics → Shutdown → Gateway (connectors, admission, dedup) → watcher → listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → sessions close, server drains, reload task exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Open streaming sessions get a closing `error` event on shutdown

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
