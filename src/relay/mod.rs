//! Streaming relay subsystem.
//!
//! # Data Flow
//! ```text
//! caller
//!     → streaming.rs (admission permit → open → send)
//!     → session.rs (task: upstream events → bounded channel, timeouts)
//!     → emitter.rs EventStream (downstream consumer)
//!
//! blocking caller
//!     → blocking.rs (consume EventStream, concatenate content, overall timeout)
//! ```
//!
//! # Design Decisions
//! - One task per session; the channel bound is the only buffering
//! - The session owns its permit, so every exit path releases it
//! - Terminal states are sinks; the blocking path reads them off the last event

pub mod blocking;
pub mod emitter;
pub mod error;
pub mod session;
pub mod streaming;

pub use blocking::{AggregatedResult, BlockingAdapter};
pub use emitter::{DownstreamEvent, EventStream};
pub use error::{RelayError, RelayResult};
pub use session::{SessionLimits, SessionState, SessionSummary, StreamSession};
pub use streaming::StreamingRelay;
