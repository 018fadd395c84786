//! Duplicate request suppression.
//!
//! # Data Flow
//! ```text
//! (target, payload)
//!     → canonical JSON (sorted keys)
//!     → normalize.rs (regex rules mask volatile fragments)
//!     → md5(target ":" normalized) = fingerprint
//!     → suppressor.rs (cooldown table: proceed or suppress)
//! ```
//!
//! # Design Decisions
//! - Rules are data (config), not code; they hot-reload
//! - Suppression is a normal outcome, not an error
//! - Sweeping is opportunistic (after each acceptance), no timer task

pub mod normalize;
pub mod suppressor;

pub use normalize::{NormalizationRule, Normalizer};
pub use suppressor::DuplicateSuppressor;

/// Outcome of a dedup-guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch<T> {
    /// The request was sent and produced `T`.
    Completed(T),
    /// An identical request was accepted within the cooldown window.
    Suppressed,
}

impl<T> Dispatch<T> {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Dispatch::Suppressed)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Dispatch::Completed(v) => Some(v),
            Dispatch::Suppressed => None,
        }
    }
}
