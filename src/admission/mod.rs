//! Admission control for outbound upstream calls.
//!
//! # Responsibilities
//! - Bound the number of concurrent upstream calls
//! - Queue callers (FIFO) while the pool is exhausted
//! - Return leases automatically on every exit path
//!
//! # Design Decisions
//! - Backed by `tokio::sync::Semaphore`, which is fair (FIFO)
//! - Permits are RAII guards; release happens on drop and cannot happen twice
//! - Dropping a waiting `acquire()` future abandons the wait without consuming a permit

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::observability::metrics;

/// Bounded pool of admission permits.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    /// Create a controller with `capacity` permits.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a permit is available.
    ///
    /// Cancellation-safe: if the returned future is dropped before completion,
    /// no permit is consumed.
    pub async fn acquire(&self) -> AdmissionPermit {
        // The semaphore is owned by this controller and never closed.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("Semaphore closed unexpectedly");

        tracing::debug!(
            available_permits = self.semaphore.available_permits(),
            capacity = self.capacity,
            "Admission permit acquired"
        );
        metrics::record_admission_available(self.semaphore.available_permits());

        AdmissionPermit {
            _permit: permit,
            semaphore: self.semaphore.clone(),
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                metrics::record_admission_available(self.semaphore.available_permits());
                Some(AdmissionPermit {
                    _permit: permit,
                    semaphore: self.semaphore.clone(),
                })
            }
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Current free permits. Advisory only under concurrent access.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured pool size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently leased out.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available_permits())
    }
}

/// A lease on one upstream call slot.
///
/// When dropped, the slot is released back to the pool. This holds even if
/// the owning task panics or is cancelled.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // `_permit` is released after this body runs, hence the +1.
        metrics::record_admission_available(self.semaphore.available_permits() + 1);
    }
}
