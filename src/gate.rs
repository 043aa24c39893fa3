//! Bounded concurrency for in-flight downstream calls.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting permit pool bounding simultaneously outstanding requests.
///
/// Cloning the gate shares the pool. Acquisition yields an RAII permit, so
/// the slot is returned on every exit path of the guarded work, failures
/// included.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    limit: usize,
}

/// One in-flight slot; freed when dropped.
#[derive(Debug)]
pub struct InFlightPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Configured maximum number of outstanding permits.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Suspends until an in-flight slot is free.
    pub async fn acquire(&self) -> InFlightPermit {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        InFlightPermit { _permit: permit }
    }
}
