//! Process-wide ceiling on in-flight catalog calls.
//!
//! One limiter is constructed at startup and handed to every component
//! that talks to the catalog. Clones share the same slots.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct LimiterState {
    capacity: usize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

/// Bounded semaphore with an in-flight gauge.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    state: Arc<LimiterState>,
}

/// A held slot. Released when dropped, whatever the call's outcome.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<LimiterState>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Arc::new(LimiterState {
                capacity,
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<LimiterPermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        let now = self.state.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.high_water.fetch_max(now, Ordering::AcqRel);
        Ok(LimiterPermit {
            _permit: permit,
            state: Arc::clone(&self.state),
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    /// Most slots ever held at once.
    pub fn high_water_mark(&self) -> usize {
        self.state.high_water.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
