//! Bounded-concurrency admission for conversion requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// RAII guard for one conversion slot.
///
/// Dropping it returns the slot to the gate. Hold it until the engine has
/// exited.
pub struct Permit {
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish()
    }
}

/// Caps the number of conversions running at once in this process.
///
/// Waiters are admitted in FIFO order. A request that cannot get a slot
/// within its wait budget is rejected with [`lc_core::Error::AdmissionRejected`].
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    retry_after_secs: u64,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots (at least one).
    pub fn new(capacity: usize, retry_after_secs: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            retry_after_secs,
        }
    }

    /// Wait up to `wait` for a free slot.
    pub async fn acquire(&self, wait: Duration) -> lc_core::Result<Permit> {
        if let Some(permit) = self.try_acquire() {
            tracing::debug!(in_use = self.in_use(), capacity = self.capacity, "Conversion slot acquired");
            return Ok(permit);
        }

        let started = std::time::Instant::now();
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(wait, acquire).await {
            Ok(Ok(permit)) => {
                tracing::debug!(
                    in_use = self.in_use(),
                    capacity = self.capacity,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Conversion slot acquired after waiting"
                );
                Ok(Permit { permit })
            }
            Ok(Err(_closed)) => Err(lc_core::Error::Internal(
                "admission gate closed".into(),
            )),
            Err(_elapsed) => {
                tracing::warn!(
                    in_use = self.in_use(),
                    capacity = self.capacity,
                    wait_ms = wait.as_millis() as u64,
                    "Admission rejected; all conversion slots busy"
                );
                Err(lc_core::Error::AdmissionRejected {
                    retry_after_secs: self.retry_after_secs,
                })
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit { permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}
