//! Admission control for interpreter processes
//!
//! At most `capacity` submissions hold an execution slot at once. When every
//! slot is busy the configured [`OverloadPolicy`] decides between failing fast
//! and waiting in a bounded FIFO queue. Slots are tokio semaphore permits and
//! the queue depth is a compare-and-swap counter, so neither can be
//! over-admitted by racing callers, and both are given back from `Drop`.

use crate::config::{AdmissionConfig, OverloadPolicy};
use crate::errors::ExecutionError;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug, Clone)]
pub struct AdmissionController {
    slots: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    capacity: usize,
    policy: OverloadPolicy,
    max_queue_depth: usize,
}

/// Held for the whole run. Dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub running: usize,
    pub queued: usize,
    pub capacity: usize,
    pub max_queue_depth: usize,
}

/// Place in the wait queue, given back on drop even if the waiting future is
/// cancelled.
struct QueueSlot<'a> {
    queued: &'a AtomicUsize,
}

impl<'a> QueueSlot<'a> {
    fn enter(queued: &'a AtomicUsize, max_depth: usize) -> Option<Self> {
        queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < max_depth).then_some(depth + 1)
            })
            .ok()
            .map(|_| QueueSlot { queued })
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AdmissionController {
    pub fn new(capacity: usize, policy: OverloadPolicy, max_queue_depth: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            queued: Arc::new(AtomicUsize::new(0)),
            capacity,
            policy,
            max_queue_depth,
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(
            config.max_concurrent,
            config.overload_policy,
            config.max_queue_depth,
        )
    }

    pub fn policy(&self) -> OverloadPolicy {
        self.policy
    }

    /// Grant an execution slot now, after queueing, or not at all.
    pub async fn admit(&self) -> Result<AdmissionPermit, ExecutionError> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => return Ok(AdmissionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => {}
            Err(TryAcquireError::Closed) => {
                return Err(ExecutionError::Internal(
                    "admission controller is closed".to_string(),
                ))
            }
        }

        if self.policy == OverloadPolicy::Reject {
            log::warn!(
                "Rejecting submission: all {} execution slots are busy",
                self.capacity
            );
            return Err(ExecutionError::Overloaded);
        }

        let _slot = match QueueSlot::enter(&self.queued, self.max_queue_depth) {
            Some(slot) => slot,
            None => {
                log::warn!(
                    "Rejecting submission: wait queue is full ({} waiting)",
                    self.max_queue_depth
                );
                return Err(ExecutionError::Overloaded);
            }
        };
        log::debug!("All execution slots busy, submission queued");

        let permit = self.slots.clone().acquire_owned().await.map_err(|_| {
            ExecutionError::Internal("admission controller is closed".to_string())
        })?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            running: self.capacity.saturating_sub(self.slots.available_permits()),
            queued: self.queued.load(Ordering::Acquire),
            capacity: self.capacity,
            max_queue_depth: self.max_queue_depth,
        }
    }
}
