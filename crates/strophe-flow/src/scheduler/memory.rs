//! Recording scheduler for tests.
//!
//! Records continuation requests without firing them, so tests can drive
//! chunk invocations explicitly and assert on what was scheduled.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::ContinuationScheduler;
use crate::error::{Error, Result};
use crate::id::JobId;

/// One recorded continuation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledContinuation {
    /// Job to continue.
    pub job_id: JobId,
    /// Requested pacing delay.
    pub delay: Duration,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("scheduler lock poisoned")
}

/// In-memory recording implementation of [`ContinuationScheduler`].
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: RwLock<VecDeque<ScheduledContinuation>>,
}

impl RecordingScheduler {
    /// Creates an empty recording scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the next recorded continuation, if any.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn take(&self) -> Result<Option<ScheduledContinuation>> {
        let mut scheduled = self.scheduled.write().map_err(poison_err)?;
        let entry = scheduled.pop_front();
        drop(scheduled);
        Ok(entry)
    }

    /// Number of continuations currently recorded.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let scheduled = self.scheduled.read().map_err(poison_err)?;
        Ok(scheduled.len())
    }

    /// Returns true if nothing has been scheduled.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ContinuationScheduler for RecordingScheduler {
    async fn schedule(&self, job_id: JobId, delay: Duration) -> Result<()> {
        let mut scheduled = self.scheduled.write().map_err(poison_err)?;
        scheduled.push_back(ScheduledContinuation { job_id, delay });
        drop(scheduled);
        Ok(())
    }
}
