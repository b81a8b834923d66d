//! Timer-based scheduler for long-running process deployments.
//!
//! Each continuation becomes a spawned tokio task that sleeps out the
//! pacing delay and then invokes the host-provided callback, typically a
//! closure around `FlowService::continue_job`. The spawned task is
//! detached; if the process exits before it fires, the job stalls with a
//! stale heartbeat and the orphan reaper takes over.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::ContinuationScheduler;
use crate::error::Result;
use crate::id::JobId;

/// Host callback invoked when a continuation fires.
pub type ContinuationFn =
    Arc<dyn Fn(JobId) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Tokio-timer implementation of [`ContinuationScheduler`].
pub struct TimerScheduler {
    invoke: ContinuationFn,
}

impl TimerScheduler {
    /// Creates a scheduler that calls `invoke` for each fired continuation.
    #[must_use]
    pub fn new(invoke: ContinuationFn) -> Self {
        Self { invoke }
    }
}

impl std::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScheduler").finish_non_exhaustive()
    }
}

#[async_trait]
impl ContinuationScheduler for TimerScheduler {
    async fn schedule(&self, job_id: JobId, delay: Duration) -> Result<()> {
        let invoke = Arc::clone(&self.invoke);
        debug!(job.id = %job_id, ?delay, "scheduling continuation");
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            invoke(job_id).await;
        });
        Ok(())
    }
}
