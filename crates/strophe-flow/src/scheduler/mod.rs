//! Continuation scheduling abstraction.
//!
//! After a chunk that leaves work remaining, the engine asks a
//! [`ContinuationScheduler`] to run another chunk invocation for the same
//! job after a pacing delay. The trait is deliberately fire-and-forget:
//! delivery is **not** guaranteed. A dropped continuation leaves the job
//! `Running` with a stale heartbeat, which the orphan reaper catches, and
//! any external re-drive (cron, queue retry, an operator) is safe because
//! a chunk invocation re-derives all state from the job record.
//!
//! - Long-running process: [`timer::TimerScheduler`] (tokio timer + spawn)
//! - Stateless-function target: an outbound call to the same entrypoint
//! - Tests: [`memory::RecordingScheduler`] records without firing

pub mod memory;
pub mod timer;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::id::JobId;

/// Schedules one future chunk invocation for a job.
#[async_trait]
pub trait ContinuationScheduler: Send + Sync {
    /// Requests that a chunk invocation for `job_id` run after `delay`.
    ///
    /// Best effort: implementations may drop the request on crash or
    /// capacity limits. Must not run the invocation inline.
    async fn schedule(&self, job_id: JobId, delay: Duration) -> Result<()>;
}
