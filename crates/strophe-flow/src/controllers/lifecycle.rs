//! Pause, resume, and cancel operations.
//!
//! All three are single conditional updates against the store. Pause and
//! resume act only on one job and refuse transitions the status machine
//! forbids; cancel is always accepted and becomes effective at the chunk
//! runner's next cooperative checkpoint.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::JobStatus;
use crate::store::{CasResult, JobStore, StatusChange};

/// Applies operator lifecycle transitions to jobs.
pub struct LifecycleController {
    store: Arc<dyn JobStore>,
}

impl LifecycleController {
    /// Creates a controller over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Pauses a `Running` job. The in-flight chunk, if any, finishes its
    /// current items and commits; no further chunks run until resume.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job and
    /// [`Error::InvalidStatusTransition`] when the job is not `Running`.
    pub async fn pause(&self, job_id: JobId) -> Result<JobStatus> {
        let result = self
            .store
            .cas_status(
                job_id,
                JobStatus::Running,
                StatusChange::to(JobStatus::Paused),
                Utc::now(),
            )
            .await?;

        match result {
            CasResult::Success => {
                info!(job.id = %job_id, "job paused");
                Ok(JobStatus::Paused)
            }
            CasResult::NotFound => Err(Error::JobNotFound { job_id }),
            CasResult::StatusMismatch { actual } => Err(Error::InvalidStatusTransition {
                from: actual.to_string(),
                to: JobStatus::Paused.to_string(),
                reason: "only a running job can be paused".to_string(),
            }),
        }
    }

    /// Resumes a `Paused` job, clearing any breaker error state so the
    /// consecutive-failure count starts fresh.
    ///
    /// The caller is responsible for driving the next chunk; resume itself
    /// only flips status.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job and
    /// [`Error::InvalidStatusTransition`] when the job is not `Paused`.
    pub async fn resume(&self, job_id: JobId) -> Result<JobStatus> {
        let result = self
            .store
            .cas_status(
                job_id,
                JobStatus::Paused,
                StatusChange::to(JobStatus::Running).clearing_error(),
                Utc::now(),
            )
            .await?;

        match result {
            CasResult::Success => {
                info!(job.id = %job_id, "job resumed");
                Ok(JobStatus::Running)
            }
            CasResult::NotFound => Err(Error::JobNotFound { job_id }),
            CasResult::StatusMismatch { actual } => Err(Error::InvalidStatusTransition {
                from: actual.to_string(),
                to: JobStatus::Running.to_string(),
                reason: "only a paused job can be resumed".to_string(),
            }),
        }
    }

    /// Requests cancellation of a job and returns the resulting status.
    ///
    /// Never kills an in-flight chunk: a `Running` job moves to `Cancelling`
    /// and the runner finalizes `Cancelled` between items; `Pending` and
    /// `Paused` jobs cancel immediately. Terminal jobs are left unchanged.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatus> {
        let status = self
            .store
            .request_cancel(job_id, Utc::now())
            .await?
            .ok_or(Error::JobNotFound { job_id })?;
        info!(job.id = %job_id, status = %status, "cancellation requested");
        Ok(status)
    }
}
