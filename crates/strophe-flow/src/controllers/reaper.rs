//! Orphan detection and recovery.
//!
//! A dropped continuation or a crashed chunk invocation leaves a job
//! `Running` with a heartbeat that never refreshes. The reaper finds those
//! jobs and fails them so the condition is visible instead of silently
//! stalled. It runs opportunistically at orchestration entry points and on
//! demand via the cleanup operation; it must never touch a job with recent
//! activity, however slow that job is.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use metrics::counter;
use tracing::warn;

use crate::error::Result;
use crate::id::JobId;
use crate::job::JobStatus;
use crate::metrics::names as metric_names;
use crate::store::{CasResult, JobStore, StatusChange};

/// Error message stamped on reaped jobs.
pub const ORPHAN_ERROR: &str = "orphaned: no progress within threshold";

/// Fails `Running` jobs whose heartbeat is older than the threshold.
pub struct OrphanReaper {
    store: Arc<dyn JobStore>,
    orphan_threshold: StdDuration,
}

impl OrphanReaper {
    /// Creates a reaper with the given inactivity threshold.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, orphan_threshold: StdDuration) -> Self {
        Self {
            store,
            orphan_threshold,
        }
    }

    /// Reaps all currently orphaned jobs and returns how many were failed.
    ///
    /// Each transition is a CAS on `Running`; a job that revived between
    /// the query and the update is skipped, not an error.
    ///
    /// # Errors
    /// Returns storage errors from the underlying queries.
    pub async fn reap(&self) -> Result<usize> {
        let now = Utc::now();
        let threshold = Duration::from_std(self.orphan_threshold)
            .unwrap_or_else(|_| Duration::minutes(5));

        let orphans = self.store.get_orphaned_jobs(now, threshold).await?;
        let mut reaped = 0_usize;
        for job in orphans {
            if self.reap_one(job.id).await? {
                reaped += 1;
            }
        }

        if reaped > 0 {
            counter!(metric_names::JOBS_REAPED_TOTAL).increment(reaped as u64);
        }
        Ok(reaped)
    }

    async fn reap_one(&self, job_id: JobId) -> Result<bool> {
        let result = self
            .store
            .cas_status(
                job_id,
                JobStatus::Running,
                StatusChange::to(JobStatus::Failed).with_error(ORPHAN_ERROR),
                Utc::now(),
            )
            .await?;

        match result {
            CasResult::Success => {
                warn!(job.id = %job_id, "reaped orphaned job");
                Ok(true)
            }
            // Revived or removed since the query; leave it alone.
            CasResult::NotFound | CasResult::StatusMismatch { .. } => Ok(false),
        }
    }
}
