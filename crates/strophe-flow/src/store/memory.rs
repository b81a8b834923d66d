//! In-memory job store for testing and single-process deployments.
//!
//! ## Limitations
//!
//! - **Single-process only**: no cross-process coordination
//! - **No persistence**: all state is lost when the process exits
//!
//! The locking discipline still matches the production contract: every
//! mutation takes the write lock once and applies the full change, so the
//! atomicity the trait promises holds here too.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{CasResult, ChunkCommit, JobStore, LockResult, StatusChange};
use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::{Job, JobStatus};

/// Per-job item activity timestamps retained for the live metrics window.
const ACTIVITY_RING_CAPACITY: usize = 4096;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory implementation of [`JobStore`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    activity: RwLock<HashMap<JobId, VecDeque<DateTime<Utc>>>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Applies a status change to a job record in place.
///
/// The caller has already validated the transition against the state machine.
fn apply_status_change(job: &mut Job, change: &StatusChange, now: DateTime<Utc>) {
    job.status = change.target;
    if change.target.is_terminal() {
        job.completed_at = Some(now);
    }
    if change.clear_error {
        job.error_message = None;
        job.consecutive_errors = 0;
    }
    if let Some(message) = &change.error_message {
        job.error_message = Some(message.clone());
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        if jobs.contains_key(&job.id) {
            drop(jobs);
            return Err(Error::storage(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        drop(jobs);
        Ok(())
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        let job = jobs.get(&job_id).cloned();
        drop(jobs);
        Ok(job)
    }

    async fn try_acquire(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
        lock_timeout: Duration,
        force: bool,
    ) -> Result<LockResult> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(job) = jobs.get_mut(&job_id) else {
            drop(jobs);
            return Ok(LockResult::NotFound);
        };

        if let Some(until) = job.locked_until {
            if !force && until > now {
                drop(jobs);
                return Ok(LockResult::Held { until });
            }
        }

        job.locked_until = Some(now + lock_timeout);
        job.last_activity_at = Some(now);
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
            job.started_at = Some(now);
        }
        drop(jobs);

        Ok(LockResult::Acquired)
    }

    async fn release_lock(&self, job_id: JobId) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        if let Some(job) = jobs.get_mut(&job_id) {
            job.locked_until = None;
        }
        drop(jobs);
        Ok(())
    }

    async fn cas_status(
        &self,
        job_id: JobId,
        expected: JobStatus,
        change: StatusChange,
        now: DateTime<Utc>,
    ) -> Result<CasResult> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(job) = jobs.get_mut(&job_id) else {
            drop(jobs);
            return Ok(CasResult::NotFound);
        };

        if job.status != expected {
            let actual = job.status;
            drop(jobs);
            return Ok(CasResult::StatusMismatch { actual });
        }

        if !expected.can_transition_to(change.target) {
            drop(jobs);
            return Err(Error::InvalidStatusTransition {
                from: expected.to_string(),
                to: change.target.to_string(),
                reason: "transition not permitted by the job state machine".to_string(),
            });
        }

        apply_status_change(job, &change, now);
        drop(jobs);

        Ok(CasResult::Success)
    }

    async fn request_cancel(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobStatus>> {
        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(job) = jobs.get_mut(&job_id) else {
            drop(jobs);
            return Ok(None);
        };

        let status = match job.status {
            // Nothing in flight: cancel takes effect immediately.
            JobStatus::Pending | JobStatus::Paused => {
                job.cancel_requested = true;
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(now);
                job.status
            }
            // A chunk may be mid-flight: flag it and let the runner finish.
            JobStatus::Running => {
                job.cancel_requested = true;
                job.status = JobStatus::Cancelling;
                job.status
            }
            JobStatus::Cancelling => {
                job.cancel_requested = true;
                job.status
            }
            terminal => terminal,
        };
        drop(jobs);

        Ok(Some(status))
    }

    async fn commit_chunk(
        &self,
        job_id: JobId,
        commit: &ChunkCommit,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if commit.succeeded + commit.failed != commit.items_attempted {
            return Err(Error::storage(format!(
                "chunk commit counters disagree: {} succeeded + {} failed != {} attempted",
                commit.succeeded, commit.failed, commit.items_attempted
            )));
        }

        let mut jobs = self.jobs.write().map_err(poison_err)?;
        let Some(job) = jobs.get_mut(&job_id) else {
            drop(jobs);
            return Err(Error::JobNotFound { job_id });
        };

        if job.cursor + commit.items_attempted > job.total_items {
            let (cursor, total) = (job.cursor, job.total_items);
            drop(jobs);
            return Err(Error::storage(format!(
                "chunk commit would advance cursor past total_items ({cursor} + {} > {total})",
                commit.items_attempted
            )));
        }

        job.cursor += commit.items_attempted;
        job.processed_count += commit.items_attempted;
        job.succeeded_count += commit.succeeded;
        job.failed_count += commit.failed;
        job.enriched_count += commit.enriched;
        job.annotated_count += commit.annotated;
        for (bucket, count) in &commit.quality_buckets {
            *job.quality_histogram.entry(bucket.clone()).or_insert(0) += count;
        }
        job.chunks_processed += 1;
        job.consecutive_errors = commit.consecutive_errors;
        job.last_activity_at = Some(now);
        job.locked_until = None;

        if let Some(change) = &commit.status_change {
            // A lifecycle operation may have raced the chunk (e.g. a pause
            // landing as the final chunk commits). The counters still commit;
            // the status keeps whichever transition remains legal.
            if job.status.can_transition_to(change.target) {
                apply_status_change(job, change, now);
            }
        }

        debug_assert!(job.counters_consistent());
        drop(jobs);

        Ok(())
    }

    async fn get_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| statuses.contains(&job.status))
            .cloned()
            .collect();
        drop(jobs);
        matched.sort_by_key(|job| (job.created_at, job.id));
        Ok(matched)
    }

    async fn get_orphaned_jobs(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().map_err(poison_err)?;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job
                        .last_activity_at
                        .is_some_and(|at| at < now - threshold)
            })
            .cloned()
            .collect();
        drop(jobs);
        matched.sort_by_key(|job| (job.created_at, job.id));
        Ok(matched)
    }

    async fn record_item_activity(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()> {
        let mut activity = self.activity.write().map_err(poison_err)?;
        let ring = activity.entry(job_id).or_default();
        ring.push_back(at);
        while ring.len() > ACTIVITY_RING_CAPACITY {
            ring.pop_front();
        }
        drop(activity);
        Ok(())
    }

    async fn item_activity(
        &self,
        job_id: JobId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let activity = self.activity.read().map_err(poison_err)?;
        let window = activity
            .get(&job_id)
            .map(|ring| ring.iter().filter(|at| **at >= since).copied().collect())
            .unwrap_or_default();
        drop(activity);
        Ok(window)
    }

    async fn most_recent_item_activity(&self, job_id: JobId) -> Result<Option<DateTime<Utc>>> {
        let activity = self.activity.read().map_err(poison_err)?;
        let most_recent = activity.get(&job_id).and_then(|ring| ring.back().copied());
        drop(activity);
        Ok(most_recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobScope, StageSkips};

    fn make_job(total_items: u64, chunk_size: u32) -> Job {
        Job::new(
            JobScope::Partition,
            Some("corpus-a".to_string()),
            total_items,
            chunk_size,
            StageSkips::default(),
        )
    }

    #[tokio::test]
    async fn first_acquisition_moves_pending_to_running() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let now = Utc::now();
        let result = store
            .try_acquire(job.id, now, Duration::seconds(90), false)
            .await?;
        assert!(result.is_acquired());

        let stored = store.get_job(job.id).await?.unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.started_at, Some(now));
        assert_eq!(stored.last_activity_at, Some(now));

        Ok(())
    }

    #[tokio::test]
    async fn live_lease_blocks_second_acquisition() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let now = Utc::now();
        assert!(store
            .try_acquire(job.id, now, Duration::seconds(90), false)
            .await?
            .is_acquired());

        let second = store
            .try_acquire(job.id, now + Duration::seconds(5), Duration::seconds(90), false)
            .await?;
        assert_eq!(
            second,
            LockResult::Held {
                until: now + Duration::seconds(90)
            }
        );

        Ok(())
    }

    #[tokio::test]
    async fn released_lease_is_immediately_reacquirable() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let now = Utc::now();
        assert!(store
            .try_acquire(job.id, now, Duration::seconds(90), false)
            .await?
            .is_acquired());
        store.release_lock(job.id).await?;

        let next = store
            .try_acquire(job.id, now + Duration::seconds(2), Duration::seconds(90), false)
            .await?;
        assert!(next.is_acquired());

        Ok(())
    }

    #[tokio::test]
    async fn commit_chunk_releases_the_lease() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let now = Utc::now();
        store
            .try_acquire(job.id, now, Duration::seconds(90), false)
            .await?;
        let commit = ChunkCommit {
            items_attempted: 20,
            succeeded: 20,
            ..ChunkCommit::default()
        };
        store.commit_chunk(job.id, &commit, now).await?;

        assert!(store
            .try_acquire(job.id, now + Duration::seconds(2), Duration::seconds(90), false)
            .await?
            .is_acquired());

        Ok(())
    }

    #[tokio::test]
    async fn stale_lease_expires_on_its_own() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let now = Utc::now();
        assert!(store
            .try_acquire(job.id, now, Duration::seconds(90), false)
            .await?
            .is_acquired());

        // 91 seconds later the lease is stale and a new holder takes over.
        let later = now + Duration::seconds(91);
        let result = store
            .try_acquire(job.id, later, Duration::seconds(90), false)
            .await?;
        assert!(result.is_acquired());

        Ok(())
    }

    #[tokio::test]
    async fn force_bypasses_a_live_lease() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let now = Utc::now();
        assert!(store
            .try_acquire(job.id, now, Duration::seconds(90), false)
            .await?
            .is_acquired());

        let forced = store
            .try_acquire(job.id, now + Duration::seconds(1), Duration::seconds(90), true)
            .await?;
        assert!(forced.is_acquired());

        Ok(())
    }

    #[tokio::test]
    async fn acquire_unknown_job_reports_not_found() -> Result<()> {
        let store = InMemoryJobStore::new();
        let result = store
            .try_acquire(JobId::generate(), Utc::now(), Duration::seconds(90), false)
            .await?;
        assert_eq!(result, LockResult::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn cas_status_rejects_mismatched_expectation() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let result = store
            .cas_status(
                job.id,
                JobStatus::Running,
                StatusChange::to(JobStatus::Paused),
                Utc::now(),
            )
            .await?;
        assert_eq!(
            result,
            CasResult::StatusMismatch {
                actual: JobStatus::Pending
            }
        );

        Ok(())
    }

    #[tokio::test]
    async fn cas_status_refuses_illegal_transitions() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let result = store
            .cas_status(
                job.id,
                JobStatus::Pending,
                StatusChange::to(JobStatus::Completed),
                Utc::now(),
            )
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidStatusTransition { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn cancel_on_pending_is_immediate() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let status = store.request_cancel(job.id, Utc::now()).await?;
        assert_eq!(status, Some(JobStatus::Cancelled));

        let stored = store.get_job(job.id).await?.unwrap();
        assert!(stored.cancel_requested);
        assert!(stored.completed_at.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn cancel_on_running_moves_to_cancelling() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;
        store
            .try_acquire(job.id, Utc::now(), Duration::seconds(90), false)
            .await?;

        let status = store.request_cancel(job.id, Utc::now()).await?;
        assert_eq!(status, Some(JobStatus::Cancelling));

        let stored = store.get_job(job.id).await?.unwrap();
        assert!(stored.cancel_requested);
        assert!(stored.completed_at.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn cancel_on_terminal_job_is_a_no_op() -> Result<()> {
        let store = InMemoryJobStore::new();
        let mut job = make_job(100, 20);
        job.status = JobStatus::Completed;
        store.insert_job(&job).await?;

        let status = store.request_cancel(job.id, Utc::now()).await?;
        assert_eq!(status, Some(JobStatus::Completed));

        let stored = store.get_job(job.id).await?.unwrap();
        assert!(!stored.cancel_requested);

        Ok(())
    }

    #[tokio::test]
    async fn commit_chunk_folds_all_counters_atomically() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;
        store
            .try_acquire(job.id, Utc::now(), Duration::seconds(90), false)
            .await?;

        let mut buckets = std::collections::BTreeMap::new();
        buckets.insert("high".to_string(), 12_u64);
        buckets.insert("low".to_string(), 3_u64);

        let commit = ChunkCommit {
            items_attempted: 20,
            succeeded: 17,
            failed: 3,
            enriched: 15,
            annotated: 14,
            quality_buckets: buckets,
            consecutive_errors: 1,
            status_change: None,
        };
        store.commit_chunk(job.id, &commit, Utc::now()).await?;

        let stored = store.get_job(job.id).await?.unwrap();
        assert_eq!(stored.cursor, 20);
        assert_eq!(stored.processed_count, 20);
        assert_eq!(stored.succeeded_count, 17);
        assert_eq!(stored.failed_count, 3);
        assert_eq!(stored.enriched_count, 15);
        assert_eq!(stored.annotated_count, 14);
        assert_eq!(stored.quality_histogram.get("high"), Some(&12));
        assert_eq!(stored.chunks_processed, 1);
        assert_eq!(stored.consecutive_errors, 1);
        assert!(stored.counters_consistent());

        Ok(())
    }

    #[tokio::test]
    async fn commit_past_total_items_is_rejected() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(10, 20);
        store.insert_job(&job).await?;

        let commit = ChunkCommit {
            items_attempted: 11,
            succeeded: 11,
            ..ChunkCommit::default()
        };
        let result = store.commit_chunk(job.id, &commit, Utc::now()).await;
        assert!(result.is_err());

        // Nothing moved.
        let stored = store.get_job(job.id).await?.unwrap();
        assert_eq!(stored.cursor, 0);

        Ok(())
    }

    #[tokio::test]
    async fn commit_with_inconsistent_counters_is_rejected() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job = make_job(100, 20);
        store.insert_job(&job).await?;

        let commit = ChunkCommit {
            items_attempted: 5,
            succeeded: 3,
            failed: 1,
            ..ChunkCommit::default()
        };
        assert!(store.commit_chunk(job.id, &commit, Utc::now()).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn orphan_query_respects_the_threshold() -> Result<()> {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let threshold = Duration::seconds(300);

        let mut stale = make_job(100, 20);
        stale.status = JobStatus::Running;
        stale.last_activity_at = Some(now - threshold - Duration::seconds(1));
        store.insert_job(&stale).await?;

        let mut fresh = make_job(100, 20);
        fresh.status = JobStatus::Running;
        fresh.last_activity_at = Some(now);
        store.insert_job(&fresh).await?;

        let orphans = store.get_orphaned_jobs(now, threshold).await?;
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, stale.id);

        Ok(())
    }

    #[tokio::test]
    async fn item_activity_window_filters_and_orders() -> Result<()> {
        let store = InMemoryJobStore::new();
        let job_id = JobId::generate();
        let now = Utc::now();

        store
            .record_item_activity(job_id, now - Duration::minutes(10))
            .await?;
        store
            .record_item_activity(job_id, now - Duration::minutes(3))
            .await?;
        store.record_item_activity(job_id, now).await?;

        let window = store
            .item_activity(job_id, now - Duration::minutes(5))
            .await?;
        assert_eq!(window.len(), 2);
        assert!(window[0] < window[1]);

        assert_eq!(store.most_recent_item_activity(job_id).await?, Some(now));

        Ok(())
    }

    #[tokio::test]
    async fn activity_for_unknown_job_is_empty() -> Result<()> {
        let store = InMemoryJobStore::new();
        let window = store
            .item_activity(JobId::generate(), Utc::now() - Duration::minutes(5))
            .await?;
        assert!(window.is_empty());
        Ok(())
    }
}
