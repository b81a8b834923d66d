//! Pluggable storage for job records.
//!
//! The [`JobStore`] trait defines the persistence layer for jobs. It is the
//! only shared mutable resource in the engine; every invocation re-derives
//! its state from here, which is what makes short-lived stateless chunk
//! invocations safe to chain.
//!
//! ## Design Principles
//!
//! - **Single-statement mutations**: every write carries the full set of
//!   changed fields; no read-modify-write spans two round trips
//! - **Lease lock as conditional update**: acquisition succeeds iff the
//!   previous lease is absent or stale, and expires by itself
//! - **CAS semantics**: status transitions compare-and-swap on the current
//!   status to prevent races between concurrent invocations

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::id::JobId;
use crate::job::{Job, JobStatus};

/// Result of a lease-lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResult {
    /// The lease was acquired and runs until `now + lock_timeout`.
    Acquired,
    /// Another invocation holds a live lease.
    Held {
        /// When the current lease expires on its own.
        until: DateTime<Utc>,
    },
    /// The job does not exist.
    NotFound,
}

impl LockResult {
    /// Returns true if the lock was acquired.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired)
    }
}

/// Result of a compare-and-swap status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// Transition applied.
    Success,
    /// Job not found.
    NotFound,
    /// Current status didn't match the expected value.
    StatusMismatch {
        /// The actual status that was found.
        actual: JobStatus,
    },
}

impl CasResult {
    /// Returns true if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A requested status transition with its side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Target status.
    pub target: JobStatus,
    /// Error message to record, if any.
    pub error_message: Option<String>,
    /// Clear `error_message` and `consecutive_errors` (the resume path).
    pub clear_error: bool,
}

impl StatusChange {
    /// A plain transition with no error bookkeeping.
    #[must_use]
    pub const fn to(target: JobStatus) -> Self {
        Self {
            target,
            error_message: None,
            clear_error: false,
        }
    }

    /// Attaches an error message to the transition.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Clears error state as part of the transition.
    #[must_use]
    pub const fn clearing_error(mut self) -> Self {
        self.clear_error = true;
        self
    }
}

/// The full set of changes committed after one chunk.
///
/// Applied as a single atomic update so a crash between items can never
/// leave half-advanced counters behind: either the whole chunk committed
/// or none of it did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkCommit {
    /// Items actually attempted this chunk; the cursor advances by this.
    pub items_attempted: u64,
    /// Items that succeeded.
    pub succeeded: u64,
    /// Items that failed.
    pub failed: u64,
    /// Items that completed the enrichment stage.
    pub enriched: u64,
    /// Items that completed the annotation stage.
    pub annotated: u64,
    /// Quality bucket counts to merge into the job histogram.
    pub quality_buckets: BTreeMap<String, u64>,
    /// New value of the persisted consecutive-error counter.
    pub consecutive_errors: u32,
    /// Status transition to apply with the commit, if any.
    pub status_change: Option<StatusChange>,
}

/// Storage abstraction for job records.
///
/// Implementations must provide durability appropriate for the deployment
/// (in-memory for tests, a SQL row store in production) and honor the
/// atomicity notes on each method.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a newly created job.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Gets a job by ID. Returns `None` if it does not exist.
    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Attempts to acquire the job's active lease.
    ///
    /// This is a single conditional update: set `locked_until = now +
    /// lock_timeout` and refresh `last_activity_at` iff the previous lease
    /// is absent or already expired. Success is determined by whether the
    /// update applied. A well-behaved holder releases via
    /// [`release_lock`](Self::release_lock) or [`commit_chunk`](Self::commit_chunk)
    /// when its chunk ends; a crashed holder's lease expires on its own, so
    /// the job can never be wedged permanently.
    ///
    /// On the first successful acquisition of a `Pending` job the same
    /// update moves it to `Running` and stamps `started_at`.
    ///
    /// `force` bypasses the expiry check for manual operator recovery.
    async fn try_acquire(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
        lock_timeout: Duration,
        force: bool,
    ) -> Result<LockResult>;

    /// Releases the active lease without committing a chunk.
    ///
    /// Used by chunk invocations that exit early (pause observed, cancel
    /// finalized, provider failure). A no-op for unknown or unlocked jobs.
    async fn release_lock(&self, job_id: JobId) -> Result<()>;

    /// Atomically transitions job status if the current status matches.
    ///
    /// Applies the transition's side effects in the same update: terminal
    /// targets stamp `completed_at`, `error_message` is set or cleared per
    /// the [`StatusChange`].
    ///
    /// # Errors
    /// Returns [`crate::error::Error::InvalidStatusTransition`] if the
    /// expected status matches but the state machine forbids the target.
    async fn cas_status(
        &self,
        job_id: JobId,
        expected: JobStatus,
        change: StatusChange,
        now: DateTime<Utc>,
    ) -> Result<CasResult>;

    /// Flips `cancel_requested` and applies the matching status move in one
    /// update: `Running -> Cancelling`, `Pending`/`Paused` -> `Cancelled`
    /// immediately (nothing is in flight). Terminal jobs and jobs already
    /// `Cancelling` are left as they are.
    ///
    /// Returns the resulting status, or `None` if the job does not exist.
    async fn request_cancel(&self, job_id: JobId, now: DateTime<Utc>)
        -> Result<Option<JobStatus>>;

    /// Commits the results of one chunk as a single atomic update.
    ///
    /// Advances the cursor by `items_attempted`, folds all counters and the
    /// quality histogram, increments `chunks_processed`, refreshes
    /// `last_activity_at`, releases the lease, stores the consecutive-error
    /// counter, and applies the optional status change.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::JobNotFound`] if the job is missing,
    /// or a storage error if the commit would violate counter invariants.
    async fn commit_chunk(
        &self,
        job_id: JobId,
        commit: &ChunkCommit,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Gets all jobs whose status is in `statuses`, ordered by creation.
    async fn get_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    /// Gets `Running` jobs whose `last_activity_at` is older than
    /// `now - threshold`. Jobs with recent activity are never returned,
    /// however slow they are.
    async fn get_orphaned_jobs(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Vec<Job>>;

    /// Records that one item finished processing at `at`.
    ///
    /// Feeds the live metrics window; independent of the job counters,
    /// which only move once per chunk.
    async fn record_item_activity(&self, job_id: JobId, at: DateTime<Utc>) -> Result<()>;

    /// Item completion timestamps at or after `since`, ascending.
    async fn item_activity(&self, job_id: JobId, since: DateTime<Utc>)
        -> Result<Vec<DateTime<Utc>>>;

    /// The most recent item completion timestamp, if any.
    async fn most_recent_item_activity(&self, job_id: JobId) -> Result<Option<DateTime<Utc>>>;
}
