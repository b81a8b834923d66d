//! Chunk execution: one bounded slice of a job, run to completion or early exit.
//!
//! A [`ChunkRunner`] invocation is the unit of forward progress. It owns no
//! state between calls; everything is re-derived from the job record, which
//! is what makes redundant or re-driven invocations safe:
//!
//! 1. acquire the job's lease lock (losing it is a normal outcome)
//! 2. observe pending cancellation or pause before touching any item
//! 3. pull one chunk from the provider at `offset = cursor`
//! 4. process items in order, re-checking cancellation **between** items
//! 5. trip the circuit breaker on a run of consecutive failures
//! 6. commit every counter change in a single atomic update

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::JobStatus;
use crate::metrics::{labels as metric_labels, names as metric_names, TimingGuard};
use crate::provider::{ItemProcessor, WorkItemProvider};
use crate::store::{ChunkCommit, JobStore, LockResult, StatusChange};

/// How a chunk invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Another invocation holds the lease; nothing was touched.
    LockNotAcquired,
    /// The job was already terminal when the invocation looked at it.
    AlreadyTerminal,
    /// The job is paused; an explicit resume is required.
    PausedBeforeChunk,
    /// A pending cancellation was finalized at this checkpoint.
    Cancelled,
    /// The provider reported no more work; the job is complete.
    Completed,
    /// The circuit breaker tripped; the job is paused with an error message.
    CircuitBroken,
    /// Items were processed and more work remains.
    Continued,
    /// The provider call itself failed; the cursor did not move and the job
    /// stays `Running` for the next continuation to retry.
    ProviderError {
        /// Description of the provider failure.
        message: String,
    },
}

impl ChunkOutcome {
    /// Stable label for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockNotAcquired => "lock_not_acquired",
            Self::AlreadyTerminal => "already_terminal",
            Self::PausedBeforeChunk => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::CircuitBroken => "circuit_broken",
            Self::Continued => "continued",
            Self::ProviderError { .. } => "provider_error",
        }
    }
}

/// Result of one chunk invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReport {
    /// The job this chunk belonged to.
    pub job_id: JobId,
    /// How the invocation ended.
    pub outcome: ChunkOutcome,
    /// Items attempted this chunk.
    pub items_processed: u64,
    /// Items that succeeded this chunk.
    pub succeeded: u64,
    /// Items that failed this chunk.
    pub failed: u64,
    /// Job status after the invocation.
    pub status: JobStatus,
}

impl ChunkReport {
    fn new(job_id: JobId, outcome: ChunkOutcome, status: JobStatus) -> Self {
        Self {
            job_id,
            outcome,
            items_processed: 0,
            succeeded: 0,
            failed: 0,
            status,
        }
    }

    /// Returns true if the job reached `Completed` this invocation.
    #[must_use]
    pub fn is_job_complete(&self) -> bool {
        self.outcome == ChunkOutcome::Completed
    }

    /// Returns true if another invocation should be scheduled.
    ///
    /// Provider failures count: the chunk was abandoned without advancing
    /// the cursor, and the next continuation simply retries it.
    #[must_use]
    pub fn wants_continuation(&self) -> bool {
        matches!(
            self.outcome,
            ChunkOutcome::Continued | ChunkOutcome::ProviderError { .. }
        )
    }
}

/// Executes exactly one chunk of a job.
pub struct ChunkRunner {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    provider: Arc<dyn WorkItemProvider>,
    processor: Arc<dyn ItemProcessor>,
}

impl ChunkRunner {
    /// Creates a chunk runner over the given collaborators.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn WorkItemProvider>,
        processor: Arc<dyn ItemProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            processor,
        }
    }

    /// Runs one chunk for `job_id`.
    ///
    /// `force` bypasses the lease staleness check; it exists for operator
    /// recovery and must never be set by automated continuation.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job. Item and provider
    /// failures are absorbed into the report, never raised.
    pub async fn run_chunk(&self, job_id: JobId, force: bool) -> Result<ChunkReport> {
        let _timing = TimingGuard::new(|duration| {
            histogram!(metric_names::CHUNK_DURATION_SECONDS).record(duration.as_secs_f64());
        });

        let now = Utc::now();
        let lock_timeout = chrono::Duration::from_std(self.config.lock_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(90));

        let report = match self
            .store
            .try_acquire(job_id, now, lock_timeout, force)
            .await?
        {
            LockResult::Acquired => self.run_locked_chunk(job_id).await?,
            LockResult::Held { until } => {
                // Normal concurrent-invocation outcome, not an error.
                debug!(job.id = %job_id, lease.until = %until, "lease held elsewhere, yielding");
                counter!(metric_names::LOCK_CONTENTION_TOTAL).increment(1);
                let status = self
                    .store
                    .get_job(job_id)
                    .await?
                    .map_or(JobStatus::Running, |job| job.status);
                ChunkReport::new(job_id, ChunkOutcome::LockNotAcquired, status)
            }
            LockResult::NotFound => return Err(Error::JobNotFound { job_id }),
        };

        counter!(
            metric_names::CHUNKS_TOTAL,
            metric_labels::OUTCOME => report.outcome.as_str(),
        )
        .increment(1);

        Ok(report)
    }

    /// Chunk body, entered only with the lease held. Every early exit
    /// releases the lease so the next invocation is not blocked behind it.
    async fn run_locked_chunk(&self, job_id: JobId) -> Result<ChunkReport> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound { job_id })?;

        if job.status.is_terminal() {
            self.store.release_lock(job_id).await?;
            return Ok(ChunkReport::new(
                job_id,
                ChunkOutcome::AlreadyTerminal,
                job.status,
            ));
        }

        // Pending cancellation is finalized here, before any item runs.
        if job.cancel_requested {
            self.store
                .cas_status(
                    job_id,
                    job.status,
                    StatusChange::to(JobStatus::Cancelled),
                    Utc::now(),
                )
                .await?;
            self.store.release_lock(job_id).await?;
            return Ok(ChunkReport::new(
                job_id,
                ChunkOutcome::Cancelled,
                JobStatus::Cancelled,
            ));
        }

        if job.status == JobStatus::Paused {
            self.store.release_lock(job_id).await?;
            return Ok(ChunkReport::new(
                job_id,
                ChunkOutcome::PausedBeforeChunk,
                JobStatus::Paused,
            ));
        }

        let items = match self
            .provider
            .fetch(
                job.scope,
                job.scope_filter.as_deref(),
                job.cursor,
                job.chunk_size,
            )
            .await
        {
            Ok(items) => items,
            Err(error) => {
                // Chunk-level failure: abandon without advancing the cursor.
                warn!(job.id = %job_id, %error, "work item provider failed, abandoning chunk");
                self.store.release_lock(job_id).await?;
                return Ok(ChunkReport::new(
                    job_id,
                    ChunkOutcome::ProviderError {
                        message: error.to_string(),
                    },
                    JobStatus::Running,
                ));
            }
        };

        if items.is_empty() {
            self.store
                .cas_status(
                    job_id,
                    JobStatus::Running,
                    StatusChange::to(JobStatus::Completed),
                    Utc::now(),
                )
                .await?;
            self.store.release_lock(job_id).await?;
            debug!(job.id = %job_id, cursor = job.cursor, "provider exhausted, job complete");
            return Ok(ChunkReport::new(
                job_id,
                ChunkOutcome::Completed,
                JobStatus::Completed,
            ));
        }

        let short_read = (items.len() as u64) < u64::from(job.chunk_size);

        let mut commit = ChunkCommit {
            consecutive_errors: job.consecutive_errors,
            ..ChunkCommit::default()
        };
        let mut was_cancelled = false;
        let mut circuit_broken = false;
        let mut last_failure: Option<String> = None;

        for (index, item) in items.iter().enumerate() {
            // Cooperative cancellation: between items, never mid-item.
            if index > 0 {
                let fresh = self
                    .store
                    .get_job(job_id)
                    .await?
                    .ok_or(Error::JobNotFound { job_id })?;
                if fresh.cancel_requested {
                    was_cancelled = true;
                    break;
                }
            }

            let outcome = self.processor.process(item, job.skips).await;
            commit.items_attempted += 1;

            if outcome.success {
                commit.succeeded += 1;
                commit.consecutive_errors = 0;
                if outcome.enriched {
                    commit.enriched += 1;
                }
                if outcome.annotated {
                    commit.annotated += 1;
                }
                if let Some(bucket) = outcome.quality_bucket {
                    *commit.quality_buckets.entry(bucket).or_insert(0) += 1;
                }
                self.store.record_item_activity(job_id, Utc::now()).await?;
            } else {
                commit.failed += 1;
                commit.consecutive_errors += 1;
                last_failure = outcome.failure;
                if commit.consecutive_errors >= self.config.error_threshold {
                    circuit_broken = true;
                    break;
                }
            }

            if !self.config.item_delay.is_zero() && index + 1 < items.len() {
                tokio::time::sleep(self.config.item_delay).await;
            }
        }

        let job_complete = !was_cancelled
            && !circuit_broken
            && (short_read || job.cursor + commit.items_attempted >= job.total_items);

        let outcome = if was_cancelled {
            commit.status_change = Some(StatusChange::to(JobStatus::Cancelled));
            ChunkOutcome::Cancelled
        } else if circuit_broken {
            let message = format!(
                "circuit breaker tripped after {} consecutive failures{}",
                commit.consecutive_errors,
                last_failure
                    .map(|f| format!("; last error: {f}"))
                    .unwrap_or_default()
            );
            warn!(job.id = %job_id, %message, "pausing job");
            commit.status_change = Some(StatusChange::to(JobStatus::Paused).with_error(message));
            ChunkOutcome::CircuitBroken
        } else if job_complete {
            commit.status_change = Some(StatusChange::to(JobStatus::Completed));
            ChunkOutcome::Completed
        } else {
            ChunkOutcome::Continued
        };

        counter!(
            metric_names::ITEMS_TOTAL,
            metric_labels::RESULT => "succeeded",
        )
        .increment(commit.succeeded);
        counter!(
            metric_names::ITEMS_TOTAL,
            metric_labels::RESULT => "failed",
        )
        .increment(commit.failed);

        let report = ChunkReport {
            job_id,
            items_processed: commit.items_attempted,
            succeeded: commit.succeeded,
            failed: commit.failed,
            status: match &outcome {
                ChunkOutcome::Cancelled => JobStatus::Cancelled,
                ChunkOutcome::CircuitBroken => JobStatus::Paused,
                ChunkOutcome::Completed => JobStatus::Completed,
                _ => JobStatus::Running,
            },
            outcome,
        };

        self.store.commit_chunk(job_id, &commit, Utc::now()).await?;

        Ok(report)
    }
}
