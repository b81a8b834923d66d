//! The engine facade.
//!
//! [`FlowService`] wires the store, provider, processor, and scheduler into
//! one entry point and exposes the operations a host (CLI, HTTP layer, cron
//! target) calls. Every operation is safe to invoke redundantly or
//! concurrently; correctness is mediated entirely through the job store.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::chunk::{ChunkReport, ChunkRunner};
use crate::config::{validate_chunk_size, EngineConfig};
use crate::controllers::{
    LifecycleController, LiveMetricsController, LiveMetricsSnapshot, OrphanReaper,
    SeqStartOutcome, SequenceController, SequenceStatus,
};
use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::{Job, JobScope, JobStatus, StageSkips};
use crate::metrics::names as metric_names;
use crate::provider::{ItemProcessor, WorkItemProvider};
use crate::scheduler::ContinuationScheduler;
use crate::store::JobStore;

/// Per-job options for [`FlowService::create_and_start`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Overrides the configured default chunk size for this job.
    pub chunk_size: Option<u32>,
    /// Pipeline-stage skip flags, passed through to the processor.
    pub skips: StageSkips,
}

impl CreateOptions {
    /// Default options: configured chunk size, no stages skipped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a per-job chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Sets the stage skip flags.
    #[must_use]
    pub const fn with_skips(mut self, skips: StageSkips) -> Self {
        self.skips = skips;
        self
    }
}

/// Facade over the whole engine.
pub struct FlowService {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    provider: Arc<dyn WorkItemProvider>,
    scheduler: Arc<dyn ContinuationScheduler>,
    runner: ChunkRunner,
    lifecycle: LifecycleController,
    live: LiveMetricsController,
    sequence: SequenceController,
    reaper: OrphanReaper,
}

impl FlowService {
    /// Builds a service from validated configuration and collaborators.
    ///
    /// `partitions` is the ordered list the sequence operations drive; pass
    /// an empty list if sequences are not used.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        provider: Arc<dyn WorkItemProvider>,
        processor: Arc<dyn ItemProcessor>,
        scheduler: Arc<dyn ContinuationScheduler>,
        partitions: Vec<String>,
    ) -> Result<Self> {
        config.validate()?;

        let runner = ChunkRunner::new(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&provider),
            processor,
        );
        let lifecycle = LifecycleController::new(Arc::clone(&store));
        let live = LiveMetricsController::new(Arc::clone(&store), config.alive_threshold);
        let sequence = SequenceController::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            partitions,
            config.chunk_size,
        );
        let reaper = OrphanReaper::new(Arc::clone(&store), config.orphan_threshold);

        Ok(Self {
            config,
            store,
            provider,
            scheduler,
            runner,
            lifecycle,
            live,
            sequence,
            reaper,
        })
    }

    /// Creates a job for `scope` and schedules its first chunk.
    ///
    /// The job is sized by asking the provider for a pending-item count; a
    /// scope that requires a filter (partition or entity) must carry one,
    /// and a global scope must not.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a bad chunk size or mismatched
    /// scope filter, and provider errors from the sizing count.
    pub async fn create_and_start(
        &self,
        scope: JobScope,
        scope_filter: Option<String>,
        options: CreateOptions,
    ) -> Result<JobId> {
        if scope.requires_filter() != scope_filter.is_some() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "scope {scope:?} {} a scope filter",
                    if scope.requires_filter() {
                        "requires"
                    } else {
                        "does not take"
                    }
                ),
            });
        }

        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);
        validate_chunk_size(chunk_size)?;

        let total_items = self
            .provider
            .count(scope, scope_filter.as_deref())
            .await?;
        let job = Job::new(scope, scope_filter, total_items, chunk_size, options.skips);
        let job_id = job.id;
        self.store.insert_job(&job).await?;
        info!(job.id = %job_id, ?scope, total_items, chunk_size, "job created");

        // First chunk runs via the same continuation path as every other.
        self.scheduler
            .schedule(job_id, std::time::Duration::ZERO)
            .await?;

        Ok(job_id)
    }

    /// Runs exactly one chunk cycle for a job and, when work remains,
    /// schedules the next continuation.
    ///
    /// Redundant calls are harmless: a terminal, paused, or concurrently
    /// locked job is reported without side effects.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job. Ordinary item and
    /// provider failures are absorbed into the report.
    pub async fn continue_job(&self, job_id: JobId) -> Result<ChunkReport> {
        self.run_and_chain(job_id, false).await
    }

    /// Operator variant of [`continue_job`](Self::continue_job) that seizes
    /// the lease even if another holder looks live. Never used by automated
    /// continuation.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job.
    pub async fn force_continue(&self, job_id: JobId) -> Result<ChunkReport> {
        warn!(job.id = %job_id, "force-continuing past the lease check");
        self.run_and_chain(job_id, true).await
    }

    async fn run_and_chain(&self, job_id: JobId, force: bool) -> Result<ChunkReport> {
        let report = self.runner.run_chunk(job_id, force).await?;
        if report.wants_continuation() {
            self.scheduler
                .schedule(job_id, self.config.continuation_delay)
                .await?;
            counter!(metric_names::CONTINUATIONS_TOTAL).increment(1);
        }
        Ok(report)
    }

    /// Pauses a running job. See [`LifecycleController::pause`].
    ///
    /// # Errors
    /// Propagates the lifecycle controller's errors.
    pub async fn pause(&self, job_id: JobId) -> Result<JobStatus> {
        self.lifecycle.pause(job_id).await
    }

    /// Resumes a paused job and schedules the next chunk.
    ///
    /// # Errors
    /// Propagates the lifecycle controller's errors.
    pub async fn resume(&self, job_id: JobId) -> Result<JobStatus> {
        let status = self.lifecycle.resume(job_id).await?;
        self.scheduler
            .schedule(job_id, self.config.continuation_delay)
            .await?;
        Ok(status)
    }

    /// Requests cancellation. See [`LifecycleController::cancel`].
    ///
    /// # Errors
    /// Propagates the lifecycle controller's errors.
    pub async fn cancel(&self, job_id: JobId) -> Result<JobStatus> {
        self.lifecycle.cancel(job_id).await
    }

    /// Full snapshot of a job record.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job.
    pub async fn get_status(&self, job_id: JobId) -> Result<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound { job_id })
    }

    /// Jobs currently in any of `statuses`, oldest first.
    ///
    /// # Errors
    /// Returns storage errors from the query.
    pub async fn list_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        self.store.get_jobs_by_status(statuses).await
    }

    /// Live throughput and liveness for a job.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job.
    pub async fn get_live_metrics(&self, job_id: JobId) -> Result<LiveMetricsSnapshot> {
        self.live.snapshot(job_id).await
    }

    /// Starts the next sequence partition (or `partition` explicitly) and
    /// schedules its first chunk. Reaps orphans first so a stalled job from
    /// a previous run cannot block the sequence forever.
    ///
    /// # Errors
    /// Propagates sequence controller, reaper, and scheduler errors.
    pub async fn seq_start(&self, partition: Option<&str>) -> Result<SeqStartOutcome> {
        self.reaper.reap().await?;
        let outcome = self.sequence.start(partition).await?;
        self.drive_sequence_outcome(&outcome).await?;
        Ok(outcome)
    }

    /// Cancels the current sequence partition and starts the next.
    ///
    /// # Errors
    /// Propagates sequence controller, reaper, and scheduler errors.
    pub async fn seq_skip(&self) -> Result<SeqStartOutcome> {
        self.reaper.reap().await?;
        let outcome = self.sequence.skip().await?;
        self.drive_sequence_outcome(&outcome).await?;
        Ok(outcome)
    }

    /// Requests cancellation across the whole sequence.
    ///
    /// # Errors
    /// Propagates sequence controller errors.
    pub async fn seq_stop(&self) -> Result<usize> {
        self.sequence.stop().await
    }

    /// Current, completed, and pending-count view of the sequence.
    ///
    /// # Errors
    /// Propagates sequence controller and reaper errors.
    pub async fn seq_status(&self) -> Result<SequenceStatus> {
        self.reaper.reap().await?;
        self.sequence.status().await
    }

    /// Runs the orphan reaper on demand; returns how many jobs were failed.
    ///
    /// # Errors
    /// Returns storage errors from the reap queries.
    pub async fn cleanup(&self) -> Result<usize> {
        self.reaper.reap().await
    }

    async fn drive_sequence_outcome(&self, outcome: &SeqStartOutcome) -> Result<()> {
        if let Some(job_id) = outcome.job_to_drive() {
            self.scheduler
                .schedule(job_id, std::time::Duration::ZERO)
                .await?;
        }
        Ok(())
    }
}
