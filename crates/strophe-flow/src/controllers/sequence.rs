//! Sequence orchestration over an ordered list of partitions.
//!
//! The orchestrator drives one job at a time through a fixed partition
//! order (e.g. the corpora of a catalog, largest first). It keeps no state
//! of its own: "which partition is current" and "which are done" are
//! recomputed from the job store on every call, so there is never a second
//! source of truth to drift out of sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::{Job, JobScope, JobStatus, StageSkips};
use crate::provider::WorkItemProvider;
use crate::store::JobStore;

/// Statuses that make a partition's job "current" in the sequence.
const ACTIVE_STATUSES: [JobStatus; 3] =
    [JobStatus::Pending, JobStatus::Running, JobStatus::Paused];

/// Outcome of a sequence start or skip call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqStartOutcome {
    /// A new job was created for this partition; it still needs driving.
    Started {
        /// Partition the new job covers.
        partition: String,
        /// The created job.
        job_id: JobId,
    },
    /// A job for some partition is already active; nothing was created.
    AlreadyActive {
        /// Partition of the active job.
        partition: String,
        /// The active job.
        job_id: JobId,
    },
    /// Every partition already has a `Completed` job.
    Exhausted,
}

impl SeqStartOutcome {
    /// The job to drive next, if this outcome produced or found one.
    #[must_use]
    pub fn job_to_drive(&self) -> Option<JobId> {
        match self {
            Self::Started { job_id, .. } => Some(*job_id),
            Self::AlreadyActive { .. } | Self::Exhausted => None,
        }
    }
}

/// Point-in-time view of the whole sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceStatus {
    /// The partition currently being worked, with its job.
    pub current: Option<CurrentPartition>,
    /// Partitions with a `Completed` job, in sequence order.
    pub completed: Vec<String>,
    /// Pending item count per partition, as reported by the provider.
    pub pending_counts: BTreeMap<String, u64>,
}

/// The active partition within a [`SequenceStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentPartition {
    /// Partition identifier.
    pub partition: String,
    /// Its active job.
    pub job_id: JobId,
    /// The job's status.
    pub status: JobStatus,
}

/// Drives partition jobs in a fixed order, one at a time.
pub struct SequenceController {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn WorkItemProvider>,
    partitions: Vec<String>,
    chunk_size: u32,
}

impl SequenceController {
    /// Creates a controller over `partitions`, in the order given.
    ///
    /// `chunk_size` is applied to every job the sequence creates.
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn WorkItemProvider>,
        partitions: Vec<String>,
        chunk_size: u32,
    ) -> Self {
        Self {
            store,
            provider,
            partitions,
            chunk_size,
        }
    }

    /// The partitions this sequence drives, in order.
    #[must_use]
    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    /// Starts the next partition job, or reports the one already active.
    ///
    /// With `requested` set, that partition is started regardless of its
    /// place in the order (it must still be part of the sequence). With no
    /// request, the first partition in order without a `Completed` job is
    /// chosen; a partition whose previous job was cancelled or failed is
    /// eligible again.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] for a partition outside the
    /// sequence, and provider errors from sizing the new job.
    pub async fn start(&self, requested: Option<&str>) -> Result<SeqStartOutcome> {
        if let Some(active) = self.current_job().await? {
            return Ok(already_active(&active));
        }

        let partition = match requested {
            Some(partition) => {
                if !self.partitions.iter().any(|p| p == partition) {
                    return Err(Error::InvalidConfig {
                        message: format!("partition {partition} is not part of the sequence"),
                    });
                }
                Some(partition.to_string())
            }
            None => self.next_eligible(None).await?,
        };

        match partition {
            Some(partition) => self.start_partition(partition).await,
            None => Ok(SeqStartOutcome::Exhausted),
        }
    }

    /// Cancels the current partition job and starts the next eligible one.
    ///
    /// The skipped partition is excluded from "next eligible" even though
    /// its cancelled job does not count as completed; without that the skip
    /// would immediately restart the same partition.
    ///
    /// # Errors
    /// Returns storage and provider errors from the underlying calls.
    pub async fn skip(&self) -> Result<SeqStartOutcome> {
        let Some(active) = self.current_job().await? else {
            return Ok(SeqStartOutcome::Exhausted);
        };

        let skipped = active.scope_filter.clone().unwrap_or_default();
        self.store.request_cancel(active.id, Utc::now()).await?;
        info!(partition = %skipped, job.id = %active.id, "skipping partition");

        match self.next_eligible(Some(&skipped)).await? {
            Some(partition) => self.start_partition(partition).await,
            None => Ok(SeqStartOutcome::Exhausted),
        }
    }

    /// Requests cancellation of every non-terminal job in the sequence.
    ///
    /// Returns how many jobs had cancellation requested.
    ///
    /// # Errors
    /// Returns storage errors from the underlying queries.
    pub async fn stop(&self) -> Result<usize> {
        let statuses = [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Paused,
            JobStatus::Cancelling,
        ];
        let jobs = self.store.get_jobs_by_status(&statuses).await?;
        let mut cancelled = 0_usize;
        for job in jobs.iter().filter(|job| self.belongs_to_sequence(job)) {
            self.store.request_cancel(job.id, Utc::now()).await?;
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(jobs = cancelled, "sequence stop requested");
        }
        Ok(cancelled)
    }

    /// Computes the sequence status: current partition, completed set, and
    /// per-partition pending item counts.
    ///
    /// # Errors
    /// Returns storage and provider errors from the underlying queries.
    pub async fn status(&self) -> Result<SequenceStatus> {
        let current = self.current_job().await?.map(|job| CurrentPartition {
            partition: job.scope_filter.clone().unwrap_or_default(),
            job_id: job.id,
            status: job.status,
        });

        let completed = self.completed_partitions().await?;

        let mut pending_counts = BTreeMap::new();
        for partition in &self.partitions {
            let count = self
                .provider
                .count(JobScope::Partition, Some(partition))
                .await?;
            pending_counts.insert(partition.clone(), count);
        }

        Ok(SequenceStatus {
            current,
            completed,
            pending_counts,
        })
    }

    /// The oldest active partition job, if any.
    async fn current_job(&self) -> Result<Option<Job>> {
        let jobs = self.store.get_jobs_by_status(&ACTIVE_STATUSES).await?;
        Ok(jobs.into_iter().find(|job| self.belongs_to_sequence(job)))
    }

    /// Partitions with a `Completed` job, in sequence order.
    async fn completed_partitions(&self) -> Result<Vec<String>> {
        let jobs = self
            .store
            .get_jobs_by_status(&[JobStatus::Completed])
            .await?;
        let done: Vec<&str> = jobs
            .iter()
            .filter(|job| self.belongs_to_sequence(job))
            .filter_map(|job| job.scope_filter.as_deref())
            .collect();
        Ok(self
            .partitions
            .iter()
            .filter(|partition| done.contains(&partition.as_str()))
            .cloned()
            .collect())
    }

    /// First partition in order without a `Completed` job, excluding `skip`.
    async fn next_eligible(&self, skip: Option<&str>) -> Result<Option<String>> {
        let completed = self.completed_partitions().await?;
        Ok(self
            .partitions
            .iter()
            .find(|partition| {
                !completed.contains(partition) && Some(partition.as_str()) != skip
            })
            .cloned())
    }

    async fn start_partition(&self, partition: String) -> Result<SeqStartOutcome> {
        let total_items = self
            .provider
            .count(JobScope::Partition, Some(&partition))
            .await?;
        let job = Job::new(
            JobScope::Partition,
            Some(partition.clone()),
            total_items,
            self.chunk_size,
            StageSkips::default(),
        );
        self.store.insert_job(&job).await?;
        info!(partition = %partition, job.id = %job.id, total_items, "sequence started partition");
        Ok(SeqStartOutcome::Started {
            partition,
            job_id: job.id,
        })
    }

    fn belongs_to_sequence(&self, job: &Job) -> bool {
        job.scope == JobScope::Partition
            && job
                .scope_filter
                .as_deref()
                .is_some_and(|filter| self.partitions.iter().any(|p| p == filter))
    }
}

fn already_active(job: &Job) -> SeqStartOutcome {
    SeqStartOutcome::AlreadyActive {
        partition: job.scope_filter.clone().unwrap_or_default(),
        job_id: job.id,
    }
}
