//! Job records and the job status state machine.
//!
//! A [`Job`] is one unit of sequential batch work: a cursor over an ordered
//! collection of items, plus counters that survive across the short-lived
//! invocations that drive it. The record is the only shared mutable state
//! in the engine; everything else is derived from it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// Which slice of the overall item collection a job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobScope {
    /// Every item in the collection.
    Global,
    /// One partition (corpus); `scope_filter` holds the partition ID.
    Partition,
    /// One entity (e.g. a single artist); `scope_filter` holds its ID.
    Entity,
}

impl JobScope {
    /// Returns true if this scope requires a non-null filter.
    #[must_use]
    pub const fn requires_filter(&self) -> bool {
        !matches!(self, Self::Global)
    }
}

/// Lifecycle status of a job.
///
/// Transitions are restricted to the state machine encoded in
/// [`JobStatus::can_transition_to`]; the store's conditional status update
/// and the lifecycle controller both enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but never locked.
    Pending,
    /// Actively being driven by chunk invocations.
    Running,
    /// Suspended; requires an explicit resume.
    Paused,
    /// Cancellation requested while items may be in flight.
    Cancelling,
    /// Terminal: cancelled at a cooperative checkpoint.
    Cancelled,
    /// Terminal: provider exhausted, all items attempted.
    Completed,
    /// Terminal: orphaned or otherwise unrecoverable.
    Failed,
}

impl JobStatus {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    /// Returns true if the transition `self -> target` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            // First lock acquisition, or cancel before anything ran.
            (Self::Pending, Self::Running | Self::Cancelled)
                // Chunk boundary outcomes plus operator actions.
                | (
                    Self::Running,
                    Self::Paused
                        | Self::Cancelling
                        | Self::Cancelled
                        | Self::Completed
                        | Self::Failed
                )
                // Resume, or immediate cancel with nothing in flight.
                | (Self::Paused, Self::Running | Self::Cancelled)
                // The runner observes the pending cancel at its next checkpoint.
                | (Self::Cancelling, Self::Cancelled)
        )
    }

    /// Short lowercase name, matching the serialized form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed pipeline-stage skip flags.
///
/// Passed through unchanged to the item processor. Modeled as a closed
/// struct validated at job creation rather than a free-form metadata blob,
/// so a typo'd flag fails at the boundary instead of being silently ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSkips {
    /// Skip the metadata enrichment stage.
    pub skip_enrichment: bool,
    /// Skip the linguistic annotation stage.
    pub skip_annotation: bool,
    /// Skip the quality scoring stage.
    pub skip_scoring: bool,
}

impl StageSkips {
    /// Returns true if every stage is skipped.
    #[must_use]
    pub const fn skips_everything(&self) -> bool {
        self.skip_enrichment && self.skip_annotation && self.skip_scoring
    }
}

/// Durable record of one batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque identifier, immutable after creation.
    pub id: JobId,
    /// Which slice of the collection this job covers.
    pub scope: JobScope,
    /// Partition or entity ID when the scope requires one.
    pub scope_filter: Option<String>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Total items in scope, fixed at creation.
    pub total_items: u64,
    /// Next offset to read from the work item provider.
    pub cursor: u64,
    /// Items attempted so far. Always `succeeded_count + failed_count`.
    pub processed_count: u64,
    /// Items that succeeded.
    pub succeeded_count: u64,
    /// Items that failed.
    pub failed_count: u64,
    /// Items that completed the enrichment stage.
    pub enriched_count: u64,
    /// Items that completed the annotation stage.
    pub annotated_count: u64,
    /// Aggregate quality bucket counts (bucket label -> item count).
    pub quality_histogram: BTreeMap<String, u64>,
    /// Items per chunk, fixed at creation.
    pub chunk_size: u32,
    /// Chunks committed so far; monotonically increasing.
    pub chunks_processed: u64,
    /// Consecutive item failures carried across chunk boundaries.
    ///
    /// Persisted so the circuit breaker still trips when a failure run
    /// straddles two invocations. Reset by a successful item or by resume.
    pub consecutive_errors: u32,
    /// Updated by every successful lock acquisition and chunk commit; the
    /// orphan-detection heartbeat.
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Lease expiry for the active-chunk lock. Cleared when a chunk
    /// invocation exits; left to expire on its own if the holder crashed.
    pub locked_until: Option<DateTime<Utc>>,
    /// When the first chunk started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Cooperative cancellation flag, observed between items.
    pub cancel_requested: bool,
    /// Why the job is `Failed` or breaker-`Paused`, if it is.
    pub error_message: Option<String>,
    /// Pipeline-stage skip flags, passed through to the processor.
    pub skips: StageSkips,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new `Pending` job.
    #[must_use]
    pub fn new(
        scope: JobScope,
        scope_filter: Option<String>,
        total_items: u64,
        chunk_size: u32,
        skips: StageSkips,
    ) -> Self {
        Self {
            id: JobId::generate(),
            scope,
            scope_filter,
            status: JobStatus::Pending,
            total_items,
            cursor: 0,
            processed_count: 0,
            succeeded_count: 0,
            failed_count: 0,
            enriched_count: 0,
            annotated_count: 0,
            quality_histogram: BTreeMap::new(),
            chunk_size,
            chunks_processed: 0,
            consecutive_errors: 0,
            last_activity_at: None,
            locked_until: None,
            started_at: None,
            completed_at: None,
            cancel_requested: false,
            error_message: None,
            skips,
            created_at: Utc::now(),
        }
    }

    /// Items not yet attempted.
    #[must_use]
    pub const fn remaining_items(&self) -> u64 {
        self.total_items.saturating_sub(self.cursor)
    }

    /// Returns true if the counters satisfy the engine invariants.
    ///
    /// Checked after every chunk commit; a violation indicates a storage
    /// bug, not a user error.
    #[must_use]
    pub const fn counters_consistent(&self) -> bool {
        self.cursor <= self.total_items
            && self.processed_count == self.succeeded_count + self.failed_count
    }
}
