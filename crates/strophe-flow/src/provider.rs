//! Collaborator traits at the engine boundary.
//!
//! The engine never looks inside a work item and never performs the
//! enrichment itself; both sides are behind traits:
//!
//! - [`WorkItemProvider`]: yields bounded, stably-ordered slices of work
//! - [`ItemProcessor`]: performs the multi-stage operation on one item
//!
//! Processor failures are communicated as result values, not errors, so the
//! chunk runner can count them without special-casing error types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::job::{JobScope, StageSkips};

/// One unit of work, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier of the underlying item.
    pub id: String,
    /// Collaborator-defined payload, passed through to the processor.
    pub payload: Value,
}

impl WorkItem {
    /// Creates a work item with an empty payload.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Value::Null,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Per-item outcome reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Whether the item as a whole succeeded.
    pub success: bool,
    /// Whether the enrichment stage completed.
    pub enriched: bool,
    /// Whether the annotation stage completed.
    pub annotated: bool,
    /// Quality bucket label assigned by the scoring stage, if any.
    pub quality_bucket: Option<String>,
    /// Failure description when `success` is false.
    pub failure: Option<String>,
}

impl ItemOutcome {
    /// A fully successful outcome with no stage detail.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            success: true,
            enriched: false,
            annotated: false,
            quality_bucket: None,
            failure: None,
        }
    }

    /// A failed outcome with a description.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            enriched: false,
            annotated: false,
            quality_bucket: None,
            failure: Some(reason.into()),
        }
    }

    /// Marks the enrichment stage complete.
    #[must_use]
    pub const fn with_enriched(mut self) -> Self {
        self.enriched = true;
        self
    }

    /// Marks the annotation stage complete.
    #[must_use]
    pub const fn with_annotated(mut self) -> Self {
        self.annotated = true;
        self
    }

    /// Records the quality bucket assigned by scoring.
    #[must_use]
    pub fn with_quality_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.quality_bucket = Some(bucket.into());
        self
    }
}

/// Source of work items for a job's scope.
///
/// ## Ordering contract
///
/// `fetch` must return items in an ordering that is **stable across calls**
/// (e.g. by creation time then id), so that resuming at `offset = cursor`
/// never skips or repeats items as long as the underlying collection is not
/// reordered concurrently. Returning fewer than `limit` items, including
/// zero, signals "no more work from this offset".
///
/// Filtering of already-processed items is the provider's concern, not the
/// engine's; the engine only guarantees stable-offset resumption.
#[async_trait]
pub trait WorkItemProvider: Send + Sync {
    /// Returns the next bounded slice of work for a scope.
    async fn fetch(
        &self,
        scope: JobScope,
        scope_filter: Option<&str>,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<WorkItem>>;

    /// Counts the items currently pending in a scope.
    ///
    /// Used to size new jobs and to report per-partition pending counts.
    async fn count(&self, scope: JobScope, scope_filter: Option<&str>) -> Result<u64>;
}

/// Executes the multi-stage operation on one work item.
///
/// A hung `process` call stalls the chunk; the engine imposes no per-item
/// timeout and relies on the orphan reaper as the coarse safety net.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Processes one item, honoring the job's stage skip flags.
    async fn process(&self, item: &WorkItem, skips: StageSkips) -> ItemOutcome;
}
