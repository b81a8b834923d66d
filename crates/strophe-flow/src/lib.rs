//! # strophe-flow
//!
//! Resumable chunked batch-job engine for the Strophe lyrics pipeline.
//!
//! This crate implements the enrichment orchestration domain, providing:
//!
//! - **Chunked Execution**: Jobs advance one bounded chunk at a time, so any
//!   single invocation stays short-lived and cheap to retry
//! - **Lease Locking**: At most one chunk invocation is active per job,
//!   enforced by a self-expiring lease in the job store
//! - **Lifecycle Control**: Pause, resume, and cooperative cancel through a
//!   strict status state machine
//! - **Self-Healing**: Lost continuations are caught by an orphan reaper;
//!   re-driving a job is always safe because invocations hold no state
//!
//! ## Core Concepts
//!
//! - **Job**: A cursor over an ordered collection of work items, plus the
//!   counters that survive across invocations
//! - **Chunk**: One bounded slice of items processed under a single lease
//! - **Sequence**: An ordered list of partitions (corpora) processed by one
//!   job at a time
//!
//! ## Guarantees
//!
//! - **Resumable**: A job interrupted anywhere resumes at its cursor with no
//!   item skipped or double-counted
//! - **Cooperative**: Cancellation lands between items, never mid-item
//! - **Bounded failure**: A run of consecutive item failures trips a circuit
//!   breaker and pauses the job instead of burning through the collection
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use strophe_flow::config::EngineConfig;
//! use strophe_flow::error::Result;
//! use strophe_flow::job::JobScope;
//! use strophe_flow::scheduler::memory::RecordingScheduler;
//! use strophe_flow::service::{CreateOptions, FlowService};
//! use strophe_flow::store::memory::InMemoryJobStore;
//! # use strophe_flow::provider::{ItemOutcome, ItemProcessor, WorkItem, WorkItemProvider};
//! # use strophe_flow::job::StageSkips;
//! # struct P; struct X;
//! # #[async_trait::async_trait]
//! # impl WorkItemProvider for P {
//! #     async fn fetch(&self, _: JobScope, _: Option<&str>, _: u64, _: u32) -> Result<Vec<WorkItem>> { Ok(vec![]) }
//! #     async fn count(&self, _: JobScope, _: Option<&str>) -> Result<u64> { Ok(0) }
//! # }
//! # #[async_trait::async_trait]
//! # impl ItemProcessor for X {
//! #     async fn process(&self, _: &WorkItem, _: StageSkips) -> ItemOutcome { ItemOutcome::success() }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let scheduler = Arc::new(RecordingScheduler::new());
//! let service = FlowService::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryJobStore::new()),
//!     Arc::new(P),
//!     Arc::new(X),
//!     scheduler.clone(),
//!     vec!["corpus-a".to_string(), "corpus-b".to_string()],
//! )?;
//!
//! // Create a job over the whole collection and drive it chunk by chunk.
//! let job_id = service
//!     .create_and_start(JobScope::Global, None, CreateOptions::new())
//!     .await?;
//! while let Some(next) = scheduler.take()? {
//!     service.continue_job(next.job_id).await?;
//! }
//! let job = service.get_status(job_id).await?;
//! println!("{}: {}/{} items", job.status, job.processed_count, job.total_items);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod chunk;
pub mod config;
pub mod controllers;
pub mod error;
pub mod id;
pub mod job;
pub mod metrics;
pub mod provider;
pub mod scheduler;
pub mod service;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::chunk::{ChunkOutcome, ChunkReport, ChunkRunner};
    pub use crate::config::EngineConfig;
    pub use crate::controllers::{
        LifecycleController, LiveMetricsController, LiveMetricsSnapshot, OrphanReaper,
        SeqStartOutcome, SequenceController, SequenceStatus,
    };
    pub use crate::error::{Error, Result};
    pub use crate::id::JobId;
    pub use crate::job::{Job, JobScope, JobStatus, StageSkips};
    pub use crate::provider::{ItemOutcome, ItemProcessor, WorkItem, WorkItemProvider};
    pub use crate::scheduler::ContinuationScheduler;
    pub use crate::service::{CreateOptions, FlowService};
    pub use crate::store::{CasResult, JobStore, LockResult, StatusChange};
}
