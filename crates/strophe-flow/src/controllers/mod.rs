//! Control-plane components layered over the job store.
//!
//! Each controller is a thin, stateless wrapper around store queries and
//! conditional updates; none of them holds memory of its own, so any number
//! of concurrent callers see one consistent source of truth.
//!
//! - [`lifecycle`]: pause / resume / cancel, enforcing the status machine
//! - [`live`]: read-only throughput, ETA, and liveness snapshots
//! - [`sequence`]: drives an ordered list of partitions, one job at a time
//! - [`reaper`]: fails `Running` jobs whose heartbeat went stale

pub mod lifecycle;
pub mod live;
pub mod reaper;
pub mod sequence;

pub use lifecycle::LifecycleController;
pub use live::{LiveMetricsController, LiveMetricsSnapshot};
pub use reaper::OrphanReaper;
pub use sequence::{SequenceController, SequenceStatus, SeqStartOutcome};
