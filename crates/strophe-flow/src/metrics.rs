//! Observability metrics for the batch-job engine.
//!
//! Metrics are exposed via the `metrics` crate facade; hosts install their
//! own recorder (Prometheus or otherwise). All calls are no-ops when no
//! recorder is installed, so the engine never pays for observability it
//! isn't asked for.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `strophe_flow_chunks_total` | Counter | `outcome` | Chunk invocations by outcome |
//! | `strophe_flow_chunk_duration_seconds` | Histogram | - | Wall time per chunk |
//! | `strophe_flow_items_total` | Counter | `result` | Items processed by result |
//! | `strophe_flow_lock_contention_total` | Counter | - | Lock acquisitions lost to a live lease |
//! | `strophe_flow_continuations_total` | Counter | - | Continuations scheduled |
//! | `strophe_flow_jobs_reaped_total` | Counter | - | Jobs failed by the orphan reaper |

use std::time::{Duration, Instant};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: chunk invocations by outcome.
    pub const CHUNKS_TOTAL: &str = "strophe_flow_chunks_total";
    /// Histogram: wall time per chunk in seconds.
    pub const CHUNK_DURATION_SECONDS: &str = "strophe_flow_chunk_duration_seconds";
    /// Counter: items processed by result.
    pub const ITEMS_TOTAL: &str = "strophe_flow_items_total";
    /// Counter: lock acquisitions that lost to a live lease.
    pub const LOCK_CONTENTION_TOTAL: &str = "strophe_flow_lock_contention_total";
    /// Counter: continuations scheduled.
    pub const CONTINUATIONS_TOTAL: &str = "strophe_flow_continuations_total";
    /// Counter: jobs failed by the orphan reaper.
    pub const JOBS_REAPED_TOTAL: &str = "strophe_flow_jobs_reaped_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Chunk outcome (completed, continued, paused, cancelled, ...).
    pub const OUTCOME: &str = "outcome";
    /// Item result (succeeded, failed).
    pub const RESULT: &str = "result";
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded_duration = None;

        {
            let _guard = TimingGuard::new(|d| {
                recorded_duration = Some(d);
            });
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(recorded_duration.is_some_and(|d| d >= Duration::from_millis(10)));
    }

    #[test]
    fn timing_guard_elapsed_works() {
        let guard = TimingGuard::new(|_| {});
        std::thread::sleep(Duration::from_millis(5));
        assert!(guard.elapsed() >= Duration::from_millis(5));
    }
}
