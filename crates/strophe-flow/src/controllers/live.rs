//! Live throughput and liveness snapshots.
//!
//! Job counters only move once per chunk commit, possibly minutes apart, so
//! "how fast is this going right now" needs the per-item activity stream
//! instead. This controller is read-only and side-effect-free; a job with no
//! recent items yields rate 0, no ETA, and `is_alive = false` rather than an
//! error.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::id::JobId;
use crate::job::JobStatus;
use crate::store::JobStore;

/// Rate window; throughput is items in this window divided by its minutes.
const RATE_WINDOW_MINUTES: i64 = 5;

/// Point-in-time view of a job's progress and throughput.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMetricsSnapshot {
    /// Job this snapshot describes.
    pub job_id: JobId,
    /// Status at snapshot time.
    pub status: JobStatus,
    /// Total items in scope.
    pub total_items: u64,
    /// Items attempted so far (per committed chunks).
    pub processed_count: u64,
    /// Items that succeeded.
    pub succeeded_count: u64,
    /// Items that failed.
    pub failed_count: u64,
    /// Items not yet attempted.
    pub remaining_items: u64,
    /// Fraction of the job attempted, 0.0 to 100.0.
    pub progress_percent: f64,
    /// Items finished in the last minute.
    pub items_last_minute: u64,
    /// Items finished in the last five minutes.
    pub items_last_5_minutes: u64,
    /// Current throughput in items per minute.
    pub items_per_minute: f64,
    /// Minutes until completion at the current rate; `None` when idle.
    pub eta_minutes: Option<u64>,
    /// Whether an item finished within the alive threshold.
    pub is_alive: bool,
    /// When the most recent item finished, if any ever did.
    pub last_item_at: Option<DateTime<Utc>>,
    /// Breaker or orphan error, when the job is blocked on one.
    pub error_message: Option<String>,
}

/// Computes [`LiveMetricsSnapshot`]s from the store's activity stream.
pub struct LiveMetricsController {
    store: Arc<dyn JobStore>,
    alive_threshold: StdDuration,
}

impl LiveMetricsController {
    /// Creates a controller with the given liveness threshold.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, alive_threshold: StdDuration) -> Self {
        Self {
            store,
            alive_threshold,
        }
    }

    /// Builds a snapshot for `job_id` as of now.
    ///
    /// # Errors
    /// Returns [`Error::JobNotFound`] for an unknown job.
    pub async fn snapshot(&self, job_id: JobId) -> Result<LiveMetricsSnapshot> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(Error::JobNotFound { job_id })?;

        let now = Utc::now();
        let rate_window = Duration::minutes(RATE_WINDOW_MINUTES);
        let recent = self.store.item_activity(job_id, now - rate_window).await?;
        let short_cutoff = now - Duration::minutes(1);
        let items_last_minute = recent.iter().filter(|at| **at >= short_cutoff).count() as u64;
        let items_last_5_minutes = recent.len() as u64;

        #[allow(clippy::cast_precision_loss)]
        let items_per_minute = items_last_5_minutes as f64 / RATE_WINDOW_MINUTES as f64;

        let remaining_items = job.remaining_items();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let eta_minutes = if items_per_minute > 0.0 && remaining_items > 0 {
            Some((remaining_items as f64 / items_per_minute).ceil() as u64)
        } else {
            None
        };

        let alive_threshold = Duration::from_std(self.alive_threshold)
            .unwrap_or_else(|_| Duration::minutes(2));
        let last_item_at = self.store.most_recent_item_activity(job_id).await?;
        let is_alive = last_item_at.is_some_and(|at| now - at < alive_threshold);

        #[allow(clippy::cast_precision_loss)]
        let progress_percent = if job.total_items == 0 {
            100.0
        } else {
            job.processed_count as f64 / job.total_items as f64 * 100.0
        };

        Ok(LiveMetricsSnapshot {
            job_id,
            status: job.status,
            total_items: job.total_items,
            processed_count: job.processed_count,
            succeeded_count: job.succeeded_count,
            failed_count: job.failed_count,
            remaining_items,
            progress_percent,
            items_last_minute,
            items_last_5_minutes,
            items_per_minute,
            eta_minutes,
            is_alive,
            last_item_at,
            error_message: job.error_message,
        })
    }
}
