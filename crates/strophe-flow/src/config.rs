//! Engine configuration.
//!
//! All tunables live here so a host can load them from file and hand the
//! engine a single validated struct. Durations use `std::time::Duration`;
//! they are converted to `chrono::Duration` at the storage edge.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound on the per-job chunk size.
///
/// Chunks are deliberately coarse; anything larger than this risks a single
/// invocation outliving its lease.
pub const MAX_CHUNK_SIZE: u32 = 50;

/// Engine-wide policy knobs.
///
/// `chunk_size` here is only the default for newly created jobs; each job
/// pins its own chunk size at creation and never changes it afterwards,
/// which keeps resumption offsets and ETA math consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default number of items per chunk for new jobs.
    pub chunk_size: u32,
    /// Consecutive item failures before the circuit breaker pauses the job.
    pub error_threshold: u32,
    /// Lease duration for the per-job active lock.
    pub lock_timeout: Duration,
    /// Inactivity window after which a `Running` job is considered orphaned.
    pub orphan_threshold: Duration,
    /// Pacing delay between a chunk finishing and the next continuation.
    pub continuation_delay: Duration,
    /// Pacing delay between items within a chunk (bounds external call rate).
    pub item_delay: Duration,
    /// Maximum age of the most recent item activity for a job to count as alive.
    pub alive_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            error_threshold: 5,
            lock_timeout: Duration::from_secs(90),
            orphan_threshold: Duration::from_secs(300),
            continuation_delay: Duration::from_secs(2),
            item_delay: Duration::from_millis(200),
            alive_threshold: Duration::from_secs(120),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default chunk size for new jobs.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the circuit breaker threshold.
    #[must_use]
    pub const fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    /// Sets the lock lease duration.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the orphan inactivity threshold.
    #[must_use]
    pub const fn with_orphan_threshold(mut self, threshold: Duration) -> Self {
        self.orphan_threshold = threshold;
        self
    }

    /// Removes all pacing delays. Intended for tests.
    #[must_use]
    pub const fn without_pacing(mut self) -> Self {
        self.continuation_delay = Duration::ZERO;
        self.item_delay = Duration::ZERO;
        self
    }

    /// Validates chunk-size bounds and timeout ordering.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] if the chunk size is out of bounds,
    /// the breaker threshold is zero, or the orphan threshold does not exceed
    /// the lock timeout (the reaper must never fire inside a live lease).
    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)?;
        if self.error_threshold == 0 {
            return Err(Error::InvalidConfig {
                message: "error_threshold must be at least 1".to_string(),
            });
        }
        if self.lock_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                message: "lock_timeout must be non-zero".to_string(),
            });
        }
        if self.orphan_threshold <= self.lock_timeout {
            return Err(Error::InvalidConfig {
                message: format!(
                    "orphan_threshold ({:?}) must exceed lock_timeout ({:?})",
                    self.orphan_threshold, self.lock_timeout
                ),
            });
        }
        Ok(())
    }
}

/// Validates a chunk size against the engine bounds.
///
/// # Errors
/// Returns [`Error::InvalidConfig`] if `chunk_size` is zero or exceeds
/// [`MAX_CHUNK_SIZE`].
pub fn validate_chunk_size(chunk_size: u32) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(Error::InvalidConfig {
            message: format!("chunk_size must be in 1..={MAX_CHUNK_SIZE}, got {chunk_size}"),
        });
    }
    Ok(())
}
