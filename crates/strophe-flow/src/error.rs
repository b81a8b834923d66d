//! Error types for the batch-job engine.

use crate::id::JobId;

/// The result type used throughout strophe-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A job was not found in the record store.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: JobId,
    },

    /// An invalid status transition was attempted.
    #[error("invalid status transition: {from} -> {to} ({reason})")]
    InvalidStatusTransition {
        /// The current status.
        from: String,
        /// The attempted target status.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A malformed identifier was supplied by a caller.
    #[error("{message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// Invalid job creation request or engine configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the validation failure.
        message: String,
    },

    /// The work item provider failed to return a slice.
    ///
    /// Chunk-level failure: the chunk is abandoned without advancing the
    /// cursor and the job stays `Running` for the next continuation.
    #[error("work item provider error: {message}")]
    Provider {
        /// Description of the provider failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }
}
