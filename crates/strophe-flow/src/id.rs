//! Strongly-typed job identifiers.
//!
//! Job IDs are ULIDs: lexicographically sortable by creation time and
//! globally unique without coordination, which matters here because jobs
//! are created by short-lived invocations that share no in-process state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::Error;

/// A unique identifier for a batch job.
///
/// Created once at job creation and immutable afterwards. The encoded
/// timestamp doubles as the job's creation instant for display purposes;
/// the authoritative `created_at` lives on the [`crate::job::Job`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    /// Generates a new unique job ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a job ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid job ID '{s}': {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = JobId::generate();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_strings_are_rejected() {
        let result = "not-a-ulid!".parse::<JobId>();
        assert!(result.is_err());
    }
}
