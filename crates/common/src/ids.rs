//! Typed identifiers shared across planner/repository components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster-wide unique job identifier.
///
/// Ids are random 64-bit values; uniqueness is enforced by registering each
/// minted id in the shared id registry with an atomic put-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Unique identifier for one execution attempt of a job.
///
/// A job may be attempted multiple times (e.g. after a restart); each attempt
/// gets a fresh execution id mapped back to the owning job id in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
