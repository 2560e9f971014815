//! Storage port over the cluster's shared keyed maps.
//!
//! The repository's cleanup algorithm is independent of the storage backend:
//! it is written against these traits and relies only on atomic per-key
//! operations, never on read-modify-write across calls or on any global lock.

use std::sync::Arc;

use weir_common::{JobId, Result};

use crate::records::{JobRecord, JobResult, ResourceValue};

/// Minimal port over one cluster-shared keyed map.
///
/// Implementations must give at-least atomic single-key semantics for `put`,
/// `put_if_absent` and `remove`. `keys`/`entries` iterate a point-in-time-ish
/// view and may observe concurrent mutation. `destroy` removes the map as a
/// whole; a destroyed map reads as empty and may be transparently recreated
/// by its store. Concurrent `destroy` of the same map is not an error, but an
/// emptiness check racing a remote destroy may transiently observe a
/// non-empty map, so callers poll with a bounded retry instead of asserting
/// immediately.
pub trait SharedMap<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>>;
    fn put(&self, key: K, value: V) -> Result<Option<V>>;
    /// Atomic insert-if-absent; returns the previously present value, if any.
    fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>>;
    fn remove(&self, key: &K) -> Result<Option<V>>;
    fn keys(&self) -> Result<Vec<K>>;
    fn entries(&self) -> Result<Vec<(K, V)>>;
    fn is_empty(&self) -> Result<bool>;
    fn destroy(&self) -> Result<()>;
}

/// Storage port giving the repository its cluster map families:
/// job records, job results, the id registry, and one resources map per job.
pub trait JobStore: Send + Sync {
    /// job id -> persisted job record
    fn job_records(&self) -> Result<Arc<dyn SharedMap<JobId, JobRecord>>>;

    /// job id -> terminal job result
    fn job_results(&self) -> Result<Arc<dyn SharedMap<JobId, JobResult>>>;

    /// minted raw id (job or execution) -> owning job id
    fn ids(&self) -> Result<Arc<dyn SharedMap<u64, JobId>>>;

    /// dedicated per-job resources map, created on first access
    fn job_resources(&self, job_id: JobId) -> Result<Arc<dyn SharedMap<String, ResourceValue>>>;

    /// job ids that currently have a dedicated resources map
    fn resource_map_job_ids(&self) -> Result<Vec<JobId>>;
}
