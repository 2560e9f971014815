//! Cluster-shared job repository and the cleanup/expiration protocol.
//!
//! Every member may run [`JobRepository::cleanup`] on its own timer; the
//! external scheduler decides the period and supplies the active job set.
//! Correctness under concurrent sweeps derives only from the "job result
//! existence is authoritative and monotonic" invariant: once a result exists,
//! every member's sweep independently reaches the same delete decision, so no
//! lock or leader is needed. Expiration compares wall-clock age against a
//! configured threshold; across members this is only as precise as clock
//! synchronization, an accepted approximation.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use weir_common::{global_metrics, ExecutionId, JobConfig, JobId, Result, WeirError};

use crate::records::{JobRecord, JobResult, ResourceValue, RESOURCE_MARKER};
use crate::store::{JobStore, SharedMap};

/// Repository behavior knobs.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Age in ms after which an orphaned resource upload (no job record, no
    /// job result) may be reclaimed.
    pub resources_expiration_ms: i64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            resources_expiration_ms: 2 * 60 * 60 * 1000,
        }
    }
}

/// Cluster-shared bookkeeping for job records, results, execution ids and
/// uploaded resources.
///
/// All operations use the shared maps' atomic per-key calls and are safe
/// under concurrent invocation from multiple members.
pub struct JobRepository {
    store: Arc<dyn JobStore>,
    config: RepositoryConfig,
}

impl JobRepository {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_config(store, RepositoryConfig::default())
    }

    pub fn with_config(store: Arc<dyn JobStore>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    /// Overrides the orphaned-upload expiration age.
    pub fn set_resources_expiration_ms(&mut self, ms: i64) {
        self.config.resources_expiration_ms = ms;
    }

    /// Mints a fresh cluster-unique job id, registered in the id registry as
    /// owning itself.
    pub fn new_job_id(&self) -> Result<JobId> {
        let raw = self.claim_unique_id(JobId)?;
        Ok(JobId(raw))
    }

    /// Mints a fresh execution id for one attempt of `job_id` and registers
    /// the execution-id -> job-id mapping.
    pub fn new_execution_id(&self, job_id: JobId) -> Result<ExecutionId> {
        let raw = self.claim_unique_id(|_| job_id)?;
        global_metrics().inc_executions_started();
        debug!(
            job_id = %job_id,
            execution_id = %ExecutionId(raw),
            operator = "JobRepositoryExecution",
            "execution id minted"
        );
        Ok(ExecutionId(raw))
    }

    fn claim_unique_id(&self, owner_of: impl Fn(u64) -> JobId) -> Result<u64> {
        let ids = self.store.ids()?;
        loop {
            let raw: u64 = rand::random();
            if raw == 0 {
                continue;
            }
            if ids.put_if_absent(raw, owner_of(raw))?.is_none() {
                return Ok(raw);
            }
        }
    }

    /// Uploads every resource declared in `config` into a dedicated resources
    /// map under a freshly minted job id.
    ///
    /// On any failure mid-upload the partially populated resources map is
    /// destroyed and the job id is unregistered before the error surfaces, so
    /// no orphaned resource map survives a failed upload.
    pub fn upload_job_resources(&self, config: &JobConfig) -> Result<JobId> {
        let job_id = self.new_job_id()?;
        match self.copy_resources(job_id, config) {
            Ok(()) => {
                global_metrics().inc_resource_upload("ok");
                info!(
                    job_id = %job_id,
                    resources = config.resources.len(),
                    operator = "JobRepositoryUpload",
                    "job resources uploaded"
                );
                Ok(job_id)
            }
            Err(e) => {
                global_metrics().inc_resource_upload("failed");
                warn!(
                    job_id = %job_id,
                    error = %e,
                    operator = "JobRepositoryUpload",
                    "resource upload failed; rolling back"
                );
                self.rollback_upload(job_id);
                Err(e)
            }
        }
    }

    fn copy_resources(&self, job_id: JobId, config: &JobConfig) -> Result<()> {
        let map = self.store.job_resources(job_id)?;
        // marker goes in first so a crash mid-copy still leaves an age to
        // expire against
        map.put(RESOURCE_MARKER.to_string(), ResourceValue::Marker(now_ms()?))?;
        for resource in &config.resources {
            let bytes = fs::read(&resource.path).map_err(|e| {
                WeirError::Resource(format!(
                    "cannot read resource '{}' from '{}': {e}",
                    resource.id,
                    resource.path.display()
                ))
            })?;
            map.put(resource.id.clone(), ResourceValue::Blob(bytes))?;
        }
        // refresh so expiration measures from upload completion
        map.put(RESOURCE_MARKER.to_string(), ResourceValue::Marker(now_ms()?))?;
        Ok(())
    }

    // Rollback is best-effort: whatever survives a storage hiccup here is
    // reclaimed later by the expiration sweep.
    fn rollback_upload(&self, job_id: JobId) {
        match self.store.job_resources(job_id) {
            Ok(map) => {
                if let Err(e) = map.destroy() {
                    warn!(
                        job_id = %job_id,
                        error = %e,
                        operator = "JobRepositoryUpload",
                        "failed to destroy partial resources map"
                    );
                }
            }
            Err(e) => warn!(
                job_id = %job_id,
                error = %e,
                operator = "JobRepositoryUpload",
                "failed to open partial resources map for rollback"
            ),
        }
        if let Err(e) = self.unregister_job_ids(job_id) {
            warn!(
                job_id = %job_id,
                error = %e,
                operator = "JobRepositoryUpload",
                "failed to unregister job id after rollback"
            );
        }
    }

    /// Inserts the job record iff no record for that job id exists yet.
    /// Duplicate insertion is a configuration error.
    pub fn put_new_job_record(&self, record: JobRecord) -> Result<()> {
        let job_id = record.job_id;
        let prev = self.store.job_records()?.put_if_absent(job_id, record)?;
        if prev.is_some() {
            return Err(WeirError::InvalidConfig(format!(
                "job record for job {job_id} already exists"
            )));
        }
        global_metrics().inc_job_records_put();
        info!(
            job_id = %job_id,
            operator = "JobRepositorySubmit",
            "job record inserted"
        );
        Ok(())
    }

    /// Writes the terminal job result exactly once. A second terminal
    /// transition for the same job id is a configuration error.
    pub fn complete_job(
        &self,
        job_id: JobId,
        coordinator: &str,
        completion_time: i64,
        failure: Option<String>,
    ) -> Result<()> {
        let record = self.get_job_record(job_id)?.ok_or_else(|| {
            WeirError::InvalidConfig(format!("job record for job {job_id} not found"))
        })?;
        let result = JobResult {
            job_id,
            config: record.config,
            coordinator: coordinator.to_string(),
            creation_time: record.creation_time,
            completion_time,
            failure,
        };
        let prev = self.store.job_results()?.put_if_absent(job_id, result)?;
        if prev.is_some() {
            return Err(WeirError::InvalidConfig(format!(
                "job result for job {job_id} already exists"
            )));
        }
        info!(
            job_id = %job_id,
            operator = "JobRepositoryComplete",
            "job result recorded"
        );
        Ok(())
    }

    pub fn get_job_record(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        self.store.job_records()?.get(&job_id)
    }

    pub fn get_job_result(&self, job_id: JobId) -> Result<Option<JobResult>> {
        self.store.job_results()?.get(&job_id)
    }

    /// Returns the per-job resources map, refreshing its last-access marker.
    pub fn get_job_resources(
        &self,
        job_id: JobId,
    ) -> Result<Arc<dyn SharedMap<String, ResourceValue>>> {
        let map = self.store.job_resources(job_id)?;
        if !map.is_empty()? {
            map.put(RESOURCE_MARKER.to_string(), ResourceValue::Marker(now_ms()?))?;
        }
        Ok(map)
    }

    /// The expiration sweep. Idempotent and safe to run concurrently on every
    /// member; also callable synchronously.
    ///
    /// `active_job_ids` is the cluster-wide set of jobs currently coordinated.
    /// Presence of a job result is the only signal that ever authorizes
    /// deleting a job's bookkeeping; a job record without a result is never
    /// expired by elapsed time alone, because this member's scan may be stale
    /// while the job legitimately still runs elsewhere.
    pub fn cleanup(&self, active_job_ids: &HashSet<JobId>) -> Result<()> {
        global_metrics().inc_cleanup_runs();
        let records = self.store.job_records()?;
        let results = self.store.job_results()?;
        let now = now_ms()?;

        let mut known: BTreeSet<JobId> = records.keys()?.into_iter().collect();
        known.extend(self.store.resource_map_job_ids()?);

        let mut swept = 0_u64;
        for job_id in known {
            if results.get(&job_id)?.is_some() {
                self.delete_job_bookkeeping(job_id)?;
                swept += 1;
            } else if active_job_ids.contains(&job_id) {
                debug!(
                    job_id = %job_id,
                    operator = "JobRepositoryCleanup",
                    "job is actively coordinated; skipping"
                );
            } else if records.get(&job_id)?.is_some() {
                debug!(
                    job_id = %job_id,
                    operator = "JobRepositoryCleanup",
                    "record without result; not expired by elapsed time alone"
                );
            } else {
                self.expire_orphaned_upload(job_id, now)?;
            }
        }
        if swept > 0 {
            global_metrics().add_jobs_swept(swept);
        }
        Ok(())
    }

    fn delete_job_bookkeeping(&self, job_id: JobId) -> Result<()> {
        self.store.job_records()?.remove(&job_id)?;
        self.store.job_resources(job_id)?.destroy()?;
        self.unregister_job_ids(job_id)?;
        info!(
            job_id = %job_id,
            operator = "JobRepositoryCleanup",
            "finished job swept"
        );
        Ok(())
    }

    fn unregister_job_ids(&self, job_id: JobId) -> Result<()> {
        let ids = self.store.ids()?;
        for (raw, owner) in ids.entries()? {
            if owner == job_id {
                ids.remove(&raw)?;
            }
        }
        Ok(())
    }

    fn expire_orphaned_upload(&self, job_id: JobId, now: i64) -> Result<()> {
        let map = self.store.job_resources(job_id)?;
        match map.get(&RESOURCE_MARKER.to_string())? {
            Some(ResourceValue::Marker(last_access))
                if now.saturating_sub(last_access) > self.config.resources_expiration_ms =>
            {
                info!(
                    job_id = %job_id,
                    age_ms = now.saturating_sub(last_access),
                    operator = "JobRepositoryCleanup",
                    "expiring orphaned resource upload"
                );
                map.destroy()?;
                self.unregister_job_ids(job_id)?;
                global_metrics().inc_orphaned_uploads_expired();
            }
            Some(_) => {}
            None => {
                // destroyed by a concurrent sweep, or the map never got its
                // marker; nothing to measure an age against
                debug!(
                    job_id = %job_id,
                    operator = "JobRepositoryCleanup",
                    "resources map has no marker; skipping"
                );
            }
        }
        Ok(())
    }
}

/// Current wall-clock time in unix ms.
pub fn now_ms() -> Result<i64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| WeirError::Storage(format!("clock error: {e}")))?
        .as_millis() as i64)
}
