//! In-process [`JobStore`] backend over mutexed hash maps.
//!
//! Backs single-member deployments and tests. Distributed backends implement
//! the same port against a real cluster store; the repository logic does not
//! change.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use weir_common::{JobId, Result, WeirError};

use crate::records::{JobRecord, JobResult, ResourceValue};
use crate::store::{JobStore, SharedMap};

/// One in-process shared map.
pub struct MemoryMap<K, V> {
    entries: Mutex<HashMap<K, V>>,
    destroyed: AtomicBool,
}

impl<K, V> MemoryMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<K, V>>> {
        self.entries
            .lock()
            .map_err(|_| WeirError::Storage("shared map mutex poisoned".to_string()))
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl<K, V> Default for MemoryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SharedMap<K, V> for MemoryMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> Result<Option<V>> {
        Ok(self.lock()?.insert(key, value))
    }

    fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        match self.lock()?.entry(key) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(None)
            }
        }
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        Ok(self.lock()?.remove(key))
    }

    fn keys(&self) -> Result<Vec<K>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::Release);
        self.lock()?.clear();
        Ok(())
    }
}

/// In-process store handing out [`MemoryMap`]s.
#[derive(Default)]
pub struct InMemoryStore {
    job_records: Arc<MemoryMap<JobId, JobRecord>>,
    job_results: Arc<MemoryMap<JobId, JobResult>>,
    ids: Arc<MemoryMap<u64, JobId>>,
    resources: Mutex<HashMap<JobId, Arc<MemoryMap<String, ResourceValue>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryStore {
    fn job_records(&self) -> Result<Arc<dyn SharedMap<JobId, JobRecord>>> {
        Ok(self.job_records.clone())
    }

    fn job_results(&self) -> Result<Arc<dyn SharedMap<JobId, JobResult>>> {
        Ok(self.job_results.clone())
    }

    fn ids(&self) -> Result<Arc<dyn SharedMap<u64, JobId>>> {
        Ok(self.ids.clone())
    }

    fn job_resources(&self, job_id: JobId) -> Result<Arc<dyn SharedMap<String, ResourceValue>>> {
        let mut maps = self
            .resources
            .lock()
            .map_err(|_| WeirError::Storage("resource map registry mutex poisoned".to_string()))?;
        let map = maps
            .entry(job_id)
            .or_insert_with(|| Arc::new(MemoryMap::new()));
        if map.is_destroyed() {
            // a destroyed map reads as empty; recreate it on next access
            *map = Arc::new(MemoryMap::new());
        }
        Ok(map.clone())
    }

    fn resource_map_job_ids(&self) -> Result<Vec<JobId>> {
        let mut maps = self
            .resources
            .lock()
            .map_err(|_| WeirError::Storage("resource map registry mutex poisoned".to_string()))?;
        maps.retain(|_, map| !map.is_destroyed());
        Ok(maps.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryStore, MemoryMap};
    use crate::records::ResourceValue;
    use crate::store::{JobStore, SharedMap};
    use weir_common::JobId;

    #[test]
    fn put_if_absent_keeps_first_value() {
        let map = MemoryMap::new();
        assert!(map.put_if_absent("k".to_string(), 1).unwrap().is_none());
        assert_eq!(map.put_if_absent("k".to_string(), 2).unwrap(), Some(1));
        assert_eq!(map.get(&"k".to_string()).unwrap(), Some(1));
    }

    #[test]
    fn destroyed_map_reads_empty_and_is_unlisted() {
        let store = InMemoryStore::new();
        let job = JobId(7);
        let map = store.job_resources(job).unwrap();
        map.put("a".to_string(), ResourceValue::Blob(vec![1])).unwrap();
        assert_eq!(store.resource_map_job_ids().unwrap(), vec![job]);

        map.destroy().unwrap();
        assert!(map.is_empty().unwrap());
        assert!(store.resource_map_job_ids().unwrap().is_empty());

        // next access recreates a fresh, empty map
        let fresh = store.job_resources(job).unwrap();
        assert!(fresh.is_empty().unwrap());
    }
}
