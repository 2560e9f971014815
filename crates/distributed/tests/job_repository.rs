use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use weir_common::{JobConfig, JobId};
use weir_distributed::{
    now_ms, InMemoryStore, JobRecord, JobRepository, JobStore, RepositoryConfig, SharedMap,
};

const SHORT_EXPIRATION_MS: i64 = 50;

fn repository(store: &Arc<InMemoryStore>) -> JobRepository {
    JobRepository::with_config(
        store.clone(),
        RepositoryConfig {
            resources_expiration_ms: SHORT_EXPIRATION_MS,
        },
    )
}

fn temp_resource(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("weir-{}-{name}", std::process::id()));
    fs::write(&path, contents).expect("write temp resource");
    path
}

fn upload_resources_for_new_job(repo: &JobRepository, name: &str) -> (JobId, JobConfig) {
    let mut config = JobConfig::new();
    config.add_resource(temp_resource(name, b"processor bytes"));
    let job_id = repo.upload_job_resources(&config).unwrap();
    (job_id, config)
}

fn new_job_record(job_id: JobId, config: JobConfig) -> JobRecord {
    let dag = serde_json::to_vec(&vec!["items", "group-and-aggregate"]).unwrap();
    JobRecord::new(job_id, now_ms().unwrap(), dag, config)
}

fn sleep_until_job_expires() {
    thread::sleep(Duration::from_millis(2 * SHORT_EXPIRATION_MS as u64 + 20));
}

// Map destruction racing a concurrent sweep can transiently observe a
// non-empty map, so emptiness is asserted with a bounded retry.
fn assert_eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..50 {
        if check() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("condition not reached in time");
}

#[test]
fn completed_job_is_fully_cleaned_up() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let (job_id, config) = upload_resources_for_new_job(&repo, "completed");
    repo.put_new_job_record(new_job_record(job_id, config)).unwrap();
    let execution_1 = repo.new_execution_id(job_id).unwrap();
    let execution_2 = repo.new_execution_id(job_id).unwrap();
    repo.complete_job(job_id, "member-a", now_ms().unwrap(), None)
        .unwrap();

    // result exists: removable regardless of the active set or elapsed time
    repo.cleanup(&HashSet::from([job_id])).unwrap();

    assert!(repo.get_job_record(job_id).unwrap().is_none());
    assert_eventually(|| repo.get_job_resources(job_id).unwrap().is_empty().unwrap());
    let ids = store.ids().unwrap();
    assert!(ids.get(&execution_1.0).unwrap().is_none());
    assert!(ids.get(&execution_2.0).unwrap().is_none());
    assert!(ids.get(&job_id.0).unwrap().is_none());
    // the result itself stays for history
    assert!(repo.get_job_result(job_id).unwrap().is_some());
}

#[test]
fn active_job_is_not_cleaned_up_after_expiration() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let (job_id, config) = upload_resources_for_new_job(&repo, "active");
    repo.put_new_job_record(new_job_record(job_id, config)).unwrap();
    let execution = repo.new_execution_id(job_id).unwrap();

    sleep_until_job_expires();
    repo.cleanup(&HashSet::from([job_id])).unwrap();

    assert!(repo.get_job_record(job_id).unwrap().is_some());
    assert!(!repo.get_job_resources(job_id).unwrap().is_empty().unwrap());
    assert!(store.ids().unwrap().get(&execution.0).unwrap().is_some());
}

#[test]
fn record_without_result_is_never_expired_by_time_alone() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let (job_id, config) = upload_resources_for_new_job(&repo, "stale-scan");
    repo.put_new_job_record(new_job_record(job_id, config)).unwrap();
    let execution = repo.new_execution_id(job_id).unwrap();

    sleep_until_job_expires();
    // not in the active set and long past the threshold, but no result exists
    repo.cleanup(&HashSet::new()).unwrap();

    assert!(repo.get_job_record(job_id).unwrap().is_some());
    assert!(!repo.get_job_resources(job_id).unwrap().is_empty().unwrap());
    assert!(store.ids().unwrap().get(&execution.0).unwrap().is_some());
}

#[test]
fn orphaned_resource_upload_expires() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let (job_id, _config) = upload_resources_for_new_job(&repo, "orphaned");

    // too young to reclaim
    repo.cleanup(&HashSet::new()).unwrap();
    assert!(!repo.get_job_resources(job_id).unwrap().is_empty().unwrap());

    sleep_until_job_expires();
    repo.cleanup(&HashSet::new()).unwrap();

    assert_eventually(|| repo.get_job_resources(job_id).unwrap().is_empty().unwrap());
    assert!(store.ids().unwrap().get(&job_id.0).unwrap().is_none());
}

#[test]
fn failed_upload_leaves_no_residual_state() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let mut config = JobConfig::new();
    config.add_resource("/weir-definitely-missing/no-such-file.bin");
    let err = repo.upload_job_resources(&config).unwrap_err();
    assert!(err.to_string().contains("cannot read resource"));

    assert!(store.ids().unwrap().keys().unwrap().is_empty());
    assert!(store.resource_map_job_ids().unwrap().is_empty());
}

#[test]
fn cleanup_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let (job_id, config) = upload_resources_for_new_job(&repo, "idempotent");
    repo.put_new_job_record(new_job_record(job_id, config)).unwrap();
    repo.new_execution_id(job_id).unwrap();
    repo.complete_job(job_id, "member-a", now_ms().unwrap(), Some("boom".to_string()))
        .unwrap();

    repo.cleanup(&HashSet::new()).unwrap();
    repo.cleanup(&HashSet::new()).unwrap();

    assert!(repo.get_job_record(job_id).unwrap().is_none());
    assert!(store.ids().unwrap().keys().unwrap().is_empty());
    assert_eventually(|| repo.get_job_resources(job_id).unwrap().is_empty().unwrap());
    assert!(!repo.get_job_result(job_id).unwrap().unwrap().is_successful());
}

#[test]
fn duplicate_job_record_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let job_id = repo.new_job_id().unwrap();
    repo.put_new_job_record(new_job_record(job_id, JobConfig::new()))
        .unwrap();
    let err = repo
        .put_new_job_record(new_job_record(job_id, JobConfig::new()))
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn second_terminal_transition_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let job_id = repo.new_job_id().unwrap();
    repo.put_new_job_record(new_job_record(job_id, JobConfig::new()))
        .unwrap();
    repo.complete_job(job_id, "member-a", now_ms().unwrap(), None)
        .unwrap();
    let err = repo
        .complete_job(job_id, "member-b", now_ms().unwrap(), Some("late".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
    // first result stays intact
    assert!(repo.get_job_result(job_id).unwrap().unwrap().is_successful());
}

// End-to-end lifecycle: nothing is reclaimed while the job lacks a result,
// no matter how stale; recording the result makes every member's sweep
// converge on full removal.
#[test]
fn lifecycle_end_to_end() {
    let store = Arc::new(InMemoryStore::new());
    let repo = repository(&store);

    let (job_id, config) = upload_resources_for_new_job(&repo, "lifecycle");
    repo.put_new_job_record(new_job_record(job_id, config)).unwrap();
    let execution = repo.new_execution_id(job_id).unwrap();

    repo.cleanup(&HashSet::new()).unwrap();
    assert!(repo.get_job_record(job_id).unwrap().is_some());
    assert!(!repo.get_job_resources(job_id).unwrap().is_empty().unwrap());

    sleep_until_job_expires();
    repo.cleanup(&HashSet::new()).unwrap();
    assert!(repo.get_job_record(job_id).unwrap().is_some());
    assert!(!repo.get_job_resources(job_id).unwrap().is_empty().unwrap());

    repo.complete_job(job_id, "member-a", now_ms().unwrap(), None)
        .unwrap();
    repo.cleanup(&HashSet::new()).unwrap();
    assert!(repo.get_job_record(job_id).unwrap().is_none());
    assert_eventually(|| repo.get_job_resources(job_id).unwrap().is_empty().unwrap());
    assert!(store.ids().unwrap().get(&execution.0).unwrap().is_none());
}
