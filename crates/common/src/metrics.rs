use std::sync::{Arc, OnceLock};

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Process-wide metrics registry for repository and planner activity.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    resource_uploads: IntCounterVec,
    job_records_put: IntCounter,
    executions_started: IntCounter,
    cleanup_runs: IntCounter,
    jobs_swept: IntCounter,
    orphaned_uploads_expired: IntCounter,
    dags_compiled: IntCounter,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn inc_resource_upload(&self, outcome: &str) {
        self.inner
            .resource_uploads
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_job_records_put(&self) {
        self.inner.job_records_put.inc();
    }

    pub fn inc_executions_started(&self) {
        self.inner.executions_started.inc();
    }

    pub fn inc_cleanup_runs(&self) {
        self.inner.cleanup_runs.inc();
    }

    pub fn add_jobs_swept(&self, count: u64) {
        self.inner.jobs_swept.inc_by(count);
    }

    pub fn inc_orphaned_uploads_expired(&self) {
        self.inner.orphaned_uploads_expired.inc();
    }

    pub fn inc_dags_compiled(&self) {
        self.inner.dags_compiled.inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let resource_uploads = counter_vec(
            &registry,
            "weir_resource_uploads_total",
            "Job resource uploads by outcome",
            &["outcome"],
        );
        let job_records_put = counter(
            &registry,
            "weir_job_records_put_total",
            "Job records inserted",
        );
        let executions_started = counter(
            &registry,
            "weir_executions_started_total",
            "Execution ids minted",
        );
        let cleanup_runs = counter(
            &registry,
            "weir_cleanup_runs_total",
            "Repository cleanup sweeps executed",
        );
        let jobs_swept = counter(
            &registry,
            "weir_jobs_swept_total",
            "Finished jobs removed by cleanup",
        );
        let orphaned_uploads_expired = counter(
            &registry,
            "weir_orphaned_uploads_expired_total",
            "Abandoned resource uploads reclaimed by cleanup",
        );
        let dags_compiled = counter(
            &registry,
            "weir_dags_compiled_total",
            "Pipelines lowered to physical DAGs",
        );

        Self {
            registry,
            resource_uploads,
            job_records_put,
            executions_started,
            cleanup_runs,
            jobs_swept,
            orphaned_uploads_expired,
            dags_compiled,
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("counter");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
