use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One resource declared for upload with a job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Key the resource is stored under in the per-job resources map.
    pub id: String,
    /// Local filesystem path read at upload time.
    pub path: PathBuf,
}

/// Per-job submission configuration.
///
/// Persisted verbatim inside the job record and echoed into the job result, so
/// it must stay cheap to clone and serialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    /// Optional human-readable job name.
    pub name: Option<String>,
    /// Resources copied into the per-job resources map at submission.
    pub resources: Vec<ResourceConfig>,
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource keyed by its file name.
    pub fn add_resource(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        let id = resource_id_from_path(&path);
        self.resources.push(ResourceConfig { id, path });
        self
    }

    /// Declare a resource under an explicit key.
    pub fn add_resource_with_id(
        &mut self,
        id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> &mut Self {
        self.resources.push(ResourceConfig {
            id: id.into(),
            path: path.into(),
        });
        self
    }
}

fn resource_id_from_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::JobConfig;

    #[test]
    fn resource_id_defaults_to_file_name() {
        let mut config = JobConfig::new();
        config.add_resource("/tmp/jars/processors.bin");
        assert_eq!(config.resources[0].id, "processors.bin");
    }

    #[test]
    fn explicit_resource_id_wins() {
        let mut config = JobConfig::new();
        config.add_resource_with_id("udfs", "/tmp/jars/processors.bin");
        assert_eq!(config.resources[0].id, "udfs");
    }
}
