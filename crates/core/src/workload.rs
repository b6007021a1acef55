use serde::{Deserialize, Serialize};

/// Lifecycle phase of an observed workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl WorkloadPhase {
    /// Only running or starting workloads contribute to the inventory.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Pending)
    }
}

/// Runtime status of one container within a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    /// Resolved image identifier; empty until the runtime has pulled the image.
    #[serde(default)]
    pub image_id: String,
}

impl ContainerStatus {
    pub fn new(name: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_id: image_id.into(),
        }
    }
}

/// A point-in-time observation of a workload (a pod, in cluster terms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub phase: WorkloadPhase,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    #[serde(default)]
    pub init_containers: Vec<ContainerStatus>,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, phase: WorkloadPhase) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            phase,
            containers: Vec::new(),
            init_containers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_container(mut self, name: impl Into<String>, image_id: impl Into<String>) -> Self {
        self.containers.push(ContainerStatus::new(name, image_id));
        self
    }

    #[must_use]
    pub fn with_init_container(
        mut self,
        name: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        self.init_containers.push(ContainerStatus::new(name, image_id));
        self
    }

    /// Regular then init containers.
    pub fn all_containers(&self) -> impl Iterator<Item = &ContainerStatus> {
        self.containers.iter().chain(self.init_containers.iter())
    }
}
