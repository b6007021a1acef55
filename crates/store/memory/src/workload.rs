use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use imagecert_core::Workload;
use imagecert_store::{StoreError, WorkloadSource};

fn workload_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// In-memory [`WorkloadSource`].
///
/// Reads of individual workloads can be made to fail, to exercise callers'
/// handling of transient read errors.
#[derive(Debug, Default)]
pub struct MemoryWorkloadSource {
    workloads: DashMap<String, Workload>,
    failing: DashSet<String>,
}

impl MemoryWorkloadSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workload.
    pub fn upsert(&self, workload: Workload) {
        self.workloads
            .insert(workload_key(&workload.namespace, &workload.name), workload);
    }

    /// Remove a workload, returning it if present.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<Workload> {
        self.workloads
            .remove(&workload_key(namespace, name))
            .map(|(_, w)| w)
    }

    /// Make reads of this workload fail until [`heal`](Self::heal) is called.
    pub fn fail_reads(&self, namespace: &str, name: &str) {
        self.failing.insert(workload_key(namespace, name));
    }

    pub fn heal(&self, namespace: &str, name: &str) {
        self.failing.remove(&workload_key(namespace, name));
    }
}

#[async_trait]
impl WorkloadSource for MemoryWorkloadSource {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>, StoreError> {
        let key = workload_key(namespace, name);
        if self.failing.contains(&key) {
            return Err(StoreError::Backend(format!("read of workload {key} failed")));
        }
        Ok(self.workloads.get(&key).map(|w| w.value().clone()))
    }
}
