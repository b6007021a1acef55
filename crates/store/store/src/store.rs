use async_trait::async_trait;

use imagecert_core::{ImageRecord, Workload};

use crate::error::StoreError;

/// Persistence for inventory records.
///
/// Writes are guarded by optimistic concurrency: every stored record carries
/// a `resource_version`, and an update whose version does not match the
/// stored one fails with [`StoreError::Conflict`]. Each successful write
/// returns the record as stored, with its new version.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by key.
    async fn get(&self, key: &str) -> Result<Option<ImageRecord>, StoreError>;

    /// Atomically create a record, failing with
    /// [`StoreError::AlreadyExists`] if the key is taken.
    async fn create(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError>;

    /// Replace the record's status, leaving identity and metadata untouched.
    async fn update_status(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError>;

    /// Replace the record's annotations, leaving identity and status untouched.
    async fn update_metadata(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError>;

    /// All records, in no particular order.
    async fn list(&self) -> Result<Vec<ImageRecord>, StoreError>;
}

/// Read access to the workloads the inventory observes.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Fetch a workload. `Ok(None)` means it is confirmed gone.
    async fn get_workload(&self, namespace: &str, name: &str)
    -> Result<Option<Workload>, StoreError>;

    /// Whether a workload still exists.
    async fn workload_exists(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        Ok(self.get_workload(namespace, name).await?.is_some())
    }
}
