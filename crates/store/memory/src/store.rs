use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use imagecert_core::ImageRecord;
use imagecert_store::{RecordStore, StoreError};

/// In-memory [`RecordStore`] backed by a [`DashMap`].
///
/// Versions start at 1 on create and increase by one on every write.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, ImageRecord>,
    injected_conflicts: AtomicUsize,
}

impl MemoryRecordStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` status writes fail with a conflict, as if a
    /// concurrent writer had won each race.
    pub fn inject_status_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    fn update_with(
        &self,
        record: &ImageRecord,
        apply: impl FnOnce(&mut ImageRecord),
    ) -> Result<ImageRecord, StoreError> {
        let Some(mut stored) = self.records.get_mut(&record.key) else {
            return Err(StoreError::NotFound(record.key.clone()));
        };
        if stored.resource_version != record.resource_version {
            return Err(StoreError::Conflict {
                key: record.key.clone(),
                expected: record.resource_version,
                found: stored.resource_version,
            });
        }
        apply(stored.value_mut());
        stored.resource_version += 1;
        Ok(stored.value().clone())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn create(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.key.clone())),
            Entry::Vacant(vacant) => {
                let mut stored = record.clone();
                stored.resource_version = 1;
                vacant.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn update_status(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError> {
        if self.take_injected_conflict() {
            let found = self
                .records
                .get(&record.key)
                .map_or(0, |r| r.resource_version);
            return Err(StoreError::Conflict {
                key: record.key.clone(),
                expected: record.resource_version,
                found,
            });
        }
        self.update_with(record, |stored| stored.status = record.status.clone())
    }

    async fn update_metadata(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError> {
        self.update_with(record, |stored| {
            stored.annotations = record.annotations.clone();
        })
    }

    async fn list(&self) -> Result<Vec<ImageRecord>, StoreError> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}
