//! Read-modify-write helpers over a [`RecordStore`].
//!
//! Every write re-reads the record first and applies the mutation to the
//! fresh copy. On a version conflict the cycle is repeated once; a second
//! conflict is returned to the caller, which drops the update and leaves
//! the next cycle to reconcile.

use imagecert_core::ImageRecord;
use imagecert_store::{RecordStore, StoreError};
use tracing::debug;

const WRITE_ATTEMPTS: u32 = 2;

#[derive(Clone, Copy)]
enum Part {
    Status,
    Metadata,
}

/// Apply `mutate` to the record's status and write it back.
///
/// `mutate` returns `None` to signal that no write is needed, in which
/// case `Ok(None)` is returned without touching the store.
pub(crate) async fn update_status<T, F>(
    store: &dyn RecordStore,
    key: &str,
    mutate: F,
) -> Result<Option<(ImageRecord, T)>, StoreError>
where
    F: FnMut(&mut ImageRecord) -> Option<T> + Send,
    T: Send,
{
    update(store, key, Part::Status, mutate).await
}

/// Apply `mutate` to the record's annotations and write them back.
pub(crate) async fn update_metadata<T, F>(
    store: &dyn RecordStore,
    key: &str,
    mutate: F,
) -> Result<Option<(ImageRecord, T)>, StoreError>
where
    F: FnMut(&mut ImageRecord) -> Option<T> + Send,
    T: Send,
{
    update(store, key, Part::Metadata, mutate).await
}

async fn update<T, F>(
    store: &dyn RecordStore,
    key: &str,
    part: Part,
    mut mutate: F,
) -> Result<Option<(ImageRecord, T)>, StoreError>
where
    F: FnMut(&mut ImageRecord) -> Option<T> + Send,
    T: Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(mut record) = store.get(key).await? else {
            return Err(StoreError::NotFound(key.to_owned()));
        };
        let Some(extra) = mutate(&mut record) else {
            return Ok(None);
        };
        let written = match part {
            Part::Status => store.update_status(&record).await,
            Part::Metadata => store.update_metadata(&record).await,
        };
        match written {
            Ok(stored) => return Ok(Some((stored, extra))),
            Err(e) if e.is_conflict() && attempt < WRITE_ATTEMPTS => {
                debug!(key, error = %e, "write conflicted, retrying on a fresh copy");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use imagecert_core::{CertificationStatus, WorkloadReference, parse_image_id};
    use imagecert_store_memory::MemoryRecordStore;

    async fn seeded() -> (MemoryRecordStore, String) {
        let store = MemoryRecordStore::new();
        let reference = parse_image_id(
            "quay.io/org/app@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap();
        let record = ImageRecord::new(&reference, CertificationStatus::Unknown, Utc::now());
        let key = record.key.clone();
        store.create(&record).await.unwrap();
        (store, key)
    }

    #[tokio::test]
    async fn writes_mutation() {
        let (store, key) = seeded().await;
        let result = update_status(&store, &key, |r| {
            Some(r.status.add_reference(WorkloadReference::new("ns", "p", "c")))
        })
        .await
        .unwrap();
        let (stored, added) = result.unwrap();
        assert!(added);
        assert_eq!(stored.status.workload_references.len(), 1);
    }

    #[tokio::test]
    async fn none_skips_the_write() {
        let (store, key) = seeded().await;
        let result = update_status(&store, &key, |_| None::<()>).await.unwrap();
        assert!(result.is_none());
        assert_eq!(store.get(&key).await.unwrap().unwrap().resource_version, 1);
    }

    #[tokio::test]
    async fn one_conflict_is_retried_on_a_fresh_copy() {
        let (store, key) = seeded().await;
        store.inject_status_conflicts(1);
        let mut calls = 0;
        let result = update_status(&store, &key, |r| {
            calls += 1;
            r.status.certification_status = CertificationStatus::Certified;
            Some(())
        })
        .await
        .unwrap();
        assert!(result.is_some());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn second_conflict_is_returned() {
        let (store, key) = seeded().await;
        store.inject_status_conflicts(2);
        let err = update_status(&store, &key, |_| Some(())).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            store.get(&key).await.unwrap().unwrap().status.certification_status,
            CertificationStatus::Unknown
        );
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let store = MemoryRecordStore::new();
        let err = update_metadata(&store, "nope", |_| Some(())).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
