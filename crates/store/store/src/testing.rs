use chrono::DateTime;

use imagecert_core::{
    CVE_ANNOTATION, CertificationStatus, ImageRecord, ImageReference, WorkloadReference,
};

use crate::error::StoreError;
use crate::store::RecordStore;

fn test_record(repository: &str) -> ImageRecord {
    let digest = "sha256:feedface0123456789abcdef0123456789abcdef0123456789abcdef01234567";
    let reference = ImageReference {
        registry: "registry.redhat.io".to_owned(),
        repository: repository.to_owned(),
        tag: None,
        digest: digest.to_owned(),
        full_reference: format!("registry.redhat.io/{repository}@{digest}"),
    };
    let now = DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default();
    ImageRecord::new(&reference, CertificationStatus::Pending, now)
}

async fn fetch(store: &dyn RecordStore, key: &str) -> Result<ImageRecord, StoreError> {
    store
        .get(key)
        .await?
        .ok_or_else(|| StoreError::NotFound(key.to_owned()))
}

/// Run the full record store conformance suite.
///
/// Call this from your backend's test module with a fresh, empty store.
///
/// # Errors
///
/// Returns an error if a store operation fails unexpectedly.
///
/// # Panics
///
/// Panics when the backend violates the store contract.
pub async fn run_record_store_conformance_tests(
    store: &dyn RecordStore,
) -> Result<(), StoreError> {
    test_get_missing(store).await?;
    test_create_and_get(store).await?;
    test_create_duplicate(store).await?;
    test_update_status(store).await?;
    test_stale_status_write_conflicts(store).await?;
    test_update_metadata_keeps_status(store).await?;
    test_update_missing(store).await?;
    test_list(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn RecordStore) -> Result<(), StoreError> {
    let found = store.get("no.such.record").await?;
    assert!(found.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_create_and_get(store: &dyn RecordStore) -> Result<(), StoreError> {
    let record = test_record("create/get");
    let created = store.create(&record).await?;
    assert!(created.resource_version > 0, "create must assign a version");
    assert_eq!(created.key, record.key);

    let fetched = fetch(store, &record.key).await?;
    assert_eq!(fetched.spec, record.spec);
    assert_eq!(fetched.resource_version, created.resource_version);
    Ok(())
}

async fn test_create_duplicate(store: &dyn RecordStore) -> Result<(), StoreError> {
    let record = test_record("create/dup");
    store.create(&record).await?;
    let Err(err) = store.create(&record).await else {
        panic!("duplicate create of {} succeeded", record.key);
    };
    assert!(
        matches!(err, StoreError::AlreadyExists(_)),
        "expected AlreadyExists, got {err:?}"
    );
    Ok(())
}

async fn test_update_status(store: &dyn RecordStore) -> Result<(), StoreError> {
    let mut record = store.create(&test_record("status/update")).await?;
    let version = record.resource_version;
    record.status.certification_status = CertificationStatus::Certified;
    record
        .status
        .add_reference(WorkloadReference::new("ns", "pod", "app"));
    record.spec.repository = "tampered".to_owned();

    let updated = store.update_status(&record).await?;
    assert!(updated.resource_version > version, "version must advance");
    assert_eq!(
        updated.status.certification_status,
        CertificationStatus::Certified
    );
    assert_eq!(updated.spec.repository, "status/update", "spec is immutable");

    let fetched = fetch(store, &record.key).await?;
    assert_eq!(fetched.status.workload_references.len(), 1);
    Ok(())
}

async fn test_stale_status_write_conflicts(store: &dyn RecordStore) -> Result<(), StoreError> {
    let original = store.create(&test_record("status/stale")).await?;

    let mut first = original.clone();
    first.status.certification_status = CertificationStatus::Certified;
    store.update_status(&first).await?;

    let mut stale = original;
    stale.status.certification_status = CertificationStatus::Error;
    let Err(err) = store.update_status(&stale).await else {
        panic!("stale status write to {} succeeded", stale.key);
    };
    assert!(err.is_conflict(), "expected Conflict, got {err:?}");

    let fetched = fetch(store, &stale.key).await?;
    assert_eq!(
        fetched.status.certification_status,
        CertificationStatus::Certified
    );
    Ok(())
}

async fn test_update_metadata_keeps_status(store: &dyn RecordStore) -> Result<(), StoreError> {
    let mut record = store.create(&test_record("metadata/update")).await?;
    record.status.certification_status = CertificationStatus::Certified;
    let mut record = store.update_status(&record).await?;

    record
        .annotations
        .insert(CVE_ANNOTATION.to_owned(), "CVE-2025-0001".to_owned());
    record.status.certification_status = CertificationStatus::Error;
    let updated = store.update_metadata(&record).await?;

    assert_eq!(updated.cves(), ["CVE-2025-0001"]);
    assert_eq!(
        updated.status.certification_status,
        CertificationStatus::Certified,
        "metadata writes must not touch status"
    );
    Ok(())
}

async fn test_update_missing(store: &dyn RecordStore) -> Result<(), StoreError> {
    let record = test_record("never/created");
    let Err(err) = store.update_status(&record).await else {
        panic!("status write to missing {} succeeded", record.key);
    };
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
    Ok(())
}

async fn test_list(store: &dyn RecordStore) -> Result<(), StoreError> {
    let records = store.list().await?;
    let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
    for repository in ["create/get", "status/update", "metadata/update"] {
        let key = test_record(repository).key;
        assert!(keys.contains(&key.as_str()), "list is missing {key}");
    }
    Ok(())
}
