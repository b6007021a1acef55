//! Workload observation: turn running containers into inventory records.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use imagecert_core::{
    CertificationStatus, ImageRecord, ImageReference, Workload, WorkloadReference,
    is_certification_eligible, parse_image_id,
};
use imagecert_store::{RecordStore, StoreError, WorkloadSource};

use crate::dispatch::EnrichmentDispatcher;
use crate::error::InventoryError;
use crate::metrics::InventoryMetrics;
use crate::notify::{Notification, Notifier, Reason, publish};
use crate::write;

/// Per-pass counts returned by [`Reconciler::observe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// New records created.
    pub created: usize,
    /// Existing records that gained a workload reference.
    pub updated: usize,
    /// Existing records that already carried the reference; only their
    /// last-seen time moved.
    pub unchanged: usize,
    /// Containers whose image id could not be parsed.
    pub skipped: usize,
    /// Containers whose record could not be read or written.
    pub errors: usize,
}

enum Observed {
    Created,
    Updated,
    Unchanged,
}

/// Records every image a workload runs.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    workloads: Arc<dyn WorkloadSource>,
    dispatcher: Arc<EnrichmentDispatcher>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<InventoryMetrics>,
    certification_enabled: bool,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        workloads: Arc<dyn WorkloadSource>,
        dispatcher: Arc<EnrichmentDispatcher>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<InventoryMetrics>,
        certification_enabled: bool,
    ) -> Self {
        Self {
            store,
            workloads,
            dispatcher,
            notifier,
            metrics,
            certification_enabled,
        }
    }

    /// Read the workload `namespace/name` and observe it.
    ///
    /// A workload that no longer exists is a successful no-op. Failure to
    /// read the workload is the only error returned; it is not retried here.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileSummary, InventoryError> {
        let started = Instant::now();
        let workload = match self.workloads.get_workload(namespace, name).await {
            Ok(w) => w,
            Err(e) => {
                warn!(namespace, name, error = %e, "failed to read workload");
                self.metrics.record_reconcile(false, started.elapsed());
                return Err(e.into());
            }
        };
        let summary = match workload {
            Some(w) => self.observe(&w).await,
            None => {
                debug!(namespace, name, "workload not found, nothing to reconcile");
                ReconcileSummary::default()
            }
        };
        self.metrics.record_reconcile(true, started.elapsed());
        Ok(summary)
    }

    /// Record every image of an active workload.
    ///
    /// Per-container failures are counted and logged and never abort the
    /// pass. Workloads in a terminal phase are ignored.
    pub async fn observe(&self, workload: &Workload) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        if !workload.phase.is_active() {
            debug!(
                namespace = %workload.namespace,
                name = %workload.name,
                phase = ?workload.phase,
                "skipping inactive workload"
            );
            return summary;
        }

        for container in workload.all_containers() {
            if container.image_id.is_empty() {
                continue;
            }
            let reference = match parse_image_id(&container.image_id) {
                Ok(r) => r,
                Err(e) => {
                    debug!(
                        container = %container.name,
                        image_id = %container.image_id,
                        error = %e,
                        "skipping unparseable image id"
                    );
                    self.metrics.increment_containers_skipped();
                    summary.skipped += 1;
                    continue;
                }
            };
            let wref = WorkloadReference::new(
                workload.namespace.as_str(),
                workload.name.as_str(),
                container.name.as_str(),
            );
            match self.observe_container(&reference, wref, Utc::now()).await {
                Ok(Observed::Created) => summary.created += 1,
                Ok(Observed::Updated) => summary.updated += 1,
                Ok(Observed::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    if e.is_conflict() {
                        self.metrics.increment_writes_dropped();
                    }
                    warn!(
                        image = %reference,
                        container = %container.name,
                        error = %e,
                        "failed to record image"
                    );
                    summary.errors += 1;
                }
            }
        }
        summary
    }

    async fn observe_container(
        &self,
        reference: &ImageReference,
        wref: WorkloadReference,
        now: DateTime<Utc>,
    ) -> Result<Observed, StoreError> {
        let key = reference.record_key();
        if self.store.get(&key).await?.is_some() {
            return self.add_reference(&key, wref, now).await;
        }

        let enrich = self.certification_enabled && is_certification_eligible(&reference.registry);
        let initial = if enrich {
            CertificationStatus::Pending
        } else {
            CertificationStatus::Unknown
        };
        let mut record = ImageRecord::new(reference, initial, now);
        record.status.add_reference(wref.clone());

        match self.store.create(&record).await {
            Ok(created) => {
                info!(
                    key = %created.key,
                    registry_type = created.status.registry_type.as_str(),
                    "discovered image"
                );
                self.metrics.increment_discovered();
                publish(
                    self.notifier.as_ref(),
                    &self.metrics,
                    [Notification::new(
                        created.key.as_str(),
                        Reason::ImageDiscovered,
                        format!("Discovered image {}", reference.full_reference),
                    )],
                );
                if enrich {
                    self.dispatcher.dispatch(created.key);
                }
                Ok(Observed::Created)
            }
            // Another reconciliation created it first.
            Err(StoreError::AlreadyExists(_)) => self.add_reference(&key, wref, now).await,
            Err(e) => Err(e),
        }
    }

    async fn add_reference(
        &self,
        key: &str,
        wref: WorkloadReference,
        now: DateTime<Utc>,
    ) -> Result<Observed, StoreError> {
        let written = write::update_status(self.store.as_ref(), key, |r| {
            r.status.last_seen_at = now;
            Some(r.status.add_reference(wref.clone()))
        })
        .await?;
        Ok(match written {
            Some((_, true)) => Observed::Updated,
            _ => Observed::Unchanged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagecert_client::StaticClient;
    use imagecert_core::{CertificationData, WorkloadPhase};
    use imagecert_store_memory::{MemoryRecordStore, MemoryWorkloadSource};
    use tokio_util::sync::CancellationToken;

    use crate::enrichment::Enricher;
    use crate::notify::RecordingNotifier;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        workloads: Arc<MemoryWorkloadSource>,
        source: Arc<StaticClient<CertificationData>>,
        notifier: Arc<RecordingNotifier>,
        metrics: Arc<InventoryMetrics>,
        dispatcher: Arc<EnrichmentDispatcher>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let workloads = Arc::new(MemoryWorkloadSource::new());
        let source = Arc::new(StaticClient::found(CertificationData {
            health_index: "A".into(),
            ..CertificationData::default()
        }));
        let notifier = Arc::new(RecordingNotifier::new());
        let metrics = Arc::new(InventoryMetrics::default());
        let enricher = Arc::new(Enricher::new(
            store.clone(),
            Some(source.clone()),
            None,
            notifier.clone(),
            metrics.clone(),
        ));
        let dispatcher = Arc::new(EnrichmentDispatcher::new(
            enricher,
            2,
            CancellationToken::new(),
            metrics.clone(),
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            workloads.clone(),
            dispatcher.clone(),
            notifier.clone(),
            metrics.clone(),
            true,
        );
        Fixture {
            store,
            workloads,
            source,
            notifier,
            metrics,
            dispatcher,
            reconciler,
        }
    }

    fn image(repo: &str) -> String {
        format!("docker-pullable://{repo}@{DIGEST}")
    }

    #[tokio::test]
    async fn first_observation_creates_record() {
        let fx = fixture();
        let pod = Workload::new("default", "web", WorkloadPhase::Running)
            .with_container("app", image("quay.io/acme/web"));

        let summary = fx.reconciler.observe(&pod).await;
        assert_eq!(summary.created, 1);

        let records = fx.store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.key, "quay.io.acme.web.01234567");
        assert_eq!(
            record.status.certification_status,
            CertificationStatus::Unknown
        );
        assert_eq!(
            record.status.workload_references,
            vec![WorkloadReference::new("default", "web", "app")]
        );
        assert_eq!(fx.notifier.with_reason(Reason::ImageDiscovered).len(), 1);
        assert_eq!(fx.metrics.snapshot().images_discovered, 1);
    }

    #[tokio::test]
    async fn replay_does_not_duplicate_reference() {
        let fx = fixture();
        let pod = Workload::new("default", "web", WorkloadPhase::Running)
            .with_container("app", image("quay.io/acme/web"));

        fx.reconciler.observe(&pod).await;
        let first = fx.store.list().await.unwrap().remove(0);
        let summary = fx.reconciler.observe(&pod).await;
        assert_eq!(summary.unchanged, 1);

        let second = fx.store.list().await.unwrap().remove(0);
        assert_eq!(second.status.workload_references.len(), 1);
        assert!(second.status.last_seen_at >= first.status.last_seen_at);
        assert_eq!(fx.notifier.with_reason(Reason::ImageDiscovered).len(), 1);
    }

    #[tokio::test]
    async fn second_workload_adds_reference() {
        let fx = fixture();
        let a = Workload::new("default", "a", WorkloadPhase::Running)
            .with_container("app", image("quay.io/acme/web"));
        let b = Workload::new("other", "b", WorkloadPhase::Pending)
            .with_init_container("init", image("quay.io/acme/web"));

        fx.reconciler.observe(&a).await;
        let summary = fx.reconciler.observe(&b).await;
        assert_eq!(summary.updated, 1);

        let record = fx.store.list().await.unwrap().remove(0);
        assert_eq!(record.status.workload_references.len(), 2);
    }

    #[tokio::test]
    async fn terminal_phase_creates_nothing() {
        let fx = fixture();
        for phase in [WorkloadPhase::Succeeded, WorkloadPhase::Failed] {
            let pod = Workload::new("default", "job", phase)
                .with_container("app", image("registry.redhat.io/ubi9/ubi"));
            let summary = fx.reconciler.observe(&pod).await;
            assert_eq!(summary, ReconcileSummary::default());
        }
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn bad_image_ids_are_skipped_not_fatal() {
        let fx = fixture();
        let pod = Workload::new("default", "web", WorkloadPhase::Running)
            .with_container("tagged-only", "quay.io/acme/web:1.0")
            .with_container("waiting", "")
            .with_container("app", image("quay.io/acme/web"));

        let summary = fx.reconciler.observe(&pod).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(fx.metrics.snapshot().containers_skipped, 1);
    }

    #[tokio::test]
    async fn eligible_registry_is_enriched_in_background() {
        let fx = fixture();
        let pod = Workload::new("default", "web", WorkloadPhase::Running)
            .with_container("app", image("registry.redhat.io/ubi9/ubi"));

        fx.reconciler.observe(&pod).await;
        fx.dispatcher.wait_idle().await;

        assert_eq!(fx.source.call_count(), 1);
        let record = fx.store.list().await.unwrap().remove(0);
        assert_eq!(
            record.status.certification_status,
            CertificationStatus::Certified
        );
    }

    #[tokio::test]
    async fn ineligible_registry_is_never_enriched() {
        let fx = fixture();
        let pod = Workload::new("default", "web", WorkloadPhase::Running)
            .with_container("hub", image("nginx"))
            .with_container("quay", image("quay.io/acme/web"));

        fx.reconciler.observe(&pod).await;
        fx.dispatcher.wait_idle().await;

        assert_eq!(fx.source.call_count(), 0);
        assert_eq!(fx.metrics.snapshot().enrichments_dispatched, 0);
    }

    #[tokio::test]
    async fn missing_workload_is_a_noop() {
        let fx = fixture();
        let summary = fx.reconciler.reconcile("default", "gone").await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(fx.metrics.snapshot().reconcile_success, 1);
    }

    #[tokio::test]
    async fn workload_read_failure_is_surfaced() {
        let fx = fixture();
        fx.workloads.upsert(
            Workload::new("default", "web", WorkloadPhase::Running)
                .with_container("app", image("quay.io/acme/web")),
        );
        fx.workloads.fail_reads("default", "web");

        let err = fx.reconciler.reconcile("default", "web").await.unwrap_err();
        assert!(matches!(err, InventoryError::Store(StoreError::Backend(_))));
        assert_eq!(fx.metrics.snapshot().reconcile_errors, 1);
        assert!(fx.store.is_empty());

        fx.workloads.heal("default", "web");
        let summary = fx.reconciler.reconcile("default", "web").await.unwrap();
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn store_errors_are_isolated_per_container() {
        let fx = fixture();
        let pod = Workload::new("default", "web", WorkloadPhase::Running)
            .with_container("app", image("quay.io/acme/web"));
        fx.reconciler.observe(&pod).await;

        // Both attempts of the reference write conflict.
        fx.store.inject_status_conflicts(2);
        let pod = Workload::new("default", "web2", WorkloadPhase::Running)
            .with_container("app", image("quay.io/acme/web"))
            .with_container("sidecar", image("quay.io/acme/proxy"));
        let summary = fx.reconciler.observe(&pod).await;
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(fx.metrics.snapshot().writes_dropped, 1);
    }
}
