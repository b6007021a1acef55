//! Detached enrichment for newly discovered records.
//!
//! Discovery must never wait on the certification source, so enrichment
//! runs on spawned tasks. Each task carries a child of the dispatcher's
//! token rather than the caller's, so it outlives the reconciliation that
//! triggered it. Concurrency is bounded by a semaphore; the shared rate
//! limiter inside the source still governs the request rate.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::enrichment::{EnrichmentOutcome, Enricher};
use crate::metrics::InventoryMetrics;

/// Default number of enrichments allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Spawns and tracks fire-and-forget certification enrichment.
pub struct EnrichmentDispatcher {
    enricher: Arc<Enricher>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    metrics: Arc<InventoryMetrics>,
}

impl EnrichmentDispatcher {
    pub fn new(
        enricher: Arc<Enricher>,
        max_concurrent: usize,
        cancel: CancellationToken,
        metrics: Arc<InventoryMetrics>,
    ) -> Self {
        Self {
            enricher,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            cancel,
            metrics,
        }
    }

    /// Schedule certification enrichment for `key` and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, key: String) {
        if self.cancel.is_cancelled() {
            debug!(key = %key, "dispatcher shut down, enrichment not scheduled");
            return;
        }
        self.metrics.increment_enrichments_dispatched();

        let enricher = Arc::clone(&self.enricher);
        let permits = Arc::clone(&self.permits);
        let token = self.cancel.child_token();
        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
                () = token.cancelled() => return,
            };
            match enricher.enrich_certification(&key, &token).await {
                Ok(EnrichmentOutcome::Cancelled) => {
                    debug!(key = %key, "enrichment cancelled");
                }
                Ok(outcome) => {
                    debug!(key = %key, ?outcome, "enrichment finished");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "enrichment failed");
                }
            }
        });
    }

    /// Number of enrichment tasks still running or waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every scheduled enrichment has finished. New work may be
    /// dispatched afterwards.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel outstanding enrichment and wait for the tasks to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use imagecert_client::StaticClient;
    use imagecert_core::{CertificationData, CertificationStatus, ImageRecord, parse_image_id};
    use imagecert_store::RecordStore;
    use imagecert_store_memory::MemoryRecordStore;

    use crate::notify::RecordingNotifier;

    async fn setup(
        source: Arc<StaticClient<CertificationData>>,
        max_concurrent: usize,
    ) -> (EnrichmentDispatcher, Arc<MemoryRecordStore>, Vec<String>) {
        let store = Arc::new(MemoryRecordStore::new());
        let mut keys = Vec::new();
        for i in 0..3 {
            let raw = format!("registry.redhat.io/ubi9/app{i}@sha256:{}", "a".repeat(64));
            let reference = parse_image_id(&raw).unwrap();
            let record = ImageRecord::new(&reference, CertificationStatus::Pending, Utc::now());
            store.create(&record).await.unwrap();
            keys.push(record.key);
        }
        let metrics = Arc::new(InventoryMetrics::default());
        let enricher = Arc::new(Enricher::new(
            store.clone(),
            Some(source),
            None,
            Arc::new(RecordingNotifier::new()),
            metrics.clone(),
        ));
        let dispatcher =
            EnrichmentDispatcher::new(enricher, max_concurrent, CancellationToken::new(), metrics);
        (dispatcher, store, keys)
    }

    #[tokio::test]
    async fn dispatched_work_completes() {
        let source = Arc::new(StaticClient::found(CertificationData::default()));
        let (dispatcher, store, keys) = setup(source.clone(), 2).await;
        for key in &keys {
            dispatcher.dispatch(key.clone());
        }
        dispatcher.wait_idle().await;

        assert_eq!(source.call_count(), 3);
        for key in &keys {
            let record = store.get(key).await.unwrap().unwrap();
            assert_eq!(
                record.status.certification_status,
                CertificationStatus::Certified
            );
        }
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let source = Arc::new(
            StaticClient::found(CertificationData::default()).with_delay(Duration::from_secs(1)),
        );
        let (dispatcher, _store, keys) = setup(source.clone(), 1).await;
        for key in &keys {
            dispatcher.dispatch(key.clone());
        }
        // Let the first task take the permit and start its lookup.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.call_count(), 1);
        assert_eq!(dispatcher.in_flight(), 3);

        dispatcher.wait_idle().await;
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_waiting_tasks() {
        let source = Arc::new(
            StaticClient::found(CertificationData::default()).with_delay(Duration::from_secs(60)),
        );
        let (dispatcher, store, keys) = setup(source.clone(), 1).await;
        for key in &keys {
            dispatcher.dispatch(key.clone());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        dispatcher.shutdown().await;

        // Only the task holding the permit reached the source, and it
        // finished its lookup.
        assert_eq!(source.call_count(), 1);
        let mut pending = 0;
        for key in &keys {
            let record = store.get(key).await.unwrap().unwrap();
            if record.status.certification_status == CertificationStatus::Pending {
                pending += 1;
            }
        }
        assert_eq!(pending, 2);

        dispatcher.dispatch(keys[2].clone());
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
