use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use imagecert_core::{ImageRecord, is_certification_eligible, is_docker_hub};

use super::super::BackgroundProcessor;
use crate::enrichment::EnrichmentOutcome;
use crate::error::InventoryError;
use crate::summary::InventorySummary;

/// Outcome of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub records_scanned: usize,
    /// Eligible records checked within the interval and left alone.
    pub skipped_fresh: usize,
    pub certified: usize,
    pub not_certified: usize,
    pub failed: usize,
    pub dropped: usize,
    pub hub_refreshed: usize,
    /// The cycle stopped early because it was cancelled.
    pub cancelled: bool,
}

impl RefreshReport {
    /// Records whose certification was looked up this cycle.
    pub fn refreshed(&self) -> usize {
        self.certified + self.not_certified + self.failed + self.dropped
    }
}

fn due(last_check: Option<DateTime<Utc>>, interval: TimeDelta, now: DateTime<Utc>) -> bool {
    last_check.is_none_or(|checked| now - checked >= interval)
}

impl BackgroundProcessor {
    /// Refresh certification data for every eligible record whose last
    /// check is older than the refresh interval, one record at a time.
    ///
    /// Records checked more recently are skipped, so a large inventory is
    /// refreshed in slices across cycles. Docker Hub records get the same
    /// treatment against the secondary source. The inventory summary is
    /// recomputed at the end of the cycle.
    pub async fn refresh_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport, InventoryError> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let interval = TimeDelta::from_std(self.config.refresh_interval).unwrap_or(TimeDelta::MAX);
        let records = self.store.list().await?;
        let mut report = RefreshReport {
            records_scanned: records.len(),
            ..RefreshReport::default()
        };

        if self.enricher.has_certification_source() {
            self.refresh_certification(&records, interval, now, cancel, &mut report)
                .await;
        }
        if self.enricher.has_hub_source() && !report.cancelled {
            self.refresh_hub(&records, interval, now, cancel, &mut report)
                .await;
        }

        match self.store.list().await {
            Ok(all) => self
                .metrics
                .set_summary(InventorySummary::from_records(&all, Utc::now())),
            Err(e) => warn!(error = %e, "failed to recompute inventory summary"),
        }
        self.metrics.record_refresh_cycle(started.elapsed());
        Ok(report)
    }

    async fn refresh_certification(
        &self,
        records: &[ImageRecord],
        interval: TimeDelta,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut RefreshReport,
    ) {
        for record in records {
            if !is_certification_eligible(&record.spec.registry) {
                continue;
            }
            if !due(record.status.last_certification_check_at, interval, now) {
                report.skipped_fresh += 1;
                continue;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            match self.enricher.enrich_certification(&record.key, cancel).await {
                Ok(EnrichmentOutcome::Found) => report.certified += 1,
                Ok(EnrichmentOutcome::Absent) => report.not_certified += 1,
                Ok(EnrichmentOutcome::Failed(_)) => report.failed += 1,
                Ok(EnrichmentOutcome::Dropped) => report.dropped += 1,
                Ok(EnrichmentOutcome::Skipped) => continue,
                Ok(EnrichmentOutcome::Cancelled) => {
                    report.cancelled = true;
                    return;
                }
                Err(e) => {
                    warn!(key = %record.key, error = %e, "certification refresh failed");
                    report.failed += 1;
                }
            }
            self.metrics.increment_images_refreshed();
        }
    }

    async fn refresh_hub(
        &self,
        records: &[ImageRecord],
        interval: TimeDelta,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut RefreshReport,
    ) {
        for record in records {
            if !is_docker_hub(&record.spec.registry)
                || !due(record.status.last_hub_check_at, interval, now)
            {
                continue;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            match self.enricher.enrich_hub(&record.key, cancel).await {
                Ok(EnrichmentOutcome::Found | EnrichmentOutcome::Absent) => {
                    report.hub_refreshed += 1;
                }
                Ok(EnrichmentOutcome::Cancelled) => {
                    report.cancelled = true;
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(key = %record.key, error = %e, "hub refresh failed"),
            }
        }
    }

    pub(crate) async fn run_refresh_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.refresh_interval;
        if period.is_zero() {
            info!("certification refresh disabled");
            return;
        }
        let jitter = startup_jitter(self.config.refresh_jitter_max);
        info!(?period, ?jitter, "certification refresh starting");

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(jitter) => {}
        }

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.refresh_cycle(&cancel).await {
                        Ok(report) => info!(
                            refreshed = report.refreshed(),
                            skipped = report.skipped_fresh,
                            failed = report.failed,
                            hub = report.hub_refreshed,
                            "certification refresh cycle completed"
                        ),
                        Err(e) => error!(error = %e, "error running certification refresh"),
                    }
                }
            }
        }
        debug!("certification refresh stopped");
    }
}

/// Random delay in `[0, max]` so that restarted replicas do not refresh in
/// lockstep.
fn startup_jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use imagecert_client::StaticClient;
    use imagecert_core::{
        CertificationData, CertificationStatus, HealthGrade, HubRepository, parse_image_id,
    };
    use imagecert_store::RecordStore;
    use imagecert_store_memory::{MemoryRecordStore, MemoryWorkloadSource};

    use super::*;
    use crate::background::tests::enricher;
    use crate::background::{BackgroundConfig, BackgroundProcessorBuilder};
    use crate::metrics::InventoryMetrics;

    const DAY: Duration = Duration::from_secs(86_400);

    struct Fixture {
        store: Arc<MemoryRecordStore>,
        source: Arc<StaticClient<CertificationData>>,
        metrics: Arc<InventoryMetrics>,
        processor: Arc<BackgroundProcessor>,
    }

    fn fixture(hub: Option<Arc<StaticClient<HubRepository>>>) -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let metrics = Arc::new(InventoryMetrics::default());
        let source = Arc::new(StaticClient::found(CertificationData {
            health_index: "B".into(),
            ..CertificationData::default()
        }));
        let secondary = hub.map(|h| h as crate::enrichment::SecondarySource);
        let processor = BackgroundProcessorBuilder::new()
            .config(BackgroundConfig {
                refresh_interval: DAY,
                refresh_jitter_max: Duration::from_secs(300),
                ..BackgroundConfig::default()
            })
            .store(store.clone())
            .workloads(Arc::new(MemoryWorkloadSource::new()))
            .enricher(enricher(
                store.clone(),
                Some(source.clone()),
                secondary,
                metrics.clone(),
            ))
            .metrics(metrics.clone())
            .build()
            .unwrap();
        Fixture {
            store,
            source,
            metrics,
            processor: Arc::new(processor),
        }
    }

    async fn seed(
        store: &MemoryRecordStore,
        image: &str,
        last_check: Option<DateTime<Utc>>,
    ) -> String {
        let reference = parse_image_id(&format!("{image}@sha256:{}", "c".repeat(64))).unwrap();
        let mut record = ImageRecord::new(&reference, CertificationStatus::Unknown, Utc::now());
        record.status.last_certification_check_at = last_check;
        store.create(&record).await.unwrap();
        record.key
    }

    #[tokio::test]
    async fn only_stale_eligible_records_are_refreshed() {
        let fx = fixture(None);
        let now = Utc::now();
        let fresh_check = now - TimeDelta::hours(2);
        let fresh = seed(&fx.store, "registry.redhat.io/ubi9/fresh", Some(fresh_check)).await;
        let stale = seed(
            &fx.store,
            "registry.redhat.io/ubi9/stale",
            Some(now - TimeDelta::hours(25)),
        )
        .await;
        let never = seed(&fx.store, "registry.access.redhat.com/ubi8/never", None).await;
        let other = seed(&fx.store, "quay.io/acme/web", None).await;

        let report = fx
            .processor
            .refresh_cycle(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.records_scanned, 4);
        assert_eq!(report.skipped_fresh, 1);
        assert_eq!(report.certified, 2);
        assert_eq!(fx.source.call_count(), 2);

        let fresh = fx.store.get(&fresh).await.unwrap().unwrap();
        assert_eq!(fresh.status.certification_status, CertificationStatus::Unknown);
        assert_eq!(fresh.status.last_certification_check_at, Some(fresh_check));
        assert_eq!(fresh.resource_version, 1);

        for key in [&stale, &never] {
            let record = fx.store.get(key).await.unwrap().unwrap();
            assert_eq!(
                record.status.certification_status,
                CertificationStatus::Certified
            );
            assert!(record.status.last_certification_check_at.unwrap() >= now);
        }

        let other = fx.store.get(&other).await.unwrap().unwrap();
        assert!(other.status.last_certification_check_at.is_none());
    }

    #[tokio::test]
    async fn second_cycle_is_a_noop() {
        let fx = fixture(None);
        seed(&fx.store, "registry.redhat.io/ubi9/ubi", None).await;

        let cancel = CancellationToken::new();
        fx.processor.refresh_cycle(&cancel).await.unwrap();
        let report = fx.processor.refresh_cycle(&cancel).await.unwrap();
        assert_eq!(report.refreshed(), 0);
        assert_eq!(report.skipped_fresh, 1);
        assert_eq!(fx.source.call_count(), 1);
    }

    #[tokio::test]
    async fn summary_is_published() {
        let fx = fixture(None);
        seed(&fx.store, "registry.redhat.io/ubi9/ubi", None).await;
        seed(&fx.store, "quay.io/acme/web", None).await;

        fx.processor
            .refresh_cycle(&CancellationToken::new())
            .await
            .unwrap();
        let summary = fx.metrics.summary().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_status.get(&CertificationStatus::Certified), Some(&1));
        assert_eq!(summary.by_health.get(&HealthGrade::B), Some(&1));

        let snap = fx.metrics.snapshot();
        assert_eq!(snap.refresh_cycles, 1);
        assert_eq!(snap.images_refreshed, 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_stops_early() {
        let fx = fixture(None);
        seed(&fx.store, "registry.redhat.io/ubi9/ubi", None).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = fx.processor.refresh_cycle(&cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(fx.source.call_count(), 0);
    }

    #[tokio::test]
    async fn hub_pass_covers_docker_hub_records() {
        let hub = Arc::new(StaticClient::found(HubRepository {
            namespace: "library".into(),
            name: "nginx".into(),
            pull_count: 5_000,
            ..HubRepository::default()
        }));
        let fx = fixture(Some(hub.clone()));
        let key = seed(&fx.store, "nginx", None).await;
        seed(&fx.store, "quay.io/acme/web", None).await;

        let report = fx
            .processor
            .refresh_cycle(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.hub_refreshed, 1);
        assert_eq!(report.certified, 0);
        assert_eq!(hub.call_count(), 1);

        let record = fx.store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status.hub.unwrap().pull_count_display, "5K");
        assert_eq!(record.status.certification_status, CertificationStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_waits_for_jitter_then_runs_each_interval() {
        let fx = fixture(None);
        seed(&fx.store, "registry.redhat.io/ubi9/ubi", None).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&fx.processor).run_refresh_loop(cancel.clone()));

        // The first cycle lands somewhere within the jitter window.
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(fx.metrics.snapshot().refresh_cycles, 1);

        tokio::time::sleep(DAY).await;
        assert_eq!(fx.metrics.snapshot().refresh_cycles, 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn jitter_stays_in_bounds() {
        assert_eq!(startup_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(startup_jitter(Duration::from_secs(300)) <= Duration::from_secs(300));
        }
    }
}
