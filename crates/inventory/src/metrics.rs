use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use imagecert_core::CertificationStatus;

use crate::notify::Reason;
use crate::summary::InventorySummary;

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Counters for reconciliation, enrichment and background work.
///
/// Counters use relaxed ordering. Status transitions and the latest
/// inventory summary are kept behind locks and read through
/// [`status_transitions`](Self::status_transitions) and
/// [`summary`](Self::summary).
#[derive(Debug, Default)]
pub struct InventoryMetrics {
    pub reconcile_success: AtomicU64,
    pub reconcile_errors: AtomicU64,
    pub reconcile_duration_us: AtomicU64,
    pub images_discovered: AtomicU64,
    /// Containers skipped because their image id could not be parsed.
    pub containers_skipped: AtomicU64,
    pub enrichments_dispatched: AtomicU64,
    pub enrichments_failed: AtomicU64,
    /// Status writes abandoned after the conflict retry.
    pub writes_dropped: AtomicU64,
    pub notifications_discovered: AtomicU64,
    pub notifications_certification_changed: AtomicU64,
    pub notifications_vulnerabilities: AtomicU64,
    pub notifications_eol: AtomicU64,
    pub notifications_health_degraded: AtomicU64,
    pub refresh_cycles: AtomicU64,
    pub refresh_duration_us: AtomicU64,
    pub images_refreshed: AtomicU64,
    pub stale_sweeps: AtomicU64,
    pub stale_references_removed: AtomicU64,
    pub cache_entries_swept: AtomicU64,
    transitions: Mutex<BTreeMap<(CertificationStatus, CertificationStatus), u64>>,
    summary: RwLock<Option<InventorySummary>>,
}

impl InventoryMetrics {
    pub fn record_reconcile(&self, ok: bool, elapsed: Duration) {
        let counter = if ok {
            &self.reconcile_success
        } else {
            &self.reconcile_errors
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.reconcile_duration_us
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub fn increment_discovered(&self) {
        self.images_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_containers_skipped(&self) {
        self.containers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_enrichments_dispatched(&self) {
        self.enrichments_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_enrichments_failed(&self) {
        self.enrichments_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_writes_dropped(&self) {
        self.writes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notification(&self, reason: Reason) {
        let counter = match reason {
            Reason::ImageDiscovered => &self.notifications_discovered,
            Reason::CertificationChanged => &self.notifications_certification_changed,
            Reason::VulnerabilitiesFound => &self.notifications_vulnerabilities,
            Reason::EolApproaching => &self.notifications_eol,
            Reason::HealthDegraded => &self.notifications_health_degraded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_cycle(&self, elapsed: Duration) {
        self.refresh_cycles.fetch_add(1, Ordering::Relaxed);
        self.refresh_duration_us
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    pub fn increment_images_refreshed(&self) {
        self.images_refreshed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_sweep(&self, removed: u64) {
        self.stale_sweeps.fetch_add(1, Ordering::Relaxed);
        self.stale_references_removed
            .fetch_add(removed, Ordering::Relaxed);
    }

    pub fn add_cache_entries_swept(&self, n: u64) {
        self.cache_entries_swept.fetch_add(n, Ordering::Relaxed);
    }

    /// Count a certification status change. Unchanged statuses are ignored.
    pub fn record_transition(&self, from: CertificationStatus, to: CertificationStatus) {
        if from != to {
            *self.transitions.lock().entry((from, to)).or_default() += 1;
        }
    }

    /// Status change counts keyed by `(from, to)`.
    pub fn status_transitions(&self) -> BTreeMap<(CertificationStatus, CertificationStatus), u64> {
        self.transitions.lock().clone()
    }

    /// Replace the published inventory summary.
    pub fn set_summary(&self, summary: InventorySummary) {
        *self.summary.write() = Some(summary);
    }

    /// The summary published by the most recent refresh cycle.
    pub fn summary(&self) -> Option<InventorySummary> {
        self.summary.read().clone()
    }

    /// Take a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> InventoryMetricsSnapshot {
        InventoryMetricsSnapshot {
            reconcile_success: self.reconcile_success.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
            reconcile_duration_us: self.reconcile_duration_us.load(Ordering::Relaxed),
            images_discovered: self.images_discovered.load(Ordering::Relaxed),
            containers_skipped: self.containers_skipped.load(Ordering::Relaxed),
            enrichments_dispatched: self.enrichments_dispatched.load(Ordering::Relaxed),
            enrichments_failed: self.enrichments_failed.load(Ordering::Relaxed),
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
            notifications_discovered: self.notifications_discovered.load(Ordering::Relaxed),
            notifications_certification_changed: self
                .notifications_certification_changed
                .load(Ordering::Relaxed),
            notifications_vulnerabilities: self
                .notifications_vulnerabilities
                .load(Ordering::Relaxed),
            notifications_eol: self.notifications_eol.load(Ordering::Relaxed),
            notifications_health_degraded: self
                .notifications_health_degraded
                .load(Ordering::Relaxed),
            refresh_cycles: self.refresh_cycles.load(Ordering::Relaxed),
            refresh_duration_us: self.refresh_duration_us.load(Ordering::Relaxed),
            images_refreshed: self.images_refreshed.load(Ordering::Relaxed),
            stale_sweeps: self.stale_sweeps.load(Ordering::Relaxed),
            stale_references_removed: self.stale_references_removed.load(Ordering::Relaxed),
            cache_entries_swept: self.cache_entries_swept.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of the [`InventoryMetrics`] counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryMetricsSnapshot {
    pub reconcile_success: u64,
    pub reconcile_errors: u64,
    pub reconcile_duration_us: u64,
    pub images_discovered: u64,
    pub containers_skipped: u64,
    pub enrichments_dispatched: u64,
    pub enrichments_failed: u64,
    pub writes_dropped: u64,
    pub notifications_discovered: u64,
    pub notifications_certification_changed: u64,
    pub notifications_vulnerabilities: u64,
    pub notifications_eol: u64,
    pub notifications_health_degraded: u64,
    pub refresh_cycles: u64,
    pub refresh_duration_us: u64,
    pub images_refreshed: u64,
    pub stale_sweeps: u64,
    pub stale_references_removed: u64,
    pub cache_entries_swept: u64,
}
