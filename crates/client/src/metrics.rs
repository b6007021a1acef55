use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomic counters for one certification source and its decorators.
///
/// Each source gets its own instance, so the counters are implicitly
/// labelled by endpoint. Relaxed ordering throughout; use
/// [`snapshot`](Self::snapshot) for a point-in-time view.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Lookups that returned a record.
    pub lookups_found: AtomicU64,
    /// Lookups the source answered with "no such record".
    pub lookups_not_found: AtomicU64,
    /// Lookups that failed inside the source.
    pub lookups_failed: AtomicU64,
    /// Lookups abandoned while waiting for a rate-limit token.
    pub lookups_cancelled: AtomicU64,
    /// Cumulative time spent inside the source, in microseconds.
    pub lookup_duration_us: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    /// Entries removed by expiry sweeps.
    pub cache_evictions: AtomicU64,
    /// Lookups that had to wait for a rate-limit token.
    pub rate_limit_waits: AtomicU64,
}

/// Outcome of a single source lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Found,
    NotFound,
    Failed,
}

impl ClientMetrics {
    /// Record a completed lookup and the time it took.
    pub fn record_lookup(&self, outcome: LookupOutcome, elapsed: Duration) {
        let counter = match outcome {
            LookupOutcome::Found => &self.lookups_found,
            LookupOutcome::NotFound => &self.lookups_not_found,
            LookupOutcome::Failed => &self.lookups_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.lookup_duration_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn increment_cancelled(&self) {
        self.lookups_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_cache_evictions(&self, n: u64) {
        self.cache_evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_rate_limit_wait(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            lookups_found: self.lookups_found.load(Ordering::Relaxed),
            lookups_not_found: self.lookups_not_found.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            lookups_cancelled: self.lookups_cancelled.load(Ordering::Relaxed),
            lookup_duration_us: self.lookup_duration_us.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`ClientMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetricsSnapshot {
    pub lookups_found: u64,
    pub lookups_not_found: u64,
    pub lookups_failed: u64,
    pub lookups_cancelled: u64,
    pub lookup_duration_us: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub rate_limit_waits: u64,
}

impl ClientMetricsSnapshot {
    /// Lookups that actually reached the source.
    pub fn total_lookups(&self) -> u64 {
        self.lookups_found + self.lookups_not_found + self.lookups_failed
    }
}
