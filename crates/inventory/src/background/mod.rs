//! Background processor for periodic inventory tasks.
//!
//! The background processor handles:
//! - Dropping workload references whose workload no longer exists
//! - Refreshing certification data for records not checked recently
//! - Sweeping expired entries from the lookup caches
//!
//! Each task runs on its own timer under its own child cancellation token.

mod workers;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use imagecert_client::CacheSweep;
use imagecert_store::{RecordStore, WorkloadSource};

use crate::enrichment::Enricher;
use crate::error::InventoryError;
use crate::metrics::InventoryMetrics;

pub use workers::refresh::RefreshReport;
pub use workers::stale_references::StaleReferenceReport;

/// Configuration for the background processor.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// How often to drop stale workload references (default: 5 minutes).
    pub cleanup_interval: Duration,
    /// Whether stale reference cleanup is enabled (default: true).
    pub enable_stale_reference_cleanup: bool,
    /// How often to refresh certification data (default: 24 hours).
    /// Zero disables refreshing.
    pub refresh_interval: Duration,
    /// Upper bound of the random delay before the first refresh cycle
    /// (default: 5 minutes).
    pub refresh_jitter_max: Duration,
    /// How often to sweep expired cache entries (default: 30 minutes).
    pub cache_sweep_interval: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(300),
            enable_stale_reference_cleanup: true,
            refresh_interval: Duration::from_secs(24 * 3600),
            refresh_jitter_max: Duration::from_secs(300),
            cache_sweep_interval: Duration::from_secs(1800),
        }
    }
}

/// Background processor for periodic inventory tasks.
pub struct BackgroundProcessor {
    pub(crate) config: BackgroundConfig,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) workloads: Arc<dyn WorkloadSource>,
    pub(crate) enricher: Arc<Enricher>,
    pub(crate) caches: Vec<Arc<dyn CacheSweep>>,
    pub(crate) metrics: Arc<InventoryMetrics>,
}

impl BackgroundProcessor {
    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Start every enabled worker under a child of `parent`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self: Arc<Self>, parent: &CancellationToken) -> BackgroundHandle {
        let cancel = parent.child_token();
        let tracker = TaskTracker::new();

        if self.config.enable_stale_reference_cleanup {
            tracker.spawn(
                Arc::clone(&self).run_stale_reference_loop(cancel.child_token()),
            );
        }
        if !self.config.refresh_interval.is_zero() {
            tracker.spawn(Arc::clone(&self).run_refresh_loop(cancel.child_token()));
        }
        if !self.caches.is_empty() {
            tracker.spawn(Arc::clone(&self).run_cache_sweep_loop(cancel.child_token()));
        }
        tracker.close();

        info!(workers = tracker.len(), "background processor started");
        BackgroundHandle { cancel, tracker }
    }
}

/// Handle to the running background workers.
#[derive(Debug)]
pub struct BackgroundHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl BackgroundHandle {
    /// Number of workers still running.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Signal every worker to stop and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.wait().await;
        info!("background processor stopped");
    }
}

/// Builder for creating a background processor.
#[derive(Default)]
pub struct BackgroundProcessorBuilder {
    config: BackgroundConfig,
    store: Option<Arc<dyn RecordStore>>,
    workloads: Option<Arc<dyn WorkloadSource>>,
    enricher: Option<Arc<Enricher>>,
    caches: Vec<Arc<dyn CacheSweep>>,
    metrics: Option<Arc<InventoryMetrics>>,
}

impl BackgroundProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: BackgroundConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn workloads(mut self, workloads: Arc<dyn WorkloadSource>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    #[must_use]
    pub fn enricher(mut self, enricher: Arc<Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Add a cache to the periodic expiry sweep.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheSweep>) -> Self {
        self.caches.push(cache);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<InventoryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<BackgroundProcessor, InventoryError> {
        Ok(BackgroundProcessor {
            config: self.config,
            store: self.store.ok_or(InventoryError::MissingComponent("record store"))?,
            workloads: self
                .workloads
                .ok_or(InventoryError::MissingComponent("workload source"))?,
            enricher: self
                .enricher
                .ok_or(InventoryError::MissingComponent("enricher"))?,
            caches: self.caches,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}
