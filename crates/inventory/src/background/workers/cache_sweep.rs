use std::sync::Arc;

use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::super::BackgroundProcessor;

impl BackgroundProcessor {
    /// Remove expired entries from every registered lookup cache.
    pub fn sweep_caches(&self) -> usize {
        let mut total = 0;
        for cache in &self.caches {
            let removed = cache.sweep_expired();
            if removed > 0 {
                debug!(cache = cache.name(), removed, "swept lookup cache");
            }
            total += removed;
        }
        self.metrics.add_cache_entries_swept(total as u64);
        total
    }

    pub(crate) async fn run_cache_sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.cache_sweep_interval;
        debug!(?period, caches = self.caches.len(), "cache sweep starting");
        let mut ticker = interval_at(super::first_tick_after(period), period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_caches();
                }
            }
        }
        debug!("cache sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use imagecert_client::{CachingClient, CertificationClient, ClientMetrics, StaticClient};
    use imagecert_store_memory::{MemoryRecordStore, MemoryWorkloadSource};

    use super::*;
    use crate::background::tests::enricher;
    use crate::background::{BackgroundConfig, BackgroundProcessorBuilder};
    use crate::metrics::InventoryMetrics;

    #[tokio::test(start_paused = true)]
    async fn loop_sweeps_expired_entries() {
        let client_metrics = Arc::new(ClientMetrics::default());
        let cache = Arc::new(CachingClient::new(
            StaticClient::found("payload".to_owned()),
            Duration::from_secs(60),
            client_metrics.clone(),
        ));
        let cancel = CancellationToken::new();
        cache
            .lookup(&cancel, "docker.io", "library/nginx", "sha256:aa")
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        let store = Arc::new(MemoryRecordStore::new());
        let metrics = Arc::new(InventoryMetrics::default());
        let processor = BackgroundProcessorBuilder::new()
            .config(BackgroundConfig {
                cache_sweep_interval: Duration::from_secs(120),
                ..BackgroundConfig::default()
            })
            .store(store.clone())
            .workloads(Arc::new(MemoryWorkloadSource::new()))
            .enricher(enricher(store, None, None, metrics.clone()))
            .cache(cache.clone())
            .metrics(metrics.clone())
            .build()
            .unwrap();
        let processor = Arc::new(processor);
        let task = tokio::spawn(Arc::clone(&processor).run_cache_sweep_loop(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty());
        assert_eq!(metrics.snapshot().cache_entries_swept, 1);
        assert_eq!(client_metrics.snapshot().cache_evictions, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_interval_runs_without_panicking() {
        let store = Arc::new(MemoryRecordStore::new());
        let metrics = Arc::new(InventoryMetrics::default());
        let processor = BackgroundProcessorBuilder::new()
            .config(BackgroundConfig {
                cache_sweep_interval: Duration::MAX,
                ..BackgroundConfig::default()
            })
            .store(store.clone())
            .workloads(Arc::new(MemoryWorkloadSource::new()))
            .enricher(enricher(store, None, None, metrics.clone()))
            .metrics(metrics.clone())
            .build()
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::new(processor).run_cache_sweep_loop(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(metrics.snapshot().cache_entries_swept, 0);
    }
}
