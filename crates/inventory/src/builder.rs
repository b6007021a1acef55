use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use imagecert_client::{CacheSweep, CertificationClient, ClientConfig, ClientMetrics, layered};
use imagecert_core::{CertificationData, HubRepository, Workload};
use imagecert_store::{RecordStore, WorkloadSource};

use crate::background::{
    BackgroundConfig, BackgroundHandle, BackgroundProcessor, BackgroundProcessorBuilder,
};
use crate::config::InventoryConfig;
use crate::dispatch::{DEFAULT_MAX_CONCURRENT, EnrichmentDispatcher};
use crate::enrichment::{Enricher, PrimarySource, SecondarySource};
use crate::error::InventoryError;
use crate::metrics::InventoryMetrics;
use crate::notify::{LogNotifier, Notifier};
use crate::reconciler::{ReconcileSummary, Reconciler};

/// A wired inventory: reconciler, enrichment and background processing
/// sharing one store, one set of decorated sources and one metrics sink.
pub struct Inventory {
    reconciler: Reconciler,
    enricher: Arc<Enricher>,
    dispatcher: Arc<EnrichmentDispatcher>,
    background: Arc<BackgroundProcessor>,
    metrics: Arc<InventoryMetrics>,
    primary_metrics: Arc<ClientMetrics>,
    secondary_metrics: Arc<ClientMetrics>,
    cancel: CancellationToken,
}

impl Inventory {
    pub fn builder() -> InventoryBuilder {
        InventoryBuilder::new()
    }

    /// See [`Reconciler::reconcile`].
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileSummary, InventoryError> {
        self.reconciler.reconcile(namespace, name).await
    }

    /// See [`Reconciler::observe`].
    pub async fn observe(&self, workload: &Workload) -> ReconcileSummary {
        self.reconciler.observe(workload).await
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn enricher(&self) -> &Arc<Enricher> {
        &self.enricher
    }

    pub fn dispatcher(&self) -> &Arc<EnrichmentDispatcher> {
        &self.dispatcher
    }

    pub fn background(&self) -> &Arc<BackgroundProcessor> {
        &self.background
    }

    /// Start the periodic workers. They stop on [`shutdown`](Self::shutdown)
    /// or when the returned handle is shut down.
    pub fn start_background(&self) -> BackgroundHandle {
        Arc::clone(&self.background).spawn(&self.cancel)
    }

    pub fn metrics(&self) -> &Arc<InventoryMetrics> {
        &self.metrics
    }

    pub fn primary_client_metrics(&self) -> &Arc<ClientMetrics> {
        &self.primary_metrics
    }

    pub fn secondary_client_metrics(&self) -> &Arc<ClientMetrics> {
        &self.secondary_metrics
    }

    /// Cancel background workers and in-flight enrichment, waiting for
    /// enrichment tasks to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.dispatcher.shutdown().await;
        info!("inventory stopped");
    }
}

/// Builder for [`Inventory`].
///
/// Sources are given undecorated; `build` wraps each in the standard
/// cache, rate-limit and instrumentation stack and registers its cache
/// with the background sweep.
pub struct InventoryBuilder {
    store: Option<Arc<dyn RecordStore>>,
    workloads: Option<Arc<dyn WorkloadSource>>,
    primary: Option<PrimarySource>,
    secondary: Option<SecondarySource>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Option<Arc<InventoryMetrics>>,
    primary_enabled: bool,
    secondary_enabled: bool,
    primary_config: ClientConfig,
    secondary_config: ClientConfig,
    background: BackgroundConfig,
    max_concurrent: usize,
    cancel: Option<CancellationToken>,
}

impl Default for InventoryBuilder {
    fn default() -> Self {
        Self {
            store: None,
            workloads: None,
            primary: None,
            secondary: None,
            notifier: None,
            metrics: None,
            primary_enabled: true,
            secondary_enabled: true,
            primary_config: ClientConfig::primary(),
            secondary_config: ClientConfig::secondary(),
            background: BackgroundConfig::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            cancel: None,
        }
    }
}

impl InventoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a deployment configuration. Disabled sources are
    /// dropped at build time even if given.
    pub fn from_config(config: &InventoryConfig) -> Self {
        Self {
            primary_enabled: config.primary.enabled,
            secondary_enabled: config.secondary.enabled,
            primary_config: config.primary.client_config(),
            secondary_config: config.secondary.client_config(),
            background: config.background_config(),
            max_concurrent: config.enrichment.max_concurrent,
            ..Self::default()
        }
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

    /// Set the primary certification source.
    #[must_use]
    pub fn primary<C>(mut self, client: C) -> Self
    where
        C: CertificationClient<Data = CertificationData> + 'static,
    {
        self.primary = Some(Arc::new(client) as PrimarySource);
        self
    }

    /// Set the secondary popularity source.
    #[must_use]
    pub fn secondary<C>(mut self, client: C) -> Self
    where
        C: CertificationClient<Data = HubRepository> + 'static,
    {
        self.secondary = Some(Arc::new(client) as SecondarySource);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<InventoryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn primary_config(mut self, config: ClientConfig) -> Self {
        self.primary_config = config;
        self
    }

    #[must_use]
    pub fn secondary_config(mut self, config: ClientConfig) -> Self {
        self.secondary_config = config;
        self
    }

    #[must_use]
    pub fn background_config(mut self, config: BackgroundConfig) -> Self {
        self.background = config;
        self
    }

    #[must_use]
    pub fn max_concurrent_enrichments(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    /// Parent cancellation token. Defaults to a fresh token.
    #[must_use]
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Inventory, InventoryError> {
        let store = self
            .store
            .ok_or(InventoryError::MissingComponent("record store"))?;
        let workloads = self
            .workloads
            .ok_or(InventoryError::MissingComponent("workload source"))?;
        let metrics = self.metrics.unwrap_or_default();
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier) as Arc<dyn Notifier>);
        let cancel = self.cancel.unwrap_or_default().child_token();

        let primary_metrics = Arc::new(ClientMetrics::default());
        let secondary_metrics = Arc::new(ClientMetrics::default());
        let mut caches: Vec<Arc<dyn CacheSweep>> = Vec::new();

        let primary: Option<PrimarySource> = match self.primary {
            Some(base) if self.primary_enabled => {
                let client = Arc::new(layered(
                    base,
                    &self.primary_config,
                    Arc::clone(&primary_metrics),
                ));
                caches.push(client.clone());
                Some(client as PrimarySource)
            }
            _ => None,
        };
        let secondary: Option<SecondarySource> = match self.secondary {
            Some(base) if self.secondary_enabled => {
                let client = Arc::new(layered(
                    base,
                    &self.secondary_config,
                    Arc::clone(&secondary_metrics),
                ));
                caches.push(client.clone());
                Some(client as SecondarySource)
            }
            _ => None,
        };

        info!(
            primary = primary.is_some(),
            secondary = secondary.is_some(),
            max_concurrent = self.max_concurrent,
            "building inventory"
        );

        let enricher = Arc::new(Enricher::new(
            Arc::clone(&store),
            primary,
            secondary,
            Arc::clone(&notifier),
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(EnrichmentDispatcher::new(
            Arc::clone(&enricher),
            self.max_concurrent,
            cancel.child_token(),
            Arc::clone(&metrics),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&workloads),
            Arc::clone(&dispatcher),
            notifier,
            Arc::clone(&metrics),
            enricher.has_certification_source(),
        );

        let mut background = BackgroundProcessorBuilder::new()
            .config(self.background)
            .store(store)
            .workloads(workloads)
            .enricher(Arc::clone(&enricher))
            .metrics(Arc::clone(&metrics));
        for cache in caches {
            background = background.cache(cache);
        }

        Ok(Inventory {
            reconciler,
            enricher,
            dispatcher,
            background: Arc::new(background.build()?),
            metrics,
            primary_metrics,
            secondary_metrics,
            cancel,
        })
    }
}
