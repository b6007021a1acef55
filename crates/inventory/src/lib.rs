//! Image certification inventory.
//!
//! Observes running workloads, keeps one record per unique image digest,
//! enriches records with certification data from an external source, and
//! keeps that data fresh in the background:
//!
//! - [`Reconciler`] turns workload observations into records and workload
//!   references, scheduling enrichment for newly discovered images through
//!   the [`EnrichmentDispatcher`].
//! - [`Enricher`] performs the lookup-and-write-back for one record and
//!   raises [`Notification`]s for notable changes.
//! - [`BackgroundProcessor`] drops stale workload references, refreshes
//!   certification data on a staggered schedule and sweeps lookup caches.
//! - [`Inventory`] wires all of the above from an [`InventoryConfig`].

pub mod background;
pub mod builder;
pub mod config;
pub mod dispatch;
pub mod enrichment;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod reconciler;
pub mod summary;
pub mod telemetry;
mod write;

pub use background::{
    BackgroundConfig, BackgroundHandle, BackgroundProcessor, BackgroundProcessorBuilder,
    RefreshReport, StaleReferenceReport,
};
pub use builder::{Inventory, InventoryBuilder};
pub use config::{ConfigError, InventoryConfig};
pub use dispatch::EnrichmentDispatcher;
pub use enrichment::{Enricher, EnrichmentOutcome, PrimarySource, SecondarySource};
pub use error::InventoryError;
pub use metrics::{InventoryMetrics, InventoryMetricsSnapshot};
pub use notify::{LogNotifier, Notification, Notifier, Reason, RecordingNotifier, Severity};
pub use reconciler::{ReconcileSummary, Reconciler};
pub use summary::{InventorySummary, SeverityTotals};
