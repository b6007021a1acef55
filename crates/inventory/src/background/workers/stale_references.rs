use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::interval_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use imagecert_core::WorkloadReference;

use super::super::BackgroundProcessor;
use crate::error::InventoryError;
use crate::write;

/// Outcome of one stale-reference sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleReferenceReport {
    pub records_scanned: usize,
    /// Records whose reference set shrank and was written back.
    pub records_updated: usize,
    pub references_removed: usize,
    /// Existence checks that failed; their references were kept.
    pub check_errors: usize,
    pub write_errors: usize,
}

impl BackgroundProcessor {
    /// Drop workload references whose workload is confirmed gone.
    ///
    /// A reference is kept when its existence check fails. Each distinct
    /// workload is checked once per sweep, and only records whose
    /// reference set actually shrank are written.
    pub async fn cleanup_stale_references(&self) -> Result<StaleReferenceReport, InventoryError> {
        let records = self.store.list().await?;
        let mut report = StaleReferenceReport {
            records_scanned: records.len(),
            ..StaleReferenceReport::default()
        };
        let mut present: HashMap<(String, String), bool> = HashMap::new();

        for record in &records {
            let mut gone: Vec<WorkloadReference> = Vec::new();
            for reference in &record.status.workload_references {
                let workload = (reference.namespace.clone(), reference.name.clone());
                let exists = match present.get(&workload) {
                    Some(exists) => *exists,
                    None => {
                        let exists = match self
                            .workloads
                            .workload_exists(&reference.namespace, &reference.name)
                            .await
                        {
                            Ok(exists) => exists,
                            Err(e) => {
                                warn!(
                                    namespace = %reference.namespace,
                                    name = %reference.name,
                                    error = %e,
                                    "workload existence check failed, keeping reference"
                                );
                                report.check_errors += 1;
                                true
                            }
                        };
                        present.insert(workload, exists);
                        exists
                    }
                };
                if !exists {
                    gone.push(reference.clone());
                }
            }
            if gone.is_empty() {
                continue;
            }

            let written = write::update_status(self.store.as_ref(), &record.key, |r| {
                let before = r.status.workload_references.len();
                r.status.workload_references.retain(|w| !gone.contains(w));
                let removed = before - r.status.workload_references.len();
                (removed > 0).then_some(removed)
            })
            .await;
            match written {
                Ok(Some((_, removed))) => {
                    debug!(key = %record.key, removed, "dropped stale workload references");
                    report.records_updated += 1;
                    report.references_removed += removed;
                }
                Ok(None) => {}
                Err(e) => {
                    if e.is_conflict() {
                        self.metrics.increment_writes_dropped();
                    }
                    warn!(key = %record.key, error = %e, "failed to drop stale references");
                    report.write_errors += 1;
                }
            }
        }

        self.metrics
            .record_stale_sweep(report.references_removed as u64);
        Ok(report)
    }

    pub(crate) async fn run_stale_reference_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.cleanup_interval;
        info!(?period, "stale reference cleanup starting");
        let mut ticker = interval_at(super::first_tick_after(period), period);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.cleanup_stale_references().await {
                        Ok(report) if report.references_removed > 0 => {
                            info!(
                                removed = report.references_removed,
                                records = report.records_updated,
                                "stale reference cleanup completed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "error cleaning up stale references"),
                    }
                }
            }
        }
        debug!("stale reference cleanup stopped");
    }
}
