//! Enrichment write-back: fetch from an external source and fold the result
//! into the record's status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use imagecert_client::{CertificationClient, ClientError};
use imagecert_core::{
    CVE_ANNOTATION, CertificationData, CertificationDetails, CertificationStatus, HubMetadata,
    HubRepository, ImageRecord, is_docker_hub, is_eol_approaching, is_health_degraded,
};
use imagecert_store::{RecordStore, StoreError};

use crate::error::InventoryError;
use crate::metrics::InventoryMetrics;
use crate::notify::{Notification, Notifier, Reason, publish};
use crate::write;

/// Primary certification source, already wrapped in its decorator stack.
pub type PrimarySource = Arc<dyn CertificationClient<Data = CertificationData>>;

/// Secondary popularity source for Docker Hub images.
pub type SecondarySource = Arc<dyn CertificationClient<Data = HubRepository>>;

/// Result of one enrichment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// The source returned data and it was written back.
    Found,
    /// The source confirmed it has no record; the absence was written back.
    Absent,
    /// The source failed; the failure was recorded on the record.
    Failed(ClientError),
    /// Nothing to do: no source configured, record gone, or not applicable.
    Skipped,
    /// The caller was cancelled before the lookup completed. Nothing was
    /// written.
    Cancelled,
    /// The write-back lost the optimistic-concurrency race twice and was
    /// abandoned.
    Dropped,
}

/// State captured from the fresh copy just before a certification write.
struct Previous {
    status: CertificationStatus,
    health: String,
}

/// Performs certification and hub enrichment for single records.
pub struct Enricher {
    store: Arc<dyn RecordStore>,
    primary: Option<PrimarySource>,
    secondary: Option<SecondarySource>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<InventoryMetrics>,
}

impl Enricher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        primary: Option<PrimarySource>,
        secondary: Option<SecondarySource>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<InventoryMetrics>,
    ) -> Self {
        Self {
            store,
            primary,
            secondary,
            notifier,
            metrics,
        }
    }

    pub fn has_certification_source(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_hub_source(&self) -> bool {
        self.secondary.is_some()
    }

    /// Look up certification data for the record at `key` and write the
    /// result back.
    ///
    /// Data replaces the previous payload wholesale. An absent answer
    /// clears it. A source failure sets the status to `Error` and leaves
    /// the previous payload in place. Notices are raised only once the
    /// status write has landed, and CVE identifiers are synced to the
    /// record metadata in a second write.
    pub async fn enrich_certification(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentOutcome, InventoryError> {
        let Some(primary) = &self.primary else {
            return Ok(EnrichmentOutcome::Skipped);
        };
        let Some(record) = self.store.get(key).await? else {
            debug!(key, "record vanished before enrichment");
            return Ok(EnrichmentOutcome::Skipped);
        };

        let answer = primary
            .lookup(
                cancel,
                &record.spec.registry,
                &record.spec.repository,
                &record.spec.digest,
            )
            .await;
        let now = Utc::now();

        match answer {
            Err(ClientError::Cancelled) => Ok(EnrichmentOutcome::Cancelled),
            Err(e) => {
                warn!(key, endpoint = primary.endpoint(), error = %e, "certification lookup failed");
                self.metrics.increment_enrichments_failed();
                let written = write::update_status(self.store.as_ref(), key, |r| {
                    let previous = r.status.certification_status;
                    r.status.certification_status = CertificationStatus::Error;
                    r.status.last_certification_check_at = Some(now);
                    Some(previous)
                })
                .await;
                match self.settle(key, written)? {
                    Some((_, previous)) => {
                        self.metrics
                            .record_transition(previous, CertificationStatus::Error);
                        Ok(EnrichmentOutcome::Failed(e))
                    }
                    None => Ok(EnrichmentOutcome::Dropped),
                }
            }
            Ok(found) => self.write_certification(key, found, now).await,
        }
    }

    async fn write_certification(
        &self,
        key: &str,
        found: Option<CertificationData>,
        now: DateTime<Utc>,
    ) -> Result<EnrichmentOutcome, InventoryError> {
        let next = if found.is_some() {
            CertificationStatus::Certified
        } else {
            CertificationStatus::NotCertified
        };
        let written = write::update_status(self.store.as_ref(), key, |r| {
            let previous = Previous {
                status: r.status.certification_status,
                health: r
                    .status
                    .certification
                    .as_ref()
                    .map(|c| c.health_index().to_owned())
                    .unwrap_or_default(),
            };
            r.status.certification_status = next;
            r.status.certification = found.clone().map(|d| CertificationDetails::new(d, now));
            r.status.last_certification_check_at = Some(now);
            Some(previous)
        })
        .await;
        let Some((stored, previous)) = self.settle(key, written)? else {
            return Ok(EnrichmentOutcome::Dropped);
        };

        self.metrics.record_transition(previous.status, next);
        publish(
            self.notifier.as_ref(),
            &self.metrics,
            certification_notices(&stored, &previous),
        );
        self.sync_cve_annotation(key).await;

        Ok(if found.is_some() {
            EnrichmentOutcome::Found
        } else {
            EnrichmentOutcome::Absent
        })
    }

    /// Bring the CVE annotation in line with the stored certification.
    ///
    /// Failures are logged and otherwise ignored: the status write already
    /// landed and the next enrichment repeats the sync.
    async fn sync_cve_annotation(&self, key: &str) {
        let written = write::update_metadata(self.store.as_ref(), key, |r| {
            let wanted = match r.status.certification_status {
                CertificationStatus::Certified => r
                    .status
                    .certification
                    .as_ref()
                    .filter(|c| !c.data.cves.is_empty())
                    .map(|c| c.data.cves.join(",")),
                CertificationStatus::NotCertified => None,
                _ => return None,
            };
            match wanted {
                Some(cves) if r.annotations.get(CVE_ANNOTATION) != Some(&cves) => {
                    r.annotations.insert(CVE_ANNOTATION.to_owned(), cves);
                    Some(())
                }
                Some(_) => None,
                None => r.annotations.remove(CVE_ANNOTATION).map(|_| ()),
            }
        })
        .await;
        if let Err(e) = written {
            if e.is_conflict() {
                self.metrics.increment_writes_dropped();
            }
            warn!(key, error = %e, "failed to update CVE annotation");
        }
    }

    /// Look up Docker Hub metadata for the record at `key` and write it
    /// back. Never changes certification status.
    pub async fn enrich_hub(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentOutcome, InventoryError> {
        let Some(secondary) = &self.secondary else {
            return Ok(EnrichmentOutcome::Skipped);
        };
        let Some(record) = self.store.get(key).await? else {
            return Ok(EnrichmentOutcome::Skipped);
        };
        if !is_docker_hub(&record.spec.registry) {
            return Ok(EnrichmentOutcome::Skipped);
        }

        let answer = secondary
            .lookup(
                cancel,
                &record.spec.registry,
                &record.spec.repository,
                &record.spec.digest,
            )
            .await;
        let now = Utc::now();

        let (outcome, hub) = match answer {
            Err(ClientError::Cancelled) => return Ok(EnrichmentOutcome::Cancelled),
            Err(e) => {
                warn!(key, endpoint = secondary.endpoint(), error = %e, "hub lookup failed");
                self.metrics.increment_enrichments_failed();
                (EnrichmentOutcome::Failed(e), None)
            }
            Ok(Some(repository)) => (
                EnrichmentOutcome::Found,
                Some(Some(HubMetadata::new(repository, now))),
            ),
            Ok(None) => (EnrichmentOutcome::Absent, Some(None)),
        };

        let written = write::update_status(self.store.as_ref(), key, |r| {
            if let Some(hub) = &hub {
                r.status.hub.clone_from(hub);
            }
            r.status.last_hub_check_at = Some(now);
            Some(())
        })
        .await;
        Ok(match self.settle(key, written)? {
            Some(_) => outcome,
            None => EnrichmentOutcome::Dropped,
        })
    }

    /// Turn a write result into "written", "dropped" or an error.
    ///
    /// A conflict that survived the retry is counted and dropped; a record
    /// deleted underneath the write is treated as dropped too.
    fn settle<T>(
        &self,
        key: &str,
        written: Result<Option<(ImageRecord, T)>, StoreError>,
    ) -> Result<Option<(ImageRecord, T)>, InventoryError> {
        match written {
            Ok(w) => Ok(w),
            Err(e) if e.is_conflict() => {
                warn!(key, error = %e, "dropping status update after repeated conflict");
                self.metrics.increment_writes_dropped();
                Ok(None)
            }
            Err(e) if e.is_not_found() => {
                debug!(key, "record removed during enrichment");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn certification_notices(stored: &ImageRecord, previous: &Previous) -> Vec<Notification> {
    let key = stored.key.as_str();
    let current = stored.status.certification_status;
    let mut notices = Vec::new();

    let settled = |s: CertificationStatus| {
        matches!(
            s,
            CertificationStatus::Certified | CertificationStatus::NotCertified
        )
    };
    if settled(previous.status) && settled(current) && previous.status != current {
        notices.push(Notification::new(
            key,
            Reason::CertificationChanged,
            format!(
                "Certification status changed from {} to {current}",
                previous.status
            ),
        ));
    }

    let Some(details) = &stored.status.certification else {
        return notices;
    };

    if is_health_degraded(&previous.health, details.health_index()) {
        notices.push(Notification::new(
            key,
            Reason::HealthDegraded,
            format!(
                "Health index degraded from {} to {}",
                previous.health,
                details.health_index()
            ),
        ));
    }

    if let Some(days) = details.days_until_eol.filter(|d| is_eol_approaching(*d)) {
        let mut message = format!("Image reaches EOL in {days} days");
        if !details.data.replaced_by.is_empty() {
            message.push_str(", replacement: ");
            message.push_str(&details.data.replaced_by);
        }
        notices.push(Notification::new(key, Reason::EolApproaching, message));
    }

    if let Some(v) = details.data.vulnerabilities.filter(|v| v.has_significant()) {
        notices.push(Notification::new(
            key,
            Reason::VulnerabilitiesFound,
            format!(
                "Found {} critical, {} important vulnerabilities",
                v.critical, v.important
            ),
        ));
    }

    notices
}
