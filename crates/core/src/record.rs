use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::certification::{CertificationData, HubRepository};
use crate::lifecycle::{days_since, days_until, format_image_age, parse_timestamp};
use crate::reference::ImageReference;
use crate::registry::{RegistryType, classify_registry};

/// Metadata key holding the comma-joined CVE identifiers of an image.
pub const CVE_ANNOTATION: &str = "security.imagecert.io/cves";

/// Certification state of an inventory record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum CertificationStatus {
    Certified,
    NotCertified,
    /// Enrichment has been scheduled but has not completed.
    Pending,
    #[default]
    Unknown,
    /// The last enrichment attempt failed.
    Error,
}

impl CertificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Certified => "Certified",
            Self::NotCertified => "NotCertified",
            Self::Pending => "Pending",
            Self::Unknown => "Unknown",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for CertificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload container that runs the image.
///
/// Equality over all three fields is the deduplication rule for
/// [`ImageStatus::workload_references`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadReference {
    pub namespace: String,
    pub name: String,
    pub container: String,
}

impl WorkloadReference {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            container: container.into(),
        }
    }
}

impl std::fmt::Display for WorkloadReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.container)
    }
}

/// Immutable identity of an inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: String,
    pub full_reference: String,
}

impl From<&ImageReference> for ImageSpec {
    fn from(r: &ImageReference) -> Self {
        Self {
            registry: r.registry.clone(),
            repository: r.repository.clone(),
            tag: r.tag.clone(),
            digest: r.digest.clone(),
            full_reference: r.full_reference.clone(),
        }
    }
}

/// Certification payload together with the values derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationDetails {
    pub data: CertificationData,
    pub published_at: Option<DateTime<Utc>>,
    pub eol_date: Option<DateTime<Utc>>,
    /// Human-readable age, e.g. `"3 months"`.
    pub image_age: Option<String>,
    pub days_until_eol: Option<i64>,
}

impl CertificationDetails {
    /// Wrap freshly fetched data, parsing its timestamps and computing the
    /// derived fields as of `now`.
    #[must_use]
    pub fn new(data: CertificationData, now: DateTime<Utc>) -> Self {
        let published_at = parse_timestamp(&data.published_at);
        let eol_date = parse_timestamp(&data.eol_date);
        let mut details = Self {
            data,
            published_at,
            eol_date,
            image_age: None,
            days_until_eol: None,
        };
        details.recompute(now);
        details
    }

    /// Refresh age and days-until-EOL from the stored source timestamps.
    pub fn recompute(&mut self, now: DateTime<Utc>) {
        self.image_age = self.published_at.map(|p| format_image_age(now - p));
        self.days_until_eol = self.eol_date.map(|eol| days_until(eol, now));
    }

    #[must_use]
    pub fn health_index(&self) -> &str {
        &self.data.health_index
    }
}

/// Popularity metadata for Docker Hub images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMetadata {
    pub repository: HubRepository,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub days_since_update: Option<i64>,
    /// Compact pull count, e.g. `"12M"`.
    pub pull_count_display: String,
}

impl HubMetadata {
    #[must_use]
    pub fn new(repository: HubRepository, now: DateTime<Utc>) -> Self {
        let last_updated_at = parse_timestamp(&repository.last_updated);
        Self {
            days_since_update: last_updated_at.map(|t| days_since(t, now)),
            pull_count_display: crate::certification::format_pull_count(repository.pull_count),
            last_updated_at,
            repository,
        }
    }
}

/// Mutable, observed state of an inventory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStatus {
    pub registry_type: RegistryType,
    pub certification_status: CertificationStatus,
    pub certification: Option<CertificationDetails>,
    pub hub: Option<HubMetadata>,
    pub workload_references: Vec<WorkloadReference>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Last enrichment attempt against the certification source, successful
    /// or not.
    pub last_certification_check_at: Option<DateTime<Utc>>,
    pub last_hub_check_at: Option<DateTime<Utc>>,
}

impl ImageStatus {
    /// Add a reference unless an identical one is already present.
    /// Returns `true` when the reference set grew.
    pub fn add_reference(&mut self, reference: WorkloadReference) -> bool {
        if self.workload_references.contains(&reference) {
            return false;
        }
        self.workload_references.push(reference);
        true
    }

    /// Whether the record is due for a certification refresh: never checked,
    /// or last checked at least `interval` before `now`.
    #[must_use]
    pub fn is_check_stale(&self, interval: chrono::TimeDelta, now: DateTime<Utc>) -> bool {
        self.last_certification_check_at
            .is_none_or(|checked| now - checked >= interval)
    }
}

/// One inventory record per unique `(registry, repository, digest)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub key: String,
    pub spec: ImageSpec,
    pub status: ImageStatus,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Optimistic-concurrency token assigned by the record store.
    #[serde(default)]
    pub resource_version: u64,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Build a new record for `reference`, classifying its registry once.
    #[must_use]
    pub fn new(
        reference: &ImageReference,
        status: CertificationStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: reference.record_key(),
            spec: ImageSpec::from(reference),
            status: ImageStatus {
                registry_type: classify_registry(&reference.registry),
                certification_status: status,
                certification: None,
                hub: None,
                workload_references: Vec::new(),
                first_seen_at: now,
                last_seen_at: now,
                last_certification_check_at: None,
                last_hub_check_at: None,
            },
            annotations: BTreeMap::new(),
            resource_version: 0,
            created_at: now,
        }
    }

    /// The CVE identifiers recorded in metadata, if any.
    #[must_use]
    pub fn cves(&self) -> Vec<&str> {
        self.annotations
            .get(CVE_ANNOTATION)
            .map(|v| v.split(',').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}
