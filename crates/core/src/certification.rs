//! Payloads returned by the external certification and popularity sources.
//!
//! These are the wire-agnostic shapes the inventory consumes. Timestamps
//! are kept as the source reported them and parsed on write-back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Vulnerability counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilitySummary {
    pub critical: u32,
    pub important: u32,
    pub moderate: u32,
    pub low: u32,
}

impl VulnerabilitySummary {
    /// Whether any critical or important vulnerability is present.
    #[must_use]
    pub fn has_significant(&self) -> bool {
        self.critical > 0 || self.important > 0
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        u64::from(self.critical)
            + u64::from(self.important)
            + u64::from(self.moderate)
            + u64::from(self.low)
    }
}

/// Certification record for one image digest, as returned by the primary
/// certification source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificationData {
    pub project_id: String,
    pub publisher: String,
    /// Health grade letter (`A` best, `F` worst). May be empty.
    pub health_index: String,
    pub vulnerabilities: Option<VulnerabilitySummary>,
    pub cves: Vec<String>,
    pub catalog_url: String,
    pub image_id: String,
    /// RFC 3339 publish timestamp.
    pub published_at: String,
    /// End-of-life date, RFC 3339 or `YYYY-MM-DD`.
    pub eol_date: String,
    pub release_category: String,
    /// Reference of the image that supersedes this one, if any.
    pub replaced_by: String,
    pub architectures: Vec<String>,
    /// Health grade per architecture.
    pub architecture_health: BTreeMap<String, String>,
    pub compressed_size_bytes: Option<u64>,
    pub uncompressed_size_bytes: Option<u64>,
    pub layer_count: Option<u32>,
    pub build_date: String,
    pub auto_rebuild_enabled: bool,
    pub advisory_ids: Vec<String>,
}

/// Repository metadata from the popularity source (Docker Hub).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubRepository {
    pub namespace: String,
    pub name: String,
    /// Official images live under the `library` namespace.
    pub is_official: bool,
    pub is_verified_publisher: bool,
    pub pull_count: u64,
    pub star_count: u64,
    /// RFC 3339 timestamp of the last push.
    pub last_updated: String,
    pub description: String,
}

/// Render a pull count compactly: `1.5B`, `12M`, `3K`, `999`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_pull_count(count: u64) -> String {
    match count {
        1_000_000_000.. => format!("{:.1}B", count as f64 / 1_000_000_000.0),
        1_000_000.. => format!("{:.0}M", count as f64 / 1_000_000.0),
        1_000.. => format!("{:.0}K", count as f64 / 1_000.0),
        _ => count.to_string(),
    }
}
