use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use imagecert_core::{CertificationStatus, HealthGrade, ImageRecord, days_until};

/// Vulnerability totals across the inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityTotals {
    pub critical: u64,
    pub important: u64,
    pub moderate: u64,
    pub low: u64,
}

/// Inventory-wide gauges, recomputed after each refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySummary {
    pub total: u64,
    pub by_status: BTreeMap<CertificationStatus, u64>,
    /// Keyed by grade letter; records without a recognized grade are not
    /// counted.
    pub by_health: BTreeMap<HealthGrade, u64>,
    pub vulnerabilities: SeverityTotals,
    pub eol_within_30_days: u64,
    pub eol_within_60_days: u64,
    pub eol_within_90_days: u64,
    pub past_eol: u64,
}

impl InventorySummary {
    /// Summarize `records`, computing EOL distances as of `now`.
    pub fn from_records(records: &[ImageRecord], now: DateTime<Utc>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total += 1;
            *summary
                .by_status
                .entry(record.status.certification_status)
                .or_default() += 1;

            let Some(details) = &record.status.certification else {
                continue;
            };
            if let Some(grade) = HealthGrade::parse(details.health_index()) {
                *summary.by_health.entry(grade).or_default() += 1;
            }
            if let Some(v) = details.data.vulnerabilities {
                summary.vulnerabilities.critical += u64::from(v.critical);
                summary.vulnerabilities.important += u64::from(v.important);
                summary.vulnerabilities.moderate += u64::from(v.moderate);
                summary.vulnerabilities.low += u64::from(v.low);
            }
            if let Some(eol) = details.eol_date {
                let days = days_until(eol, now);
                if days < 0 {
                    summary.past_eol += 1;
                } else {
                    summary.eol_within_30_days += u64::from(days <= 30);
                    summary.eol_within_60_days += u64::from(days <= 60);
                    summary.eol_within_90_days += u64::from(days <= 90);
                }
            }
        }
        summary
    }
}
