//! Notifications about notable inventory changes.

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::metrics::InventoryMetrics;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Normal,
    Warning,
}

/// Why a notification was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// A new image was added to the inventory.
    ImageDiscovered,
    /// Certification moved between certified and not certified.
    CertificationChanged,
    /// Critical or important vulnerabilities are present.
    VulnerabilitiesFound,
    /// End of life is at most 90 days away.
    EolApproaching,
    /// The health grade got strictly worse.
    HealthDegraded,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageDiscovered => "ImageDiscovered",
            Self::CertificationChanged => "CertificationChanged",
            Self::VulnerabilitiesFound => "VulnerabilitiesFound",
            Self::EolApproaching => "EOLApproaching",
            Self::HealthDegraded => "HealthDegraded",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::ImageDiscovered | Self::CertificationChanged => Severity::Normal,
            Self::VulnerabilitiesFound | Self::EolApproaching | Self::HealthDegraded => {
                Severity::Warning
            }
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification attached to one inventory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub record_key: String,
    pub reason: Reason,
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn new(record_key: impl Into<String>, reason: Reason, message: impl Into<String>) -> Self {
        Self {
            record_key: record_key.into(),
            reason,
            severity: reason.severity(),
            message: message.into(),
        }
    }
}

/// Sink for notifications.
///
/// Delivery is best-effort and must not block: implementations that talk to
/// a remote system should hand the notification off and return.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        match n.severity {
            Severity::Normal => {
                info!(key = %n.record_key, reason = %n.reason, "{}", n.message);
            }
            Severity::Warning => {
                warn!(key = %n.record_key, reason = %n.reason, "{}", n.message);
            }
        }
    }
}

/// Keeps every notification in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    /// Notifications with the given reason.
    pub fn with_reason(&self, reason: Reason) -> Vec<Notification> {
        self.received
            .lock()
            .iter()
            .filter(|n| n.reason == reason)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.received.lock().push(notification);
    }
}

/// Count and deliver a batch of notifications.
pub(crate) fn publish(
    notifier: &dyn Notifier,
    metrics: &InventoryMetrics,
    notifications: impl IntoIterator<Item = Notification>,
) {
    for n in notifications {
        metrics.increment_notification(n.reason);
        notifier.notify(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities() {
        assert_eq!(Reason::ImageDiscovered.severity(), Severity::Normal);
        assert_eq!(Reason::EolApproaching.severity(), Severity::Warning);
        assert_eq!(Reason::HealthDegraded.severity(), Severity::Warning);
    }

    #[test]
    fn publish_counts_and_delivers() {
        let notifier = RecordingNotifier::new();
        let metrics = InventoryMetrics::default();
        publish(
            &notifier,
            &metrics,
            [
                Notification::new("k", Reason::VulnerabilitiesFound, "2 critical"),
                Notification::new("k", Reason::EolApproaching, "30 days"),
            ],
        );
        assert_eq!(notifier.notifications().len(), 2);
        assert_eq!(notifier.with_reason(Reason::EolApproaching).len(), 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.notifications_vulnerabilities, 1);
        assert_eq!(snap.notifications_eol, 1);
    }
}
