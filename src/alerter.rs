//! Alerts raised while scanning
//!
//! Some failures do not abort a scan: the affected resources are left out
//! and an [`Alert`] tells the user why.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Where in the scan an access denial happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanningPhase {
    Enumeration,
    DetailsFetching,
}

/// Resource an alert is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<AlertResource>,
}

impl Alert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource: None,
        }
    }

    /// Access denied while listing or reading `resource`.
    ///
    /// `resource` is either a type or `type.id`; in the latter case the alert
    /// points at that resource.
    pub fn access_denied(resource: &str, listed_type: &str, cause: &str, phase: ScanningPhase) -> Self {
        let message = match phase {
            ScanningPhase::Enumeration => format!(
                "Ignoring {} from drift calculation: Listing {} is forbidden: {}",
                resource, listed_type, cause
            ),
            ScanningPhase::DetailsFetching => format!(
                "Ignoring {} from drift calculation: Reading details of {} is forbidden: {}",
                resource, listed_type, cause
            ),
        };

        let resource = resource.split_once('.').map(|(resource_type, id)| AlertResource {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        });

        Self { message, resource }
    }
}

/// Thread-safe alert collector, keyed by what the alert is about.
#[derive(Debug, Default)]
pub struct Alerter {
    alerts: Mutex<BTreeMap<String, Vec<Alert>>>,
}

impl Alerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_alert(&self, key: impl Into<String>, alert: Alert) {
        let key = key.into();
        tracing::warn!(key = %key, "{}", alert.message);
        self.alerts.lock().entry(key).or_default().push(alert);
    }

    /// Snapshot of every alert sent so far
    pub fn alerts(&self) -> BTreeMap<String, Vec<Alert>> {
        self.alerts.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().values().map(Vec::len).sum()
    }
}
