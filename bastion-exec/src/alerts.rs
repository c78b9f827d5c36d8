//! Alert sink adapters.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, warn};

use crate::ports::{Alert, AlertKind, AlertSeverity, AlertSink};

/// Writes alerts to the log at `error` (critical) or `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerts;

#[async_trait]
impl AlertSink for TracingAlerts {
    async fn alert(&self, alert: Alert) {
        let symbol = alert.symbol.as_ref().map(|s| s.as_pair()).unwrap_or_default();
        match alert.severity {
            AlertSeverity::Critical => {
                error!(kind = ?alert.kind, %symbol, message = %alert.message, "ALERT")
            },
            AlertSeverity::Warning => {
                warn!(kind = ?alert.kind, %symbol, message = %alert.message, "ALERT")
            },
        }
    }
}

/// Alerts kept by [`RecordingAlerts::new`]
pub const DEFAULT_ALERT_HISTORY: usize = 256;

/// Keeps the most recent alerts in memory. Used by tests and the status API.
///
/// Oldest alerts are dropped once `capacity` is reached.
#[derive(Debug)]
pub struct RecordingAlerts {
    alerts: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl Default for RecordingAlerts {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ALERT_HISTORY)
    }
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` alerts (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Retained alerts, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of retained alerts of `kind`
    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn alert(&self, alert: Alert) {
        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        if alerts.len() == self.capacity {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }
}

/// Fans one alert out to several sinks.
pub struct FanoutAlerts {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlerts {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for FanoutAlerts {
    async fn alert(&self, alert: Alert) {
        for sink in &self.sinks {
            sink.alert(alert.clone()).await;
        }
    }
}
