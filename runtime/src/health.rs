//! Component health for readiness probes.

use serde::Serialize;
use std::fmt;

/// Health of one component, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Serving, but something needs attention (e.g. dead letters piling up).
    Degraded,
    /// Not able to serve.
    Unhealthy,
}

impl HealthStatus {
    /// `true` only for [`HealthStatus::Healthy`].
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// `true` only for [`HealthStatus::Unhealthy`].
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Result of checking one component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name (`store`, `database`, ...).
    pub component: String,
    /// Its status.
    pub status: HealthStatus,
    /// Why it is not healthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Gauges worth showing next to the status.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    fn with_status(component: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            component: component.into(),
            status,
            message,
            metadata: Vec::new(),
        }
    }

    /// Healthy component.
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Healthy, None)
    }

    /// Degraded component.
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Degraded, Some(message.into()))
    }

    /// Unhealthy component.
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(component, HealthStatus::Unhealthy, Some(message.into()))
    }

    /// Attach a key/value detail.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.push((key.into(), value.to_string()));
        self
    }
}

/// All checks plus the overall (worst) status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among `checks`, `healthy` when there are none.
    pub status: HealthStatus,
    /// Individual checks.
    pub checks: Vec<HealthCheck>,
    /// When the report was taken.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Aggregate `checks`.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_takes_worst_status() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("store"),
            HealthCheck::degraded("store", "dead letter queue is 60% full"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);

        assert!(HealthReport::new(Vec::new()).status.is_healthy());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let check = HealthCheck::unhealthy("store", "shutting down").with_metadata("pending_effects", 3);
        let json = serde_json::to_value(&check).unwrap_or_default();

        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["metadata"][0][1], "3");
    }
}
