//! Prometheus metrics.
//!
//! [`MetricsServer::start`] installs the process-wide recorder; the HTTP
//! layer serves [`MetricsServer::render`] at `/metrics`. Recording goes
//! through the small recorder types below so metric names and labels are
//! defined in one place.
//!
//! ```rust,no_run
//! use farmstand_runtime::metrics::{CheckoutMetrics, MetricsServer};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//! CheckoutMetrics::record_placed();
//! let exposition = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Latency buckets in seconds, shared by every `*_duration_seconds` histogram.
const LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const COUNTERS: &[(&str, &str)] = &[
    ("store.actions.total", "Actions sent to the store"),
    ("store.effects.executed", "Effects started, by type"),
    ("store.shutdown.rejected_actions", "Actions refused during shutdown"),
    ("dlq.pushed", "Operations dead-lettered"),
    ("dlq.dropped", "Dead letters evicted because the queue was full"),
    ("http_responses_total", "HTTP responses by status class"),
    ("checkout_orders_placed_total", "Orders created with a reservation"),
    ("checkout_orders_rejected_total", "Order attempts refused, by reason"),
    ("checkout_orders_completed_total", "Orders paid and completed"),
    ("checkout_orders_failed_total", "Orders failed, by reason"),
    ("checkout_refunds_issued_total", "Refunds for payments on already failed orders"),
    ("webhook_events_received_total", "Verified webhook events, by type"),
    ("webhook_signature_rejected_total", "Webhook deliveries with a bad signature"),
    ("notifications_sent_total", "Confirmation emails delivered"),
    ("notifications_failed_total", "Confirmation emails given up on"),
    ("retry_attempts_total", "Retries scheduled"),
    ("retry_successes_total", "Operations that succeeded after retrying"),
    ("retry_exhausted_total", "Operations that ran out of retries"),
];

const HISTOGRAMS: &[(&str, &str)] = &[
    ("store.reducer.duration_seconds", "Time spent reducing under the state lock"),
    ("checkout_payment_gateway_duration_seconds", "Payment processor call latency, by operation"),
];

/// Failure to set up the exporter.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Bucket configuration rejected.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(String),
    /// Recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

/// Owner of the Prometheus handle, if this instance installed the recorder.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Not yet installed.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// [`MetricsError`] when the exporter cannot be built or installed. If
    /// some other recorder is already installed (several stores in one test
    /// binary) this logs a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        for (name, help) in COUNTERS {
            describe_counter!(*name, *help);
        }
        for (name, help) in HISTOGRAMS {
            describe_histogram!(*name, *help);
        }
        describe_gauge!("dlq.size", "Entries in the dead letter queue");

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), &LATENCY_BUCKETS)
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            },
            Err(e) if e.to_string().contains("already") => {
                tracing::warn!("A metrics recorder is already installed, keeping it");
                Ok(())
            },
            Err(e) => Err(MetricsError::Install(e.to_string())),
        }
    }

    /// Prometheus exposition text, `None` if this instance holds no handle.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Checkout engine metrics recorder.
pub struct CheckoutMetrics;

impl CheckoutMetrics {
    /// Record an order placed with its reservation.
    pub fn record_placed() {
        counter!("checkout_orders_placed_total").increment(1);
    }

    /// Record a rejected order attempt.
    pub fn record_rejected(reason: &'static str) {
        counter!("checkout_orders_rejected_total", "reason" => reason).increment(1);
    }

    /// Record an order completion.
    pub fn record_completed() {
        counter!("checkout_orders_completed_total").increment(1);
    }

    /// Record an order failure.
    pub fn record_failed(reason: &'static str) {
        counter!("checkout_orders_failed_total", "reason" => reason).increment(1);
    }

    /// Record a compensating refund.
    pub fn record_refund() {
        counter!("checkout_refunds_issued_total").increment(1);
    }

    /// Record a payment processor call.
    pub fn record_gateway_call(operation: &'static str, duration: Duration) {
        histogram!("checkout_payment_gateway_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }
}

/// Payment webhook metrics recorder.
pub struct WebhookMetrics;

impl WebhookMetrics {
    /// Record a verified event.
    pub fn record_received(event_type: &str) {
        counter!("webhook_events_received_total", "type" => event_type.to_string()).increment(1);
    }

    /// Record a rejected signature.
    pub fn record_signature_rejected() {
        counter!("webhook_signature_rejected_total").increment(1);
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a delivered email.
    pub fn record_sent() {
        counter!("notifications_sent_total").increment(1);
    }

    /// Record an email that could not be delivered.
    pub fn record_failed() {
        counter!("notifications_failed_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_uninstalled_server_renders_nothing() {
        assert!(MetricsServer::new().render().is_none());
    }

    #[test]
    fn test_checkout_metrics_render() {
        let mut server = MetricsServer::new();
        server.start().unwrap();

        CheckoutMetrics::record_placed();
        CheckoutMetrics::record_rejected("out_of_stock");
        WebhookMetrics::record_signature_rejected();

        // Another test may have installed the recorder first; metrics are
        // still recorded globally in that case.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("checkout_orders_placed_total"));
            assert!(rendered.contains("checkout_orders_rejected_total"));
            assert!(rendered.contains("webhook_signature_rejected_total"));
        }
    }
}
