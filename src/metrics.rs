//! Prometheus metrics for platform observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("opencel_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a deployment state transition.
pub fn deployment_status_changed(status: &str) {
    counter!("opencel_deployments_total", "status" => status.to_string()).increment(1);
}

/// Record total build duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("opencel_build_duration_ms").record(duration_ms as f64);
}

/// Record a routing document rewrite.
pub fn router_reconciled() {
    counter!("opencel_router_reconciliations_total").increment(1);
}

/// Record an admin job state transition.
pub fn admin_job_status(status: &str) {
    counter!("opencel_admin_jobs_total", "status" => status.to_string()).increment(1);
}
