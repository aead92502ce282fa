//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a model switch attempt and how long it took
pub fn record_switch(model: &str, outcome: &str, elapsed: Duration) {
    metrics::counter!("llm_switchboard_switches_total",
        "model" => model.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!("llm_switchboard_switch_duration_seconds",
        "model" => model.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a chat request answered inline
pub fn record_sync_request(model: &str) {
    metrics::counter!("llm_switchboard_sync_requests_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Record a job entering the queue (`kind` is `chat` or `switch`)
pub fn record_job_submitted(kind: &str) {
    metrics::counter!("llm_switchboard_jobs_submitted_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a cancellation request by how it was resolved
pub fn record_job_cancelled(mode: &str) {
    metrics::counter!("llm_switchboard_jobs_cancelled_total",
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// Record a job finishing on a worker
pub fn record_job_finished(status: &str) {
    metrics::counter!("llm_switchboard_jobs_finished_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a synchronous request turned away by admission
pub fn record_admission_rejected(model: &str) {
    metrics::counter!("llm_switchboard_admission_rejected_total",
        "model" => model.to_string()
    )
    .increment(1);
}

/// Update pending job count gauge
pub fn update_queue_length(length: usize) {
    metrics::gauge!("llm_switchboard_queue_length").set(length as f64);
}
