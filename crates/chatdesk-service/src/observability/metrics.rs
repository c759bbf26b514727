//! Metrics definitions for the Chatdesk service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `chatdesk_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded. Paths are normalized, conversation references and
//! identity ids never appear as label values.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return its render handle.
///
/// Must be called once per process, before any metric is recorded.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("chatdesk_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("chatdesk_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Metric: `chatdesk_http_requests_total`, `chatdesk_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("chatdesk_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("chatdesk_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace dynamic path segments with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/v1/auth/login" | "/v1/events"
        | "/v1/admin/identities" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    match parts.as_slice() {
        ["", "v1", "conversations", _, "messages"] => {
            "/v1/conversations/{ref}/messages".to_string()
        }
        ["", "v1", "admin", "identities", _] => "/v1/admin/identities/{id}".to_string(),
        ["", "v1", "presence", _] => "/v1/presence/{id}".to_string(),
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Metric: `chatdesk_db_query_duration_seconds`, `chatdesk_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("chatdesk_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("chatdesk_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Message Metrics
// ============================================================================

/// Metric: `chatdesk_messages_appended_total`, `chatdesk_placeholder_rewrites_total`
/// Labels: `media` ("true"/"false"), `source` ("append"/"repair")
pub fn record_message_appended(has_media: bool, rewritten: bool) {
    counter!("chatdesk_messages_appended_total",
        "media" => has_media.to_string()
    )
    .increment(1);

    if rewritten {
        record_placeholder_rewrite("append");
    }
}

pub fn record_placeholder_rewrite(source: &'static str) {
    counter!("chatdesk_placeholder_rewrites_total", "source" => source).increment(1);
}

// ============================================================================
// Delivery Metrics
// ============================================================================

/// Metric: `chatdesk_deliveries_total`
/// Labels: `result` (delivered, busy, closed, duplicate)
pub fn record_delivery(result: &'static str, count: u64) {
    if count > 0 {
        counter!("chatdesk_deliveries_total", "result" => result).increment(count);
    }
}

/// Metric: `chatdesk_live_sessions`
pub fn set_live_sessions(count: usize) {
    gauge!("chatdesk_live_sessions").set(count as f64);
}

// ============================================================================
// Presence Metrics
// ============================================================================

/// Metric: `chatdesk_presence_transitions_total`
/// Labels: `state`
pub fn record_presence_transition(state: &'static str) {
    counter!("chatdesk_presence_transitions_total", "state" => state).increment(1);
}

/// Metric: `chatdesk_presence_online_identities`
pub fn set_online_identities(count: usize) {
    gauge!("chatdesk_presence_online_identities").set(count as f64);
}

// ============================================================================
// Maintenance Metrics
// ============================================================================

/// Metric: `chatdesk_maintenance_rows_total`
/// Labels: `job`, `outcome` (scanned, fixed, failed)
pub fn record_maintenance_job(job: &'static str, scanned: u64, fixed: u64, failed: u64) {
    counter!("chatdesk_maintenance_rows_total", "job" => job, "outcome" => "scanned")
        .increment(scanned);
    counter!("chatdesk_maintenance_rows_total", "job" => job, "outcome" => "fixed")
        .increment(fixed);
    counter!("chatdesk_maintenance_rows_total", "job" => job, "outcome" => "failed")
        .increment(failed);
}
