// src/utils/prometheus_metrics.rs

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_histogram, Counter, Encoder, Histogram, TextEncoder,
};

// Executions
pub static EXECUTIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_executions_total",
        "Total number of job executions received."
    )
    .expect("Failed to register EXECUTIONS_TOTAL counter")
});

pub static EXECUTION_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_execution_failures_total",
        "Total number of job executions that returned an error."
    )
    .expect("Failed to register EXECUTION_FAILURES_TOTAL counter")
});

pub static EXECUTION_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "relay_execution_duration_seconds",
        "Histogram of job execution durations, including any reconnect."
    )
    .expect("Failed to register EXECUTION_DURATION_SECONDS histogram")
});

pub static FLAG_PARSE_WARNINGS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_flag_parse_warnings_total",
        "Total number of malformed mandatory/immediate values that fell back to false."
    )
    .expect("Failed to register FLAG_PARSE_WARNINGS_TOTAL counter")
});

// Publishing
pub static PUBLISH_ATTEMPTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_publish_attempts_total",
        "Total number of basic_publish calls, retries included."
    )
    .expect("Failed to register PUBLISH_ATTEMPTS_TOTAL counter")
});

pub static CLOSED_CHANNEL_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_closed_channel_errors_total",
        "Total number of publishes that failed because the channel was closed."
    )
    .expect("Failed to register CLOSED_CHANNEL_ERRORS_TOTAL counter")
});

// Connection
pub static CONNECT_ATTEMPTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_connect_attempts_total",
        "Total number of attempts to dial RabbitMQ and open a channel."
    )
    .expect("Failed to register CONNECT_ATTEMPTS_TOTAL counter")
});

pub static CONNECT_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_connect_failures_total",
        "Total number of failed connect attempts."
    )
    .expect("Failed to register CONNECT_FAILURES_TOTAL counter")
});

pub static RECONNECTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "relay_reconnects_total",
        "Total number of on-demand reconnects after a closed channel."
    )
    .expect("Failed to register RECONNECTS_TOTAL counter")
});

/// Renders every registered metric in the Prometheus text format.
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| format!("Could not encode prometheus metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| format!("Prometheus metrics UTF-8 error: {}", e))
}
