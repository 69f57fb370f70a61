//! Metrics for the query engine
//!
//! Prometheus metrics for query throughput, latency and the passthrough
//! optimizer's delegation decisions. Metrics register in the default
//! registry; the host application exposes them with [`gather_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Query Counters ===

    /// Total executed queries
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "stepwise_queries_total",
        "Total executed queries by kind and outcome",
        &["kind", "status"]
    ).unwrap();

    /// Passthrough optimizer outcomes
    pub static ref PASSTHROUGH_DECISIONS: CounterVec = register_counter_vec!(
        "stepwise_passthrough_decisions_total",
        "Passthrough optimizer decisions by outcome",
        &["outcome"]
    ).unwrap();

    /// Buckets repaired before quantile estimation
    pub static ref BUCKET_REPAIRS: CounterVec = register_counter_vec!(
        "stepwise_histogram_bucket_repairs_total",
        "Histogram bucket sets repaired before quantile estimation",
        &["kind"]
    ).unwrap();

    // === Latency Histograms ===

    /// Query execution duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "stepwise_query_duration_seconds",
        "Query execution latency in seconds",
        &["kind"],
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Resource Gauges ===

    /// Queries currently executing
    pub static ref QUERIES_IN_FLIGHT: Gauge = register_gauge!(
        "stepwise_queries_in_flight",
        "Number of queries currently executing"
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a finished query
#[inline]
pub fn record_query(kind: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    QUERIES_TOTAL.with_label_values(&[kind, status]).inc();
    QUERY_DURATION.with_label_values(&[kind]).observe(duration_secs);
}

/// Record a passthrough optimizer decision
#[inline]
pub fn record_passthrough(outcome: &str) {
    PASSTHROUGH_DECISIONS.with_label_values(&[outcome]).inc();
}

/// Record a bucket repair (`forced_monotonic` or `fixed_precision`)
#[inline]
pub fn record_bucket_repair(kind: &str) {
    BUCKET_REPAIRS.with_label_values(&[kind]).inc();
}

/// RAII guard tracking an executing query
pub struct InFlightGuard;

impl InFlightGuard {
    /// Mark a query as started
    pub fn start() -> Self {
        QUERIES_IN_FLIGHT.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        QUERIES_IN_FLIGHT.dec();
    }
}
