use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all movie-vault metrics
const PREFIX: &str = "movie_vault";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Cache Metrics
    pub static ref CACHE_USED_BYTES: IntGauge = IntGauge::new(
        format!("{PREFIX}_cache_used_bytes"),
        "Bytes held by resident cache entries"
    ).expect("Failed to create cache_used_bytes metric");

    pub static ref CACHE_ENTRIES: IntGauge = IntGauge::new(
        format!("{PREFIX}_cache_entries"),
        "Number of resident cache entries"
    ).expect("Failed to create cache_entries metric");

    pub static ref CACHE_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_cache_evictions_total"),
        "Total cache entries evicted to honour the quota"
    ).expect("Failed to create cache_evictions_total metric");

    // Download Metrics
    pub static ref DOWNLOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_downloads_total"), "Finished downloads by outcome"),
        &["outcome"]
    ).expect("Failed to create downloads_total metric");

    pub static ref DOWNLOAD_RETRIES_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_download_retries_total"),
        "Total download attempts retried after a transient failure"
    ).expect("Failed to create download_retries_total metric");

    pub static ref DOWNLOADS_ACTIVE: IntGauge = IntGauge::new(
        format!("{PREFIX}_downloads_active"),
        "Downloads currently queued or transferring"
    ).expect("Failed to create downloads_active metric");

    pub static ref DOWNLOADED_BYTES_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_downloaded_bytes_total"),
        "Total bytes committed to the cache from the remote store"
    ).expect("Failed to create downloaded_bytes_total metric");

    // Process Metrics
    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_USED_BYTES.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_ENTRIES.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_EVICTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOADS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOAD_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOADS_ACTIVE.clone()));
    let _ = REGISTRY.register(Box::new(DOWNLOADED_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Update the resident cache totals
pub fn set_cache_usage(used_bytes: u64, entries: usize) {
    CACHE_USED_BYTES.set(used_bytes as i64);
    CACHE_ENTRIES.set(entries as i64);
}

pub fn record_evictions(count: usize) {
    CACHE_EVICTIONS_TOTAL.inc_by(count as u64);
}

/// Record a download reaching a terminal state ("completed", "failed", "cancelled")
pub fn record_download_finished(outcome: &str, bytes: u64) {
    DOWNLOADS_TOTAL.with_label_values(&[outcome]).inc();
    if bytes > 0 {
        DOWNLOADED_BYTES_TOTAL.inc_by(bytes);
    }
}

pub fn record_download_retry() {
    DOWNLOAD_RETRIES_TOTAL.inc();
}

pub fn set_active_downloads(count: usize) {
    DOWNLOADS_ACTIVE.set(count as i64);
}

/// Collapses ids out of request paths so label cardinality stays bounded.
pub fn categorize_endpoint(path: &str) -> &'static str {
    if path.starts_with("/v1/stream/") {
        if path.ends_with("/info") {
            "stream_info"
        } else {
            "stream"
        }
    } else if path == "/v1/downloads/events" {
        "download_events"
    } else if path.starts_with("/v1/downloads") {
        "downloads"
    } else if path.starts_with("/v1/movies") {
        "movies"
    } else {
        "other"
    }
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // Parse the RSS (Resident Set Size) in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
