//! Metrics module
//!
//! Prometheus counters and histograms for uploads and listing traffic.
//! Everything registers into the default registry on first use.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Histogram, HistogramVec,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "dropstream_uploads_total",
        "Total number of uploads",
        &["mode", "status"]  // mode: "single_shot" or "session"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "dropstream_upload_bytes_total",
        "Total bytes committed"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "dropstream_upload_duration_seconds",
        "Upload duration in seconds",
        &["mode"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    // Session metrics
    pub static ref SESSION_REQUESTS: Histogram = register_histogram!(
        "dropstream_session_requests",
        "Requests per upload session, start and finish included",
        vec![2.0, 3.0, 5.0, 10.0, 50.0, 100.0, 500.0]
    ).unwrap();

    // Listing metrics
    pub static ref LIST_PAGES_TOTAL: CounterVec = register_counter_vec!(
        "dropstream_list_pages_total",
        "Listing and search pages fetched",
        &["kind"]  // "list" or "search"
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "dropstream_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a committed upload
pub fn record_upload_success(mode: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[mode, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(mode: &str) {
    UPLOADS_TOTAL.with_label_values(&[mode, "failure"]).inc();
}

/// Record upload duration
pub fn record_upload_duration(mode: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[mode])
        .observe(duration_secs);
}

/// Record the number of requests a finished session took
pub fn record_session_requests(requests: usize) {
    SESSION_REQUESTS.observe(requests as f64);
}

/// Record a fetched listing or search page
pub fn record_list_page(kind: &str) {
    LIST_PAGES_TOTAL.with_label_values(&[kind]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    use prometheus::{Encoder, TextEncoder};

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
