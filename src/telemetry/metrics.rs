use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::path::Path;
use std::time::Duration;

/// Metric name prefix for all collector metrics
const PREFIX: &str = "title_sampler";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Gateway
    pub static ref GATEWAY_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_gateway_requests_total"), "Catalog requests issued"),
        &["operation", "outcome"]
    ).expect("Failed to create gateway_requests_total metric");

    pub static ref GATEWAY_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_gateway_retries_total"), "Retries consumed by the gateway"),
        &["operation", "reason"]
    ).expect("Failed to create gateway_retries_total metric");

    pub static ref GATEWAY_BACKOFF_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_gateway_backoff_seconds"),
            "Backoff delay before a retry"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["operation"]
    ).expect("Failed to create gateway_backoff_seconds metric");

    pub static ref GATEWAY_THROTTLE_WAIT_SECONDS: Counter = Counter::new(
        format!("{PREFIX}_gateway_throttle_wait_seconds_total"),
        "Cumulative time spent waiting for the request-rate throttle"
    ).expect("Failed to create gateway_throttle_wait_seconds metric");

    // Pipeline
    pub static ref CANDIDATES_ACCEPTED: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_candidates_accepted"), "Candidates accepted per genre"),
        &["genre"]
    ).expect("Failed to create candidates_accepted metric");

    pub static ref RECORDS_DROPPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_records_dropped_total"), "Records left out of the dataset"),
        &["reason"]
    ).expect("Failed to create records_dropped_total metric");

    pub static ref ROWS_EMITTED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_rows_emitted_total"),
        "Feature rows written to the dataset"
    ).expect("Failed to create rows_emitted_total metric");

    pub static ref PHASE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_phase_duration_seconds"),
            "Wall time per pipeline phase"
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]),
        &["phase"]
    ).expect("Failed to create phase_duration_seconds metric");
}

/// Register all metrics. Safe to call more than once.
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(GATEWAY_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GATEWAY_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GATEWAY_BACKOFF_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(GATEWAY_THROTTLE_WAIT_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CANDIDATES_ACCEPTED.clone()));
    let _ = REGISTRY.register(Box::new(RECORDS_DROPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ROWS_EMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PHASE_DURATION_SECONDS.clone()));

    tracing::debug!("Metrics registry initialized");
}

/// Zero every metric. The registry is process-wide; a run starts from here
/// so its `.prom` snapshot only holds that run's values.
pub fn reset() {
    GATEWAY_REQUESTS_TOTAL.reset();
    GATEWAY_RETRIES_TOTAL.reset();
    GATEWAY_BACKOFF_SECONDS.reset();
    GATEWAY_THROTTLE_WAIT_SECONDS.reset();
    CANDIDATES_ACCEPTED.reset();
    RECORDS_DROPPED_TOTAL.reset();
    ROWS_EMITTED_TOTAL.reset();
    PHASE_DURATION_SECONDS.reset();
}

pub fn record_gateway_request(operation: &str, outcome: &str) {
    GATEWAY_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_retry(operation: &str, reason: &str, delay: Duration) {
    GATEWAY_RETRIES_TOTAL
        .with_label_values(&[operation, reason])
        .inc();
    GATEWAY_BACKOFF_SECONDS
        .with_label_values(&[operation])
        .observe(delay.as_secs_f64());
}

pub fn record_throttle_wait(wait: Duration) {
    GATEWAY_THROTTLE_WAIT_SECONDS.inc_by(wait.as_secs_f64());
}

pub fn set_candidates_accepted(genre: &str, count: usize) {
    CANDIDATES_ACCEPTED
        .with_label_values(&[genre])
        .set(count as f64);
}

pub fn record_dropped(reason: &str) {
    RECORDS_DROPPED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_rows_emitted(count: usize) {
    ROWS_EMITTED_TOTAL.inc_by(count as f64);
}

pub fn record_phase_duration(phase: &str, duration: Duration) {
    PHASE_DURATION_SECONDS
        .with_label_values(&[phase])
        .observe(duration.as_secs_f64());
}

/// Render the registry in the Prometheus text exposition format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}

/// Write the text exposition to `path`, creating parent directories.
pub fn write_to_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create metrics directory {:?}", parent))?;
    }
    let text = render()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write metrics to {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Tests share the global registry
    static REGISTRY_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_render_contains_registered_metrics() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        init_metrics();
        record_gateway_request("search", "success");
        record_dropped("validation_failed");

        let text = render().unwrap();
        assert!(text.contains("title_sampler_gateway_requests_total"));
        assert!(text.contains("title_sampler_records_dropped_total"));
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        init_metrics();
        init_metrics();
        assert!(render().is_ok());
    }

    #[test]
    fn test_write_to_file_creates_directories() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        init_metrics();
        record_rows_emitted(3);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runs").join("abc.prom");

        write_to_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("title_sampler_rows_emitted_total"));
    }

    #[test]
    fn test_reset_clears_previous_run() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        init_metrics();
        record_rows_emitted(7);
        record_dropped("stale_entry");
        record_retry("warmup", "transient", Duration::from_millis(500));
        set_candidates_accepted("polka", 12);

        reset();
        record_rows_emitted(2);

        assert_eq!(ROWS_EMITTED_TOTAL.get(), 2.0);
        let text = render().unwrap();
        assert!(text.contains("title_sampler_rows_emitted_total 2"));
        assert!(!text.contains("stale_entry"));
        assert!(!text.contains("warmup"));
        assert!(!text.contains("polka"));
    }
}
