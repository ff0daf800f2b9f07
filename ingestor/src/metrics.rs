use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref FRAMES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_frames_total",
        "Total frames received from MQTT"
    ))
    .unwrap();
    pub static ref DECODE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_decode_failures_total",
        "Total frames that could not be de-obfuscated"
    ))
    .unwrap();
    pub static ref INVALID_RECORDS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_invalid_records_total",
        "Total decoded records rejected by validation"
    ))
    .unwrap();
    pub static ref SAMPLES_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_samples_stored_total",
        "Total location samples persisted"
    ))
    .unwrap();
    pub static ref STORE_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_store_retries_total",
        "Total retries after transient store failures"
    ))
    .unwrap();
    pub static ref DROPPED_FRAMES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_dropped_frames_total",
        "Total frames dropped for any reason"
    ))
    .unwrap();
    pub static ref ALERTS_SENT_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_alerts_sent_total",
        "Total movement alerts handed to the push service"
    ))
    .unwrap();
    pub static ref ALERTS_SUPPRESSED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_alerts_suppressed_total",
        "Total movement alerts suppressed as continuations"
    ))
    .unwrap();
    pub static ref NOTIFY_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_notify_failures_total",
        "Total push deliveries that failed"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time taken to decode, store and classify one frame"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(FRAMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DECODE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_RECORDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SAMPLES_STORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_FRAMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_SENT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_SUPPRESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
