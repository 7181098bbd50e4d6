//! Prometheus metrics for the URL frontier
//!
//! Tracks cache hits and misses, refill cycles, store failures and the number
//! of live partitions.
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! Until then (or if registration fails) every recording call is a no-op.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct FrontierMetrics {
    cache_hits: Counter,
    cache_misses: Counter,
    fill_cycles: CounterVec,
    records_enqueued: Counter,
    store_errors: Counter,
    active_partitions: Gauge,
    fill_duration: Histogram,
}

static FRONTIER_METRICS: OnceLock<FrontierMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = FrontierMetrics {
        cache_hits: register_counter!(
            "urlfrontier_cache_hits_total",
            "URLs served straight from a partition queue"
        )?,
        cache_misses: register_counter!(
            "urlfrontier_cache_misses_total",
            "next_url calls that found the queue empty even after a refill"
        )?,
        fill_cycles: register_counter_vec!(
            "urlfrontier_fill_cycles_total",
            "Refill cycles by outcome",
            &["outcome"]
        )?,
        records_enqueued: register_counter!(
            "urlfrontier_records_enqueued_total",
            "Records moved from the store into partition queues"
        )?,
        store_errors: register_counter!(
            "urlfrontier_store_errors_total",
            "Persistent store failures seen by refill workers"
        )?,
        active_partitions: register_gauge!(
            "urlfrontier_active_partitions",
            "Partitions currently registered"
        )?,
        fill_duration: register_histogram!(
            "urlfrontier_fill_duration_seconds",
            "Time spent servicing one Fill command",
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
    };

    FRONTIER_METRICS
        .set(metrics)
        .map_err(|_| "Frontier metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    FRONTIER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a `next_url` served from the queue
pub fn record_cache_hit() {
    if let Some(m) = FRONTIER_METRICS.get() {
        m.cache_hits.inc();
    }
}

/// Record a `next_url` that came back empty
pub fn record_cache_miss() {
    if let Some(m) = FRONTIER_METRICS.get() {
        m.cache_misses.inc();
    }
}

/// Record one completed fill cycle
pub fn record_fill(enqueued: usize, store_failed: bool, duration_secs: f64) {
    let Some(m) = FRONTIER_METRICS.get() else {
        return;
    };

    let outcome = if store_failed {
        "store_error"
    } else if enqueued == 0 {
        "empty"
    } else {
        "filled"
    };
    m.fill_cycles.with_label_values(&[outcome]).inc();
    m.fill_duration.observe(duration_secs);

    if enqueued > 0 {
        m.records_enqueued.inc_by(enqueued as f64);
    }
    if store_failed {
        m.store_errors.inc();
    }
}

/// Update the live partition gauge
pub fn set_active_partitions(count: usize) {
    if let Some(m) = FRONTIER_METRICS.get() {
        m.active_partitions.set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
        // idempotent
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_cache_hit();
        let text = encode_metrics().unwrap();
        assert!(text.contains("urlfrontier_"));
    }

    #[test]
    fn test_fill_recording() {
        ensure_metrics_initialized();
        record_fill(10, false, 0.02);
        record_fill(0, false, 0.001);
        record_fill(0, true, 0.5);
        set_active_partitions(3);
        record_cache_miss();
    }

    #[test]
    fn test_metrics_noop_without_init() {
        // Must not panic whether or not another test initialized first
        record_cache_hit();
        record_cache_miss();
        record_fill(1, false, 0.1);
        set_active_partitions(0);
    }
}
