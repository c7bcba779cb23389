//! Metrics module for metering-service.
//! Provides Prometheus metrics for billing runs, cycle outcomes, and the
//! database layer.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram, register_histogram_vec, register_int_counter_vec,
    Encoder, Histogram, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "metering_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Billing cycle outcomes counter
pub static CYCLES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Charged amount counter by currency (monetary tracking)
pub static CHARGED_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Billing runs counter
pub static BILLING_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing run duration histogram
pub static BILLING_RUN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    CYCLES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_billing_cycles_total",
                "Total billing cycle attempts by status and failure reason"
            ),
            &["status", "reason"]
        )
        .expect("Failed to register CYCLES_TOTAL")
    });

    CHARGED_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "metering_charged_amount_total",
                "Total amount charged by currency"
            ),
            &["currency"]
        )
        .expect("Failed to register CHARGED_AMOUNT_TOTAL")
    });

    BILLING_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_billing_runs_total",
                "Total billing runs by outcome"
            ),
            &["status"]
        )
        .expect("Failed to register BILLING_RUNS_TOTAL")
    });

    BILLING_RUN_DURATION.get_or_init(|| {
        register_histogram!(histogram_opts!(
            "metering_billing_run_duration_seconds",
            "Billing run duration",
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
        ))
        .expect("Failed to register BILLING_RUN_DURATION")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a billing cycle outcome. `reason` is empty for billed cycles.
pub fn record_cycle(status: &str, reason: &str) {
    if let Some(counter) = CYCLES_TOTAL.get() {
        counter.with_label_values(&[status, reason]).inc();
    }
}

/// Record a charged amount for financial tracking.
pub fn record_charged_amount(currency: &str, amount: f64) {
    if let Some(counter) = CHARGED_AMOUNT_TOTAL.get() {
        counter.with_label_values(&[currency]).inc_by(amount.abs());
    }
}

/// Record a billing run outcome.
pub fn record_billing_run(status: &str) {
    if let Some(counter) = BILLING_RUNS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record billing run duration.
pub fn observe_run_duration(duration_secs: f64) {
    if let Some(histogram) = BILLING_RUN_DURATION.get() {
        histogram.observe(duration_secs);
    }
}
