//! Prometheus metrics for fee-payment-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Intents created, by outcome of the gateway initiation (ok, provider_error).
pub static INTENTS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_payment_intents_created_total",
        "Total number of payment intent creation attempts",
        &["outcome"]
    )
    .expect("Failed to register intents_created_total")
});

/// Verification results (completed, failed, pending, already_completed, provider_error).
pub static VERIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_payment_verifications_total",
        "Total number of payment verifications by outcome",
        &["outcome"]
    )
    .expect("Failed to register verifications_total")
});

/// Offline payments recorded by cashiers, by method.
pub static OFFLINE_PAYMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_payment_offline_payments_total",
        "Total number of offline payments recorded",
        &["method"]
    )
    .expect("Failed to register offline_payments_total")
});

/// Intents swept to FAILED after expiring.
pub static INTENTS_EXPIRED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fee_payment_intents_expired_total",
        "Total number of pending intents expired by the sweeper",
        &["result"]
    )
    .expect("Failed to register intents_expired_total")
});

/// Gateway call duration by operation.
pub static GATEWAY_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_payment_gateway_request_duration_seconds",
        "Payment gateway request duration in seconds",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register gateway_request_duration")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fee_payment_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&INTENTS_CREATED_TOTAL);
    Lazy::force(&VERIFICATIONS_TOTAL);
    Lazy::force(&OFFLINE_PAYMENTS_TOTAL);
    Lazy::force(&INTENTS_EXPIRED_TOTAL);
    Lazy::force(&GATEWAY_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}\n", e))
}
