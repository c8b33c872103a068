//! Prometheus metrics for relay-service.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub static RELAY_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RELAY_GENERATION_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static RELAY_PROVIDER_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RELAY_TOKENS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RELAY_UNBILLED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static RELAY_IN_FLIGHT_REJECTIONS_TOTAL: OnceLock<IntCounter> = OnceLock::new();

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics. Later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _init = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // outcome: served, invalid_request, invalid_identity, insufficient_credit,
    // in_flight, ledger_read_failure, upstream_error
    let requests_total = IntCounterVec::new(
        Opts::new("relay_requests_total", "Total relay requests by outcome"),
        &["outcome"],
    )?;

    let generation_latency = HistogramVec::new(
        HistogramOpts::new(
            "relay_generation_latency_seconds",
            "Upstream generation latency in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["provider", "model"],
    )?;

    let provider_errors = IntCounterVec::new(
        Opts::new("relay_provider_errors_total", "Total upstream provider errors"),
        &["provider", "error_type"],
    )?;

    let tokens_total = IntCounterVec::new(
        Opts::new("relay_tokens_total", "Total tokens processed"),
        &["model", "type"],
    )?;

    let unbilled_total = IntCounter::new(
        "relay_unbilled_total",
        "Generations served whose usage record failed",
    )?;

    let in_flight_rejections = IntCounter::new(
        "relay_in_flight_rejections_total",
        "Requests rejected because one for the same address was running",
    )?;

    registry.register(Box::new(requests_total.clone()))?;
    registry.register(Box::new(generation_latency.clone()))?;
    registry.register(Box::new(provider_errors.clone()))?;
    registry.register(Box::new(tokens_total.clone()))?;
    registry.register(Box::new(unbilled_total.clone()))?;
    registry.register(Box::new(in_flight_rejections.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = RELAY_REQUESTS_TOTAL.set(requests_total);
    let _ = RELAY_GENERATION_LATENCY_SECONDS.set(generation_latency);
    let _ = RELAY_PROVIDER_ERRORS_TOTAL.set(provider_errors);
    let _ = RELAY_TOKENS_TOTAL.set(tokens_total);
    let _ = RELAY_UNBILLED_TOTAL.set(unbilled_total);
    let _ = RELAY_IN_FLIGHT_REJECTIONS_TOTAL.set(in_flight_rejections);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

// Helper functions for recording metrics

pub fn record_request(outcome: &str) {
    if let Some(counter) = RELAY_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_generation_latency(provider: &str, model: &str, duration_secs: f64) {
    if let Some(histogram) = RELAY_GENERATION_LATENCY_SECONDS.get() {
        histogram
            .with_label_values(&[provider, model])
            .observe(duration_secs);
    }
}

pub fn record_provider_error(provider: &str, error_type: &str) {
    if let Some(counter) = RELAY_PROVIDER_ERRORS_TOTAL.get() {
        counter.with_label_values(&[provider, error_type]).inc();
    }
}

pub fn record_tokens(model: &str, input_tokens: u32, output_tokens: u32) {
    if let Some(counter) = RELAY_TOKENS_TOTAL.get() {
        counter
            .with_label_values(&[model, "input"])
            .inc_by(input_tokens as u64);
        counter
            .with_label_values(&[model, "output"])
            .inc_by(output_tokens as u64);
    }
}

pub fn record_unbilled() {
    if let Some(counter) = RELAY_UNBILLED_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_in_flight_rejection() {
    if let Some(counter) = RELAY_IN_FLIGHT_REJECTIONS_TOTAL.get() {
        counter.inc();
    }
}
