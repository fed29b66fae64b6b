//! Prometheus metrics for monitoring
//!
//! Exposes counters for submissions, retries and terminal failures, plus a
//! latency histogram, over an optional `/metrics` HTTP listener.

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

use crate::error::{DispatchError, DispatchResult};

lazy_static! {
    pub static ref TX_SUBMITTED: Counter = register_counter!(
        "dispatch_transactions_submitted_total",
        "Total transactions observed on chain"
    )
    .unwrap();

    pub static ref TX_RETRIES: Counter = register_counter!(
        "dispatch_transaction_retries_total",
        "Total submission attempts beyond the first"
    )
    .unwrap();

    pub static ref TX_FAILED: Counter = register_counter!(
        "dispatch_transactions_failed_total",
        "Total deterministic transaction rejections"
    )
    .unwrap();

    pub static ref TX_TIMEOUTS: Counter = register_counter!(
        "dispatch_transaction_timeouts_total",
        "Total submissions abandoned with ambiguous outcome"
    )
    .unwrap();

    pub static ref SEQUENCE_REFETCHES: Counter = register_counter!(
        "dispatch_sequence_refetches_total",
        "Total account sequence re-fetches after a mismatch"
    )
    .unwrap();

    pub static ref ALARMS_DISPATCHED: CounterVec = register_counter_vec!(
        "dispatch_alarms_dispatched_total",
        "Total alarms dispatched by kind",
        &["kind"]
    )
    .unwrap();

    pub static ref PRICES_FED: Counter = register_counter!(
        "dispatch_prices_fed_total",
        "Total price updates fed to the oracle"
    )
    .unwrap();

    pub static ref SUBMIT_LATENCY: Histogram = register_histogram!(
        "dispatch_submission_latency_seconds",
        "Time from first attempt to on-chain inclusion",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> DispatchResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|error| {
            DispatchError::Configuration(format!("Failed to bind metrics port: {error}"))
        })?;

        axum::serve(listener, app).await.map_err(|error| {
            DispatchError::Configuration(format!("Metrics server failed: {error}"))
        })
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_retry() {
    TX_RETRIES.inc();
}

pub fn record_tx_failed() {
    TX_FAILED.inc();
}

pub fn record_timeout() {
    TX_TIMEOUTS.inc();
}

pub fn record_sequence_refetch() {
    SEQUENCE_REFETCHES.inc();
}

pub fn record_alarms_dispatched(kind: &str, count: usize) {
    ALARMS_DISPATCHED
        .with_label_values(&[kind])
        .inc_by(count as f64);
}

pub fn record_prices_fed(count: usize) {
    PRICES_FED.inc_by(count as f64);
}

pub fn record_submit_latency(latency_secs: f64) {
    SUBMIT_LATENCY.observe(latency_secs);
}
