//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Broadcasts, resends and capacity rejections
//! - Terminal resolutions
//! - Fee telemetry (effective gas price, blob gas price, inclusion time)

use crate::chain::ReceiptInfo;
use crate::tx::types::TxResolution;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Broadcast metrics
    pub static ref TX_SENT: CounterVec = register_counter_vec!(
        "sender_transactions_sent_total",
        "Total transactions broadcast by kind",
        &["kind"]
    ).unwrap();

    pub static ref TX_RESENT: Counter = register_counter!(
        "sender_transactions_resent_total",
        "Total transactions resent by the resend loop"
    ).unwrap();

    pub static ref TX_RESEND_FAILED: Counter = register_counter!(
        "sender_transaction_resend_failures_total",
        "Total failed resend attempts"
    ).unwrap();

    pub static ref TX_REJECTED_CAPACITY: Counter = register_counter!(
        "sender_transactions_rejected_capacity_total",
        "Total submissions rejected at the pending cap"
    ).unwrap();

    // Resolution metrics
    pub static ref TX_CONFIRMED: Counter = register_counter!(
        "sender_transactions_confirmed_total",
        "Total transactions confirmed"
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "sender_transactions_failed_total",
        "Total transactions released unsuccessfully, by reason",
        &["reason"]
    ).unwrap();

    // Fee telemetry
    pub static ref GAS_PRICE: Gauge = register_gauge!(
        "sender_effective_gas_price_wei",
        "Effective gas price of the most recently included transaction"
    ).unwrap();

    pub static ref BLOB_GAS_PRICE: Gauge = register_gauge!(
        "sender_blob_gas_price_wei",
        "Blob gas price of the most recently included blob transaction"
    ).unwrap();

    pub static ref INCLUSION_SECONDS: Gauge = register_gauge!(
        "sender_transaction_inclusion_seconds",
        "Submit-to-inclusion time of the most recently included transaction"
    ).unwrap();

    // Registry metrics
    pub static ref PENDING_TXS: Gauge = register_gauge!(
        "sender_pending_transactions",
        "Unconfirmed transactions currently tracked"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_tx_sent(kind: &str) {
    TX_SENT.with_label_values(&[kind]).inc();
}

pub fn record_tx_resent() {
    TX_RESENT.inc();
}

pub fn record_resend_failed() {
    TX_RESEND_FAILED.inc();
}

pub fn record_capacity_rejected() {
    TX_REJECTED_CAPACITY.inc();
}

pub fn record_resolution(resolution: TxResolution) {
    match resolution {
        TxResolution::Confirmed => TX_CONFIRMED.inc(),
        TxResolution::Reverted => TX_FAILED.with_label_values(&["reverted"]).inc(),
        TxResolution::NotFound => TX_FAILED.with_label_values(&["not_found"]).inc(),
        TxResolution::RetriesExhausted => {
            TX_FAILED.with_label_values(&["retries_exhausted"]).inc()
        }
    }
}

pub fn record_inclusion(receipt: &ReceiptInfo, waited: Duration) {
    match receipt.blob_gas_price {
        Some(blob_price) => BLOB_GAS_PRICE.set(blob_price as f64),
        None => GAS_PRICE.set(receipt.effective_gas_price as f64),
    }
    INCLUSION_SECONDS.set(waited.as_secs_f64());
}

pub fn set_pending(count: usize) {
    PENDING_TXS.set(count as f64);
}
