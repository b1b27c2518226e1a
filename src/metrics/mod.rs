//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction submissions and confirmations
//! - Failures by error kind
//! - Nonce re-resolutions and dropped resubmissions
//! - Receipt wait latency

use crate::error::TxResult;
use crate::tx::Account;

use axum::{http::StatusCode, routing::get, Router};
use ethers::utils::to_checksum;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, Encoder, GaugeVec, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref TX_SUBMITTED: Counter = register_counter!(
        "nonce_keeper_transactions_submitted_total",
        "Total transactions accepted by the node"
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "nonce_keeper_transactions_confirmed_total",
        "Total orchestrations that reached Confirmed, by operation",
        &["operation"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "nonce_keeper_transactions_failed_total",
        "Total orchestrations that ended in Failed, by operation and error kind",
        &["operation", "kind"]
    ).unwrap();

    pub static ref NONCE_RERESOLVED: Counter = register_counter!(
        "nonce_keeper_nonce_reresolutions_total",
        "Nonce re-resolutions after nonce-too-low rejections"
    ).unwrap();

    pub static ref DROPPED_RESUBMITTED: Counter = register_counter!(
        "nonce_keeper_dropped_resubmissions_total",
        "Same-nonce resubmissions after the node dropped a transaction"
    ).unwrap();

    pub static ref RECEIPT_WAIT: Histogram = register_histogram!(
        "nonce_keeper_receipt_wait_seconds",
        "Time spent waiting for receipts",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref ACCOUNT_PENDING: GaugeVec = register_gauge_vec!(
        "nonce_keeper_account_pending_transactions",
        "Pending (unmined) transactions at last inspection",
        &["address"]
    ).unwrap();
}

/// Standalone `/metrics` endpoint
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> TxResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::TxError::Config(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::TxError::Config(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_confirmed(operation: &str) {
    TX_CONFIRMED.with_label_values(&[operation]).inc();
}

pub fn record_failed(operation: &str, kind: &str) {
    TX_FAILED.with_label_values(&[operation, kind]).inc();
}

pub fn record_nonce_reresolved() {
    NONCE_RERESOLVED.inc();
}

pub fn record_dropped_resubmit() {
    DROPPED_RESUBMITTED.inc();
}

pub fn record_receipt_wait(seconds: f64) {
    RECEIPT_WAIT.observe(seconds);
}

pub fn record_pending_count(account: &Account) {
    ACCOUNT_PENDING
        .with_label_values(&[&to_checksum(&account.address, None)])
        .set(account.pending_count() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    #[tokio::test]
    async fn test_metrics_render_in_text_format() {
        record_failed("deploy", "timeout");
        let account = Account::new(Address::repeat_byte(0x10), 2, 4).unwrap();
        record_pending_count(&account);

        let body = metrics_handler().await.unwrap();
        assert!(body.contains("nonce_keeper_transactions_failed_total"));
        assert!(body.contains("nonce_keeper_account_pending_transactions"));
    }
}
