//! HTTP API for callers: account inspection, deployments, cancellations
//! and transfers

use crate::config::ApiConfig;
use crate::error::{TxError, TxResult};
use crate::orchestrator::{DeployOutcome, DeploymentOrchestrator, TxOutcome};
use crate::tx::{Account, GasParams, TRANSFER_GAS_LIMIT};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DeploymentOrchestrator>,
}

/// Build the API router
pub fn router(orchestrator: Arc<DeploymentOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/accounts/:address", get(get_account))
        .route("/deploy", post(deploy))
        .route("/cancel", post(cancel))
        .route("/transfer", post(transfer))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(AppState { orchestrator })
}

/// Run the HTTP API server until `shutdown` turns true
pub async fn run_server(
    config: ApiConfig,
    orchestrator: Arc<DeploymentOrchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> TxResult<()> {
    let app = router(orchestrator);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TxError::Config(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| TxError::Config(format!("api server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        signer: to_checksum(&state.orchestrator.address(), None),
    })
}

async fn get_account(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let address = parse_address(&address)?;
    let account = state.orchestrator.inspect_account(address).await?;
    Ok(Json(AccountResponse::from(account)))
}

async fn deploy(
    State(state): State<AppState>,
    Json(body): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    let init_code = parse_bytes(&body.init_code)?;
    let gas = GasParams::new(
        parse_u64(&body.gas_limit, "gas_limit")?,
        parse_quantity(&body.gas_price, "gas_price")?,
    )?;

    let outcome = state
        .orchestrator
        .deploy_contract(init_code, gas, body.timeout_secs.map(Duration::from_secs))
        .await?;
    Ok(Json(DeployResponse::from(outcome)))
}

async fn cancel(
    State(state): State<AppState>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<TxResponse>, ApiError> {
    let floor = parse_quantity(&body.gas_price_floor, "gas_price_floor")?;

    let outcome = state
        .orchestrator
        .cancel_pending(floor, body.timeout_secs.map(Duration::from_secs))
        .await?;
    Ok(Json(TxResponse::from(outcome)))
}

async fn transfer(
    State(state): State<AppState>,
    Json(body): Json<TransferRequest>,
) -> Result<Json<TxResponse>, ApiError> {
    let to = parse_address(&body.to)?;
    let value = parse_quantity(&body.value, "value")?;
    let gas_limit = match &body.gas_limit {
        Some(limit) => parse_u64(limit, "gas_limit")?,
        None => TRANSFER_GAS_LIMIT,
    };
    let gas = GasParams::new(gas_limit, parse_quantity(&body.gas_price, "gas_price")?)?;

    let outcome = state
        .orchestrator
        .send_transfer(to, value, gas, body.timeout_secs.map(Duration::from_secs))
        .await?;
    Ok(Json(TxResponse::from(outcome)))
}

fn parse_address(raw: &str) -> TxResult<Address> {
    raw.parse()
        .map_err(|_| TxError::MalformedRequest(format!("invalid address: {}", raw)))
}

fn parse_quantity(raw: &str, field: &str) -> TxResult<U256> {
    U256::from_dec_str(raw)
        .map_err(|_| TxError::MalformedRequest(format!("{} must be a decimal integer", field)))
}

fn parse_u64(raw: &str, field: &str) -> TxResult<u64> {
    raw.parse()
        .map_err(|_| TxError::MalformedRequest(format!("{} must be a decimal integer", field)))
}

fn parse_bytes(raw: &str) -> TxResult<Bytes> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| TxError::MalformedRequest(format!("init_code is not hex: {}", e)))
}

/// Maps a `TxError` onto an HTTP status and JSON body
pub struct ApiError(TxError);

impl From<TxError> for ApiError {
    fn from(err: TxError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            TxError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            TxError::NothingToCancel { .. } | TxError::AccountBusy { .. } => StatusCode::CONFLICT,
            TxError::Submission { .. } | TxError::Reverted { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            TxError::Rpc { .. } | TxError::InconsistentNonce { .. } => StatusCode::BAD_GATEWAY,
            TxError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TxError::Dropped { .. } | TxError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TxError::Config(_) | TxError::Wallet(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.0.kind(),
            message: self.0.to_string(),
            recoverable: self.0.is_recoverable(),
            nonce: self.0.nonce(),
            hash: self.0.hash(),
        };
        (self.status(), Json(body)).into_response()
    }
}

// Request types

#[derive(Deserialize)]
struct DeployRequest {
    init_code: String,
    gas_limit: String,
    gas_price: String,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct CancelRequest {
    gas_price_floor: String,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
struct TransferRequest {
    to: String,
    value: String,
    gas_price: String,
    gas_limit: Option<String>,
    timeout_secs: Option<u64>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    signer: String,
}

#[derive(Serialize)]
struct AccountResponse {
    address: String,
    confirmed_nonce: u64,
    pending_nonce: u64,
    pending_count: u64,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            address: to_checksum(&account.address, None),
            confirmed_nonce: account.confirmed_nonce,
            pending_nonce: account.pending_nonce,
            pending_count: account.pending_count(),
        }
    }
}

#[derive(Serialize)]
struct DeployResponse {
    operation_id: Uuid,
    contract_address: String,
    block_number: u64,
    transaction_hash: H256,
    nonce: u64,
    phases: Vec<&'static str>,
}

impl From<DeployOutcome> for DeployResponse {
    fn from(outcome: DeployOutcome) -> Self {
        Self {
            operation_id: outcome.operation_id,
            contract_address: to_checksum(&outcome.contract_address, None),
            block_number: outcome.block_number,
            transaction_hash: outcome.transaction_hash,
            nonce: outcome.nonce,
            phases: outcome.trail.names(),
        }
    }
}

#[derive(Serialize)]
struct TxResponse {
    operation_id: Uuid,
    block_number: u64,
    transaction_hash: H256,
    nonce: u64,
    phases: Vec<&'static str>,
}

impl From<TxOutcome> for TxResponse {
    fn from(outcome: TxOutcome) -> Self {
        Self {
            operation_id: outcome.operation_id,
            block_number: outcome.block_number,
            transaction_hash: outcome.transaction_hash,
            nonce: outcome.nonce,
            phases: outcome.trail.names(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<H256>,
}
