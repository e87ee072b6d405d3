//! HTTP routes exposing the ledger.
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{
    AuditEntry, AuditFilter, Block, ChainViolation, CustomRecord, DocumentProof, DocumentRecord,
    LeaseRecord, Ledger, LedgerError, PaymentRecord, Record, RecordReceipt, VendorContractRecord,
};
use ledger_storage::SledStore;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::constants::DEFAULT_PAGE_LIMIT;
use crate::error::ApiError;

#[derive(Clone)]
pub(crate) struct AppState {
    pub ledger: Arc<Ledger<SledStore>>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Head {
    pub height: u64,
    pub hash: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Validity {
    pub valid: bool,
    pub violations: Vec<ChainViolation>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Verification {
    pub hash: String,
    pub verified: bool,
}

#[derive(Deserialize)]
pub(crate) struct Page {
    #[serde(default)]
    start: u64,
    limit: Option<u32>,
}

/// Document content, either as text or hex-encoded bytes.
#[derive(Deserialize)]
pub(crate) struct ContentIn {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_hex: Option<String>,
}

impl ContentIn {
    fn bytes(&self) -> Result<Vec<u8>, ApiError> {
        match (&self.content_hex, &self.content) {
            (Some(h), _) => {
                hex::decode(h).map_err(|e| ApiError::BadRequest(format!("content_hex: {e}")))
            }
            (None, Some(text)) => Ok(text.as_bytes().to_vec()),
            (None, None) => Err(ApiError::BadRequest(
                "must provide content or content_hex".into(),
            )),
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct IntegrityIn {
    #[serde(flatten)]
    content: ContentIn,
    hash: String,
    signature: String,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Integrity {
    pub valid: bool,
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain/head", get(head))
        .route("/chain/valid", get(validity))
        .route("/blocks", get(list_blocks))
        .route("/blocks/{hash}", get(get_block))
        .route("/blocks/{hash}/verify", get(verify_block))
        .route("/entities/{id}/history", get(entity_history))
        .route("/audit", get(audit))
        .route("/records", post(add_custom))
        .route("/records/lease", post(record_lease))
        .route("/records/vendor-contract", post(record_vendor_contract))
        .route("/records/payment", post(record_payment))
        .route("/records/document", post(record_document))
        .route("/proofs", post(generate_proof))
        .route("/proofs/verify", post(verify_integrity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run `f` against the ledger on the blocking pool; mining and full-chain
/// scans are CPU bound.
async fn with_ledger<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Ledger<SledStore>) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    let ledger = Arc::clone(&state.ledger);
    Ok(tokio::task::spawn_blocking(move || f(&ledger)).await??)
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn head(State(state): State<AppState>) -> Result<Json<Head>, ApiError> {
    let (height, hash) = state.ledger.tip()?;
    Ok(Json(Head { height, hash }))
}

async fn validity(State(state): State<AppState>) -> Result<Json<Validity>, ApiError> {
    let violations = with_ledger(&state, |l| l.validate()).await?;
    Ok(Json(Validity {
        valid: violations.is_empty(),
        violations,
    }))
}

async fn list_blocks(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Block>>, ApiError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    Ok(Json(state.ledger.blocks(page.start, limit)?))
}

async fn get_block(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Block>, ApiError> {
    state
        .ledger
        .get_block(&hash)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no block with hash {hash}")))
}

async fn verify_block(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<Verification>, ApiError> {
    let lookup = hash.clone();
    let verified = with_ledger(&state, move |l| l.verify_block(&lookup)).await?;
    Ok(Json(Verification { hash, verified }))
}

async fn entity_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Block>>, ApiError> {
    Ok(Json(state.ledger.entity_history(&id)?))
}

async fn audit(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    Ok(Json(state.ledger.audit_trail(filter)?.collect()))
}

async fn add_custom(
    State(state): State<AppState>,
    Json(record): Json<CustomRecord>,
) -> Result<Json<Block>, ApiError> {
    let block = with_ledger(&state, move |l| l.add_block(Record::Custom(record))).await?;
    Ok(Json(block))
}

async fn record_lease(
    State(state): State<AppState>,
    Json(lease): Json<LeaseRecord>,
) -> Result<Json<RecordReceipt>, ApiError> {
    Ok(Json(with_ledger(&state, move |l| l.record_lease(lease)).await?))
}

async fn record_vendor_contract(
    State(state): State<AppState>,
    Json(contract): Json<VendorContractRecord>,
) -> Result<Json<RecordReceipt>, ApiError> {
    Ok(Json(
        with_ledger(&state, move |l| l.record_vendor_contract(contract)).await?,
    ))
}

async fn record_payment(
    State(state): State<AppState>,
    Json(payment): Json<PaymentRecord>,
) -> Result<Json<RecordReceipt>, ApiError> {
    Ok(Json(
        with_ledger(&state, move |l| l.record_payment(payment)).await?,
    ))
}

async fn record_document(
    State(state): State<AppState>,
    Json(document): Json<DocumentRecord>,
) -> Result<Json<RecordReceipt>, ApiError> {
    Ok(Json(
        with_ledger(&state, move |l| l.record_document(document)).await?,
    ))
}

async fn generate_proof(
    State(state): State<AppState>,
    Json(input): Json<ContentIn>,
) -> Result<Json<DocumentProof>, ApiError> {
    let content = input.bytes()?;
    Ok(Json(state.ledger.generate_proof(&content)))
}

async fn verify_integrity(
    State(state): State<AppState>,
    Json(input): Json<IntegrityIn>,
) -> Result<Json<Integrity>, ApiError> {
    let content = input.content.bytes()?;
    let valid = state
        .ledger
        .verify_integrity(&content, &input.hash, &input.signature);
    Ok(Json(Integrity { valid }))
}
