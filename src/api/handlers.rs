//! Request Handlers
//!
//! Thin adapters from HTTP to [`GameEngine`] operations.

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::games::{engine::GameEngine, types::RoundView};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state
pub struct AppState {
    pub engine: Arc<GameEngine>,
}

/// Unwraps a JSON body, reporting malformed input under the request id
fn body<T>(request_id: &RequestId, payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(request_id.0.clone(), rejection.body_text()))
}

fn round_id(request_id: &RequestId, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::bad_request(request_id.0.clone(), format!("'{}' is not a valid round id", raw))
    })
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        live_rounds: state.engine.live_round_count(),
        pending_settlements: state.engine.pending_settlements().len(),
    })
}

/// POST /rounds
pub async fn start_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartRoundRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RoundView>), ApiError> {
    let req = body(&request_id, payload)?;

    let view = state
        .engine
        .start_round(&req.owner_id, req.stake, req.hazard_count)
        .await
        .map_err(|e| ApiError::game(request_id.0.clone(), e))?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /rounds/:id
pub async fn round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoundView>, ApiError> {
    let id = round_id(&request_id, &id)?;

    state
        .engine
        .round(id)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /rounds/:id/reveal
pub async fn reveal_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<RevealRequest>, JsonRejection>,
) -> Result<Json<RoundView>, ApiError> {
    let id = round_id(&request_id, &id)?;
    let req = body(&request_id, payload)?;

    state
        .engine
        .reveal(id, &req.owner_id, req.cell_index)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /rounds/:id/cashout
pub async fn cash_out_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<CashOutRequest>, JsonRejection>,
) -> Result<Json<RoundView>, ApiError> {
    let id = round_id(&request_id, &id)?;
    let req = body(&request_id, payload)?;

    state
        .engine
        .cash_out(id, &req.owner_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// POST /rounds/:id/bonus/claim
pub async fn bonus_claim_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<BonusClaimRequest>, JsonRejection>,
) -> Result<Json<RoundView>, ApiError> {
    let id = round_id(&request_id, &id)?;
    let req = body(&request_id, payload)?;

    state
        .engine
        .bonus_claim(id, &req.owner_id, req.target_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::game(request_id.0, e))
}

/// GET /accounts/:owner_id/balance
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(owner_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .engine
        .balance(&owner_id)
        .await
        .map_err(|e| ApiError::game(request_id.0, e))?;

    Ok(Json(BalanceResponse { owner_id, balance }))
}

/// GET /settlements/pending
pub async fn pending_settlements_handler(State(state): State<Arc<AppState>>) -> Json<SettlementsResponse> {
    Json(state.engine.pending_settlements().into())
}

/// POST /settlements/retry
///
/// Returns the settlements completed by this pass.
pub async fn retry_settlements_handler(State(state): State<Arc<AppState>>) -> Json<SettlementsResponse> {
    Json(state.engine.retry_pending_settlements().await.into())
}
