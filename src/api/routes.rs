//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))

        // Round lifecycle
        .route("/rounds", post(start_round_handler))
        .route("/rounds/:id", get(round_handler))
        .route("/rounds/:id/reveal", post(reveal_handler))
        .route("/rounds/:id/cashout", post(cash_out_handler))
        .route("/rounds/:id/bonus/claim", post(bonus_claim_handler))

        .route("/accounts/:owner_id/balance", get(balance_handler))

        // Reconciliation
        .route("/settlements/pending", get(pending_settlements_handler))
        .route("/settlements/retry", post(retry_settlements_handler))

        .with_state(state)
}
