//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::GameError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Engine error code (INVALID_PARAMETERS, ROUND_NOT_FOUND, ...)
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Engine error bound to the request it failed
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    Game(GameError),
    BadRequest(String),
}

impl ApiError {
    pub fn game(request_id: String, error: GameError) -> Self {
        Self {
            kind: ApiErrorKind::Game(error),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Game(error) => match error {
                GameError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
                GameError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                GameError::RoundNotFound(_) => StatusCode::NOT_FOUND,
                GameError::InvalidTransition(_) => StatusCode::CONFLICT,
                GameError::SettlementPending { .. } | GameError::Ledger(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
        }
    }

    fn code(&self) -> &'static str {
        match &self.kind {
            ApiErrorKind::BadRequest(_) => "BAD_REQUEST",
            ApiErrorKind::Game(error) => error.code(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match &self.kind {
            ApiErrorKind::Game(GameError::InsufficientFunds { required, available }) => {
                Some(serde_json::json!({ "required": required, "available": available }))
            }
            ApiErrorKind::Game(GameError::SettlementPending { round_id, .. }) => {
                Some(serde_json::json!({ "round_id": round_id }))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::Game(error) => write!(f, "[{}] {}", self.request_id, error),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.kind {
            ApiErrorKind::Game(error) => error.to_string(),
            ApiErrorKind::BadRequest(msg) => msg.clone(),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: self.code().to_string(),
                message,
                details: self.details(),
            },
        });

        (status, body).into_response()
    }
}
