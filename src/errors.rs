//! Error types for the Anomaly Hunt engine
//!
//! Every engine operation is all-or-nothing: an error means no round state was
//! mutated, except for `SettlementPending`, which reports a decided outcome whose
//! balance write is still outstanding.

use crate::games::settlement::LedgerError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum GameError {
    /// Bad stake, hazard count or cell index. Rejected before any side effect.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Stake exceeds the owner's balance. Rejected before the debit.
    #[error("Insufficient funds: stake {required}, balance {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// Operation not allowed in the round's current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Round not found: {0}")]
    RoundNotFound(Uuid),

    /// Outcome decided but the payout credit is not yet confirmed
    #[error("Settlement pending for round {round_id}: {reason}")]
    SettlementPending { round_id: Uuid, reason: String },

    /// Balance collaborator failed before a round came into existence
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl GameError {
    /// Stable machine-readable code used by the API layer
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidParameters(_) => "INVALID_PARAMETERS",
            GameError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            GameError::InvalidTransition(_) => "INVALID_TRANSITION",
            GameError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            GameError::SettlementPending { .. } => "SETTLEMENT_PENDING",
            GameError::Ledger(_) => "LEDGER_UNAVAILABLE",
        }
    }

    pub(crate) fn transition(msg: impl Into<String>) -> Self {
        GameError::InvalidTransition(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GameError::InvalidParameters(msg.into())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience type alias for engine results
pub type EngineResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GameError::InsufficientFunds {
            required: 100,
            available: 40,
        };

        assert!(err.to_string().contains("stake 100"));
        assert!(err.to_string().contains("balance 40"));
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_ledger_error_conversion() {
        let err: GameError = LedgerError::Unavailable("connection reset".to_string()).into();

        match err {
            GameError::Ledger(_) => {}
            _ => panic!("Expected ledger error"),
        }
    }

    #[test]
    fn test_configuration_error_details() {
        let err = ConfigurationError::invalid("game.house_edge", 1.5, "must be in (0, 1]");

        assert!(err.to_string().contains("game.house_edge"));
        assert!(err.to_string().contains("1.5"));
    }
}
