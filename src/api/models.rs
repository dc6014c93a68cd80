//! API Request and Response Models

use crate::games::settlement::SettlementRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub live_rounds: usize,
    pub pending_settlements: usize,
}

/// POST /rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRoundRequest {
    pub owner_id: String,
    pub stake: u64,
    pub hazard_count: usize,
}

/// POST /rounds/:id/reveal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRequest {
    pub owner_id: String,
    pub cell_index: usize,
}

/// POST /rounds/:id/cashout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOutRequest {
    pub owner_id: String,
}

/// POST /rounds/:id/bonus/claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusClaimRequest {
    pub owner_id: String,
    pub target_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub owner_id: String,
    pub balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementsResponse {
    pub settlements: Vec<SettlementRecord>,
    pub count: usize,
}

impl From<Vec<SettlementRecord>> for SettlementsResponse {
    fn from(settlements: Vec<SettlementRecord>) -> Self {
        Self {
            count: settlements.len(),
            settlements,
        }
    }
}
