use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Contents of one board cell
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Safe,
    Hazard,
    BonusTrigger,
}

/// Lifecycle state of a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Active,
    InBonus,
    WonCashedOut,
    LostHitHazard,
}

impl RoundState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundState::WonCashedOut | RoundState::LostHitHazard)
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Active => write!(f, "active"),
            RoundState::InBonus => write!(f, "in_bonus"),
            RoundState::WonCashedOut => write!(f, "won_cashed_out"),
            RoundState::LostHitHazard => write!(f, "lost_hit_hazard"),
        }
    }
}

/// Payout settlement progress of a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    /// Round still in play
    Unsettled,
    Settled,
    /// Outcome decided, payout credit awaiting reconciliation
    Pending,
}

/// Payout multiplier stored as integer hundredths (1.15x == 115)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(100);

    pub fn from_hundredths(hundredths: u64) -> Self {
        Self(hundredths)
    }

    pub fn hundredths(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// floor(stake * multiplier), exact
    pub fn apply(self, stake: u64) -> u64 {
        let scaled = stake as u128 * self.0 as u128 / 100;
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / 100, self.0 % 100)
    }
}

/// A revealed cell as shown to the player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealedCell {
    pub index: usize,
    pub cell: CellType,
}

/// Live bonus target as shown to the player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetView {
    pub id: u32,
    /// Horizontal position in percent of the play field
    pub x: u8,
    /// Vertical position in percent of the play field
    pub y: u8,
    pub expires_in_ms: u64,
}

/// Bonus sub-round as shown to the player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BonusView {
    pub active: bool,
    pub score: u64,
    pub remaining_ms: u64,
    pub targets: Vec<TargetView>,
}

/// Client-facing snapshot of a round. Never carries unrevealed cells of a
/// round still in play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundView {
    pub round_id: Uuid,
    pub owner_id: String,
    pub state: RoundState,
    pub stake: u64,
    pub hazard_count: usize,
    pub board_size: usize,
    pub multiplier: f64,
    /// Current cash-out value while in play, final payout once resolved
    pub payout: u64,
    /// Chance that the next pick is a hazard, in [0, 1]
    pub risk: f64,
    pub revealed: Vec<RevealedCell>,
    pub bonus_score_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bonus: Option<BonusView>,
    pub settlement: SettlementState,
    pub seed_commitment: String,
    /// Full layout, disclosed once the round is resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board: Option<Vec<CellType>>,
    /// Hex board seed, disclosed once the round is resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_payout_is_exact() {
        // 100 * 1.15 in binary floating point floors to 114
        assert_eq!(Multiplier::from_hundredths(115).apply(100), 115);
        assert_eq!(Multiplier::from_hundredths(133).apply(7), 9);
        assert_eq!(Multiplier::ONE.apply(250), 250);
    }

    #[test]
    fn test_multiplier_display() {
        assert_eq!(Multiplier::from_hundredths(105).to_string(), "1.05x");
        assert_eq!(Multiplier::from_hundredths(1230).to_string(), "12.30x");
    }

    #[test]
    fn test_round_state_serialization() {
        let json = serde_json::to_string(&RoundState::LostHitHazard).unwrap();
        assert_eq!(json, "\"lost_hit_hazard\"");
        assert!(RoundState::WonCashedOut.is_terminal());
        assert!(!RoundState::InBonus.is_terminal());
    }
}
