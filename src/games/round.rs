//! Round state machine
//!
//! `Active -> InBonus -> Active` while in play, `Active -> WonCashedOut` or
//! `Active -> LostHitHazard` to resolve. A failed operation leaves the round
//! untouched.

use crate::config::BonusConfig;
use crate::errors::{EngineResult, GameError};
use crate::games::bonus::BonusRound;
use crate::games::fairness::seed_commitment;
use crate::games::multiplier;
use crate::games::rng::RandomSource;
use crate::games::types::{
    CellType, Multiplier, RevealedCell, RoundState, RoundView, SettlementState,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

/// What a reveal uncovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealOutcome {
    Safe,
    Hazard,
    BonusTriggered,
}

/// Per-round rules, fixed when the round starts
#[derive(Debug, Clone)]
pub struct RoundRules {
    pub house_edge: f64,
    pub bonus: BonusConfig,
}

/// Server-side state of one wager
#[derive(Debug, Clone)]
pub struct Round {
    id: Uuid,
    owner_id: String,
    stake: u64,
    hazard_count: usize,
    board: Vec<CellType>,
    seed: [u8; 32],
    seed_commitment: String,
    revealed: BTreeSet<usize>,
    multiplier: Multiplier,
    state: RoundState,
    bonus: Option<BonusRound>,
    bonus_score_total: u64,
    payout: u64,
    settlement: SettlementState,
    rules: RoundRules,
    created_at_ms: u64,
    resolved_at_ms: Option<u64>,
}

impl Round {
    pub fn new(
        id: Uuid,
        owner_id: String,
        stake: u64,
        hazard_count: usize,
        board: Vec<CellType>,
        seed: [u8; 32],
        rules: RoundRules,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            owner_id,
            stake,
            hazard_count,
            board,
            seed_commitment: seed_commitment(&seed),
            seed,
            revealed: BTreeSet::new(),
            multiplier: Multiplier::ONE,
            state: RoundState::Active,
            bonus: None,
            bonus_score_total: 0,
            payout: 0,
            settlement: SettlementState::Unsettled,
            rules,
            created_at_ms: now_ms,
            resolved_at_ms: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn stake(&self) -> u64 {
        self.stake
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn multiplier(&self) -> Multiplier {
        self.multiplier
    }

    pub fn payout(&self) -> u64 {
        self.payout
    }

    pub fn settlement(&self) -> SettlementState {
        self.settlement
    }

    pub fn set_settlement(&mut self, settlement: SettlementState) {
        self.settlement = settlement;
    }

    /// Engine clock time of resolution, in milliseconds
    pub fn resolved_at_ms(&self) -> Option<u64> {
        self.resolved_at_ms
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Value the player would receive by cashing out now
    pub fn cash_out_value(&self) -> u64 {
        self.multiplier
            .apply(self.stake)
            .saturating_add(self.bonus_score_total)
    }

    /// Close the bonus sub-round once its deadline has passed. Returns true
    /// when this call moved the round back to `Active`.
    pub fn sync_bonus(&mut self, now_ms: u64, rng: &dyn RandomSource) -> bool {
        if self.state != RoundState::InBonus {
            return false;
        }
        let Some(bonus) = self.bonus.as_mut() else {
            return false;
        };

        bonus.advance(now_ms, rng);
        if !bonus.is_finished(now_ms) {
            return false;
        }

        self.bonus_score_total = self.bonus_score_total.saturating_add(bonus.score());
        self.state = RoundState::Active;
        true
    }

    pub fn reveal(&mut self, index: usize, now_ms: u64, rng: &dyn RandomSource) -> EngineResult<RevealOutcome> {
        self.sync_bonus(now_ms, rng);
        self.ensure_playable("reveal")?;

        let Some(cell) = self.board.get(index).copied() else {
            return Err(GameError::invalid(format!(
                "cell index {} is outside the board of {}",
                index,
                self.board.len()
            )));
        };

        if self.revealed.contains(&index) {
            return Err(GameError::transition(format!("cell {} is already revealed", index)));
        }

        match cell {
            CellType::Hazard => {
                self.revealed.extend(0..self.board.len());
                self.payout = 0;
                self.resolve(RoundState::LostHitHazard, now_ms);
                Ok(RevealOutcome::Hazard)
            }
            CellType::Safe => {
                self.multiplier = multiplier::next_multiplier(
                    self.multiplier,
                    self.board.len(),
                    self.revealed.len(),
                    self.hazard_count,
                    self.rules.house_edge,
                );
                self.revealed.insert(index);
                Ok(RevealOutcome::Safe)
            }
            CellType::BonusTrigger => {
                self.revealed.insert(index);
                self.bonus = Some(BonusRound::start(now_ms, self.rules.bonus.clone()));
                self.state = RoundState::InBonus;
                Ok(RevealOutcome::BonusTriggered)
            }
        }
    }

    /// Resolve as a win. Returns the payout to settle.
    pub fn cash_out(&mut self, now_ms: u64, rng: &dyn RandomSource) -> EngineResult<u64> {
        self.sync_bonus(now_ms, rng);
        self.ensure_playable("cash out")?;

        if self.multiplier <= Multiplier::ONE {
            return Err(GameError::transition("cannot cash out before a safe reveal"));
        }

        self.payout = self.cash_out_value();
        self.resolve(RoundState::WonCashedOut, now_ms);
        Ok(self.payout)
    }

    pub fn claim_bonus(&mut self, target_id: u32, now_ms: u64, rng: &dyn RandomSource) -> EngineResult<u64> {
        self.sync_bonus(now_ms, rng);

        let bonus = match (self.state, self.bonus.as_mut()) {
            (RoundState::InBonus, Some(bonus)) => bonus,
            _ => return Err(GameError::transition("no bonus round is running")),
        };

        bonus.claim(target_id, now_ms, rng)
    }

    pub fn view(&self, now_ms: u64) -> RoundView {
        let resolved = self.is_terminal();
        let hazards_remaining = if resolved { 0 } else { self.hazard_count };

        RoundView {
            round_id: self.id,
            owner_id: self.owner_id.clone(),
            state: self.state,
            stake: self.stake,
            hazard_count: self.hazard_count,
            board_size: self.board.len(),
            multiplier: self.multiplier.as_f64(),
            payout: if resolved { self.payout } else { self.cash_out_value() },
            risk: multiplier::risk(self.board.len(), self.revealed.len(), hazards_remaining),
            revealed: self
                .revealed
                .iter()
                .map(|&index| RevealedCell {
                    index,
                    cell: self.board[index],
                })
                .collect(),
            bonus_score_total: self.bonus_score_total,
            bonus: self.bonus.as_ref().map(|b| b.view(now_ms)),
            settlement: self.settlement,
            seed_commitment: self.seed_commitment.clone(),
            board: resolved.then(|| self.board.clone()),
            seed: resolved.then(|| hex::encode(self.seed)),
            created_at: timestamp(self.created_at_ms),
            resolved_at: self.resolved_at_ms.map(timestamp),
        }
    }

    fn ensure_playable(&self, action: &str) -> EngineResult<()> {
        match self.state {
            RoundState::Active => Ok(()),
            RoundState::InBonus => Err(GameError::transition(format!(
                "cannot {} while the bonus round is running",
                action
            ))),
            state => Err(GameError::transition(format!(
                "cannot {} a round that is {}",
                action, state
            ))),
        }
    }

    fn resolve(&mut self, state: RoundState, now_ms: u64) {
        self.state = state;
        self.resolved_at_ms = Some(now_ms);
    }
}

fn timestamp(ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms as i64).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::board;
    use crate::games::rng::SeededRandom;

    fn round_with(board: Vec<CellType>, hazards: usize) -> Round {
        Round::new(
            Uuid::new_v4(),
            "player-1".to_string(),
            100,
            hazards,
            board,
            [9u8; 32],
            RoundRules {
                house_edge: 0.99,
                bonus: BonusConfig::default(),
            },
            0,
        )
    }

    /// 6 cells: hazard at 0, bonus at 1, safe 2..6
    fn small_round() -> Round {
        use CellType::*;
        round_with(vec![Hazard, BonusTrigger, Safe, Safe, Safe, Safe], 1)
    }

    fn index_of(round: &Round, cell: CellType) -> usize {
        round.board.iter().position(|c| *c == cell).unwrap()
    }

    #[test]
    fn test_safe_reveal_raises_multiplier() {
        let rng = SeededRandom::new(1);
        let board = board::generate(36, 5, &[3u8; 32]).unwrap();
        let mut round = round_with(board, 5);
        let safe = index_of(&round, CellType::Safe);

        assert_eq!(round.reveal(safe, 0, &rng).unwrap(), RevealOutcome::Safe);
        let m = round.multiplier();
        assert!(m > Multiplier::ONE);
        assert!(m.hundredths() <= 115);
        assert_eq!(round.view(0).payout, m.apply(100));
    }

    #[test]
    fn test_hazard_resolves_as_loss() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        round.reveal(2, 0, &rng).unwrap();

        assert_eq!(round.reveal(0, 0, &rng).unwrap(), RevealOutcome::Hazard);
        assert_eq!(round.state(), RoundState::LostHitHazard);
        assert_eq!(round.payout(), 0);
        assert_eq!(round.revealed_count(), 6);

        let view = round.view(0);
        assert!(view.board.is_some());
        assert!(view.seed.is_some());
        assert!(round.reveal(3, 0, &rng).is_err());
        assert!(round.cash_out(0, &rng).is_err());
    }

    #[test]
    fn test_double_reveal_rejected_without_change() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        round.reveal(2, 0, &rng).unwrap();
        let before = round.multiplier();

        assert!(matches!(round.reveal(2, 0, &rng), Err(GameError::InvalidTransition(_))));
        assert_eq!(round.multiplier(), before);
        assert_eq!(round.revealed_count(), 1);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        assert!(matches!(round.reveal(6, 0, &rng), Err(GameError::InvalidParameters(_))));
    }

    #[test]
    fn test_cash_out_requires_safe_reveal() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        assert!(matches!(round.cash_out(0, &rng), Err(GameError::InvalidTransition(_))));
        assert_eq!(round.state(), RoundState::Active);

        round.reveal(2, 0, &rng).unwrap();
        let expected = round.multiplier().apply(100);
        assert_eq!(round.cash_out(0, &rng).unwrap(), expected);
        assert_eq!(round.state(), RoundState::WonCashedOut);
        assert!(round.cash_out(0, &rng).is_err());
    }

    #[test]
    fn test_bonus_blocks_play_until_deadline() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        round.reveal(2, 0, &rng).unwrap();
        let before = round.multiplier();

        assert_eq!(round.reveal(1, 1_000, &rng).unwrap(), RevealOutcome::BonusTriggered);
        assert_eq!(round.state(), RoundState::InBonus);
        assert_eq!(round.multiplier(), before);
        assert!(round.reveal(3, 2_000, &rng).is_err());
        assert!(round.cash_out(2_000, &rng).is_err());

        // first target spawns 600ms in
        assert_eq!(round.claim_bonus(1, 1_700, &rng).unwrap(), 200);
        assert_eq!(round.claim_bonus(2, 2_300, &rng).unwrap(), 200);

        // deadline at 11_000
        assert_eq!(round.reveal(3, 11_000, &rng).unwrap(), RevealOutcome::Safe);
        assert_eq!(round.state(), RoundState::Active);
        assert_eq!(round.view(11_000).bonus_score_total, 400);

        let payout = round.cash_out(11_000, &rng).unwrap();
        assert_eq!(payout, round.multiplier().apply(100) + 400);
    }

    #[test]
    fn test_claim_without_bonus_rejected() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        assert!(round.claim_bonus(1, 0, &rng).is_err());
    }

    #[test]
    fn test_no_auto_win_after_clearing_board() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        for i in 2..6 {
            round.reveal(i, 0, &rng).unwrap();
        }
        assert_eq!(round.state(), RoundState::Active);
        assert!(round.cash_out(0, &rng).is_ok());
    }

    #[test]
    fn test_view_hides_board_while_in_play() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        round.reveal(3, 0, &rng).unwrap();

        let view = round.view(0);
        assert!(view.board.is_none());
        assert!(view.seed.is_none());
        assert_eq!(view.revealed, vec![RevealedCell { index: 3, cell: CellType::Safe }]);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("board").is_none());
        assert!(json.get("seed").is_none());
    }

    #[test]
    fn test_timestamps_follow_engine_clock() {
        let rng = SeededRandom::new(1);
        let mut round = small_round();
        round.reveal(2, 0, &rng).unwrap();
        assert!(round.view(0).resolved_at.is_none());

        round.cash_out(90_000, &rng).unwrap();
        assert_eq!(round.resolved_at_ms(), Some(90_000));

        let view = round.view(90_000);
        assert_eq!(view.created_at.timestamp_millis(), 0);
        assert_eq!(view.resolved_at.unwrap().timestamp_millis(), 90_000);
    }
}
