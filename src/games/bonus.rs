//! Timed bonus sub-round
//!
//! Targets spawn on a fixed schedule from the moment the bonus starts and live
//! for a fixed time. The schedule is evaluated lazily against the clock on
//! every access, so no timer task is needed to keep a sub-round correct.

use crate::config::BonusConfig;
use crate::errors::{EngineResult, GameError};
use crate::games::rng::RandomSource;
use crate::games::types::{BonusView, TargetView};

/// Play field margin in percent, targets never spawn on the edges
const FIELD_MIN: u8 = 10;
const FIELD_SPAN: u32 = 81;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusTarget {
    pub id: u32,
    pub x: u8,
    pub y: u8,
    pub spawned_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BonusRound {
    rules: BonusConfig,
    started_at_ms: u64,
    deadline_ms: u64,
    score: u64,
    targets: Vec<BonusTarget>,
    spawned: u32,
    claimed: u32,
    expired: u32,
}

impl BonusRound {
    pub fn start(now_ms: u64, rules: BonusConfig) -> Self {
        let deadline_ms = now_ms.saturating_add(rules.duration_ms);
        Self {
            rules,
            started_at_ms: now_ms,
            deadline_ms,
            score: 0,
            targets: Vec::new(),
            spawned: 0,
            claimed: 0,
            expired: 0,
        }
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    pub fn is_finished(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }

    pub fn live_targets(&self) -> &[BonusTarget] {
        &self.targets
    }

    /// Spawns due targets and drops expired ones, up to `now_ms`
    pub fn advance(&mut self, now_ms: u64, rng: &dyn RandomSource) {
        loop {
            let spawn_at = self.spawn_time(self.spawned + 1);
            if spawn_at > now_ms || spawn_at >= self.deadline_ms {
                break;
            }
            self.spawned += 1;
            self.targets.push(BonusTarget {
                id: self.spawned,
                x: FIELD_MIN + rng.below(FIELD_SPAN) as u8,
                y: FIELD_MIN + rng.below(FIELD_SPAN) as u8,
                spawned_at_ms: spawn_at,
                expires_at_ms: spawn_at.saturating_add(self.rules.target_ttl_ms),
            });
        }

        let finished = self.is_finished(now_ms);
        let before = self.targets.len();
        self.targets.retain(|t| !finished && t.expires_at_ms > now_ms);
        self.expired += (before - self.targets.len()) as u32;
    }

    /// Hit a live target. Returns the score awarded.
    pub fn claim(&mut self, target_id: u32, now_ms: u64, rng: &dyn RandomSource) -> EngineResult<u64> {
        self.advance(now_ms, rng);

        if self.is_finished(now_ms) {
            return Err(GameError::transition("bonus round has ended"));
        }

        match self.targets.iter().position(|t| t.id == target_id) {
            Some(pos) => {
                self.targets.remove(pos);
                self.claimed += 1;
                self.score += self.rules.claim_score;
                Ok(self.rules.claim_score)
            }
            None if target_id >= 1 && target_id <= self.spawned => Err(GameError::transition(format!(
                "target {} was already claimed or has expired",
                target_id
            ))),
            None => Err(GameError::transition(format!("target {} has not spawned", target_id))),
        }
    }

    pub fn view(&self, now_ms: u64) -> BonusView {
        let active = !self.is_finished(now_ms);
        BonusView {
            active,
            score: self.score,
            remaining_ms: self.deadline_ms.saturating_sub(now_ms),
            targets: self
                .targets
                .iter()
                .filter(|_| active)
                .map(|t| TargetView {
                    id: t.id,
                    x: t.x,
                    y: t.y,
                    expires_in_ms: t.expires_at_ms.saturating_sub(now_ms),
                })
                .collect(),
        }
    }

    fn spawn_time(&self, nth: u32) -> u64 {
        self.started_at_ms
            .saturating_add(self.rules.spawn_interval_ms.saturating_mul(nth as u64))
    }
}
