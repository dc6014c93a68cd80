//! Game engine service
//!
//! Owns the registry of live rounds and routes every player operation through
//! the round state machine. Operations on one round are serialized by a
//! per-round async mutex; different rounds run fully in parallel.

use crate::config::{BonusConfig, EngineConfig, GameConfig};
use crate::errors::{EngineResult, GameError};
use crate::games::board;
use crate::games::rng::{Clock, OsRandom, RandomSource, SystemClock};
use crate::games::round::{RevealOutcome, Round, RoundRules};
use crate::games::settlement::{BalanceLedger, SettlementCoordinator, SettlementRecord, UnconfirmedDebit};
use crate::games::types::{RoundView, SettlementState};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one background sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub bonuses_closed: usize,
    pub rounds_archived: usize,
}

pub struct GameEngine {
    game: GameConfig,
    bonus: BonusConfig,
    rounds: DashMap<Uuid, Arc<Mutex<Round>>>,
    settlement: SettlementCoordinator,
    rng: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl GameEngine {
    pub fn new(
        config: &EngineConfig,
        ledger: Arc<dyn BalanceLedger>,
        rng: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            game: config.game.clone(),
            bonus: config.bonus.clone(),
            rounds: DashMap::new(),
            settlement: SettlementCoordinator::new(ledger, config.settlement.clone()),
            rng,
            clock,
        }
    }

    /// Engine with OS randomness and the system clock
    pub fn with_system_sources(config: &EngineConfig, ledger: Arc<dyn BalanceLedger>) -> Self {
        Self::new(config, ledger, Arc::new(OsRandom), Arc::new(SystemClock))
    }

    /// Validate, debit the stake, deal a board and open the round
    pub async fn start_round(&self, owner_id: &str, stake: u64, hazard_count: usize) -> EngineResult<RoundView> {
        if owner_id.trim().is_empty() {
            return Err(GameError::invalid("owner id must not be empty"));
        }
        if stake == 0 {
            return Err(GameError::invalid("stake must be positive"));
        }
        board::validate_layout(self.game.board_size, hazard_count)?;

        let round_id = Uuid::new_v4();
        let seed = self.rng.seed();
        let board = board::generate(self.game.board_size, hazard_count, &seed)?;

        let balance = self.settlement.debit_stake(round_id, owner_id, stake).await?;

        let now = self.clock.now_ms();
        let round = Round::new(
            round_id,
            owner_id.to_string(),
            stake,
            hazard_count,
            board,
            seed,
            RoundRules {
                house_edge: self.game.house_edge,
                bonus: self.bonus.clone(),
            },
            now,
        );
        let view = round.view(now);
        self.rounds.insert(round_id, Arc::new(Mutex::new(round)));

        info!(%round_id, owner = owner_id, stake, hazard_count, balance, "round started");
        Ok(view)
    }

    pub async fn reveal(&self, round_id: Uuid, owner_id: &str, cell_index: usize) -> EngineResult<RoundView> {
        let handle = self.round_handle(round_id)?;
        let mut round = handle.lock().await;
        Self::ensure_owner(&round, owner_id)?;

        let now = self.clock.now_ms();
        let outcome = round.reveal(cell_index, now, self.rng.as_ref())?;
        debug!(%round_id, cell_index, ?outcome, multiplier = %round.multiplier(), "cell revealed");

        match outcome {
            RevealOutcome::Hazard => {
                info!(%round_id, owner = owner_id, "hazard hit, stake forfeited");
                self.settle(&mut round).await?;
            }
            RevealOutcome::BonusTriggered => {
                info!(%round_id, owner = owner_id, "bonus round started");
            }
            RevealOutcome::Safe => {}
        }

        Ok(round.view(now))
    }

    pub async fn cash_out(&self, round_id: Uuid, owner_id: &str) -> EngineResult<RoundView> {
        let handle = self.round_handle(round_id)?;
        let mut round = handle.lock().await;
        Self::ensure_owner(&round, owner_id)?;

        let now = self.clock.now_ms();
        let payout = round.cash_out(now, self.rng.as_ref())?;
        info!(%round_id, owner = owner_id, payout, multiplier = %round.multiplier(), "round cashed out");

        self.settle(&mut round).await?;
        Ok(round.view(now))
    }

    pub async fn bonus_claim(&self, round_id: Uuid, owner_id: &str, target_id: u32) -> EngineResult<RoundView> {
        let handle = self.round_handle(round_id)?;
        let mut round = handle.lock().await;
        Self::ensure_owner(&round, owner_id)?;

        let now = self.clock.now_ms();
        let awarded = round.claim_bonus(target_id, now, self.rng.as_ref())?;
        debug!(%round_id, target_id, awarded, "bonus target claimed");

        Ok(round.view(now))
    }

    /// Current view of a round, closing its bonus if the deadline passed
    pub async fn round(&self, round_id: Uuid) -> EngineResult<RoundView> {
        let handle = self.round_handle(round_id)?;
        let mut round = handle.lock().await;

        let now = self.clock.now_ms();
        round.sync_bonus(now, self.rng.as_ref());
        Ok(round.view(now))
    }

    pub async fn balance(&self, owner_id: &str) -> EngineResult<u64> {
        self.settlement.balance(owner_id).await
    }

    pub fn pending_settlements(&self) -> Vec<SettlementRecord> {
        self.settlement.pending()
    }

    /// Stake debits the ledger never confirmed, awaiting refund
    pub fn unconfirmed_debits(&self) -> Vec<UnconfirmedDebit> {
        self.settlement.unconfirmed_debits()
    }

    /// Re-attempt parked payout credits and mark their rounds settled. Also
    /// refunds unconfirmed stake debits.
    pub async fn retry_pending_settlements(&self) -> Vec<SettlementRecord> {
        let refunded = self.settlement.reconcile_debits().await;
        if !refunded.is_empty() {
            info!(count = refunded.len(), "refunded unconfirmed stake debits");
        }

        let completed = self.settlement.retry_pending().await;

        for record in &completed {
            if let Ok(handle) = self.round_handle(record.round_id) {
                handle.lock().await.set_settlement(SettlementState::Settled);
            }
        }
        completed
    }

    pub fn live_round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Close expired bonus rounds and archive settled rounds past retention
    pub async fn sweep(&self) -> SweepStats {
        let now = self.clock.now_ms();
        let retention_ms = self.game.resolved_retention_secs.saturating_mul(1_000);
        let mut stats = SweepStats::default();
        let mut archived = Vec::new();

        let handles: Vec<(Uuid, Arc<Mutex<Round>>)> = self
            .rounds
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (round_id, handle) in handles {
            // Busy rounds are being served and will be swept next time
            let Ok(mut round) = handle.try_lock() else {
                continue;
            };

            if round.sync_bonus(now, self.rng.as_ref()) {
                stats.bonuses_closed += 1;
                debug!(%round_id, "bonus round closed by sweeper");
            }

            let expired = round
                .resolved_at_ms()
                .map(|at| now.saturating_sub(at) >= retention_ms)
                .unwrap_or(false);
            if expired && round.settlement() == SettlementState::Settled {
                archived.push(round_id);
            }
        }

        for round_id in archived {
            self.rounds.remove(&round_id);
            self.settlement.forget(round_id);
            stats.rounds_archived += 1;
        }

        stats
    }

    /// Run [`sweep`](Self::sweep) on the configured interval until aborted
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.bonus.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let stats = engine.sweep().await;
                if stats != SweepStats::default() {
                    debug!(?stats, "sweep completed");
                }
            }
        })
    }

    async fn settle(&self, round: &mut Round) -> EngineResult<()> {
        match self
            .settlement
            .settle(round.id(), round.owner_id(), round.payout())
            .await
        {
            Ok(_) => {
                round.set_settlement(SettlementState::Settled);
                Ok(())
            }
            Err(e @ GameError::SettlementPending { .. }) => {
                warn!(round_id = %round.id(), "round resolved with settlement pending");
                round.set_settlement(SettlementState::Pending);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn round_handle(&self, round_id: Uuid) -> EngineResult<Arc<Mutex<Round>>> {
        self.rounds
            .get(&round_id)
            .map(|entry| entry.value().clone())
            .ok_or(GameError::RoundNotFound(round_id))
    }

    fn ensure_owner(round: &Round, owner_id: &str) -> EngineResult<()> {
        if round.owner_id() != owner_id {
            return Err(GameError::transition("round belongs to another owner"));
        }
        Ok(())
    }
}
