//! Settlement System Module
//!
//! Boundary between the engine and the balance ledger. Stakes are debited and
//! payouts credited exactly once per round: every ledger call carries an
//! idempotency key derived from the round id, balance mutations for one owner
//! are serialized, and a credit that keeps failing is parked for
//! reconciliation instead of being dropped.

use crate::config::SettlementConfig;
use crate::errors::{EngineResult, GameError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Ledger error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Whether repeating the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Externally owned credit balances
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn balance(&self, owner_id: &str) -> Result<u64, LedgerError>;

    /// Atomically subtract `amount`. Replaying `key` is a no-op.
    async fn debit(&self, owner_id: &str, amount: u64, key: &str) -> Result<u64, LedgerError>;

    /// Atomically add `amount`. Replaying `key` is a no-op.
    async fn credit(&self, owner_id: &str, amount: u64, key: &str) -> Result<u64, LedgerError>;
}

/// Process-local ledger used by the bundled server and tests
pub struct InMemoryLedger {
    balances: DashMap<String, u64>,
    applied: DashMap<String, u64>,
    starting_credits: u64,
}

impl InMemoryLedger {
    /// Accounts seen for the first time start with `starting_credits`
    pub fn new(starting_credits: u64) -> Self {
        Self {
            balances: DashMap::new(),
            applied: DashMap::new(),
            starting_credits,
        }
    }

    pub fn set_balance(&self, owner_id: &str, credits: u64) {
        self.balances.insert(owner_id.to_string(), credits);
    }

    fn apply<F>(&self, owner_id: &str, key: &str, mutate: F) -> Result<u64, LedgerError>
    where
        F: FnOnce(u64) -> Result<u64, LedgerError>,
    {
        // Lock order: idempotency record first, then balance
        let record = self.applied.entry(key.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(applied) = &record {
            return Ok(*applied.get());
        }

        let mut balance = self
            .balances
            .entry(owner_id.to_string())
            .or_insert(self.starting_credits);
        let updated = mutate(*balance)?;
        *balance = updated;
        record.or_insert(updated);
        Ok(updated)
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn balance(&self, owner_id: &str) -> Result<u64, LedgerError> {
        Ok(*self
            .balances
            .entry(owner_id.to_string())
            .or_insert(self.starting_credits))
    }

    async fn debit(&self, owner_id: &str, amount: u64, key: &str) -> Result<u64, LedgerError> {
        self.apply(owner_id, key, |balance| {
            balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientFunds {
                    requested: amount,
                    available: balance,
                })
        })
    }

    async fn credit(&self, owner_id: &str, amount: u64, key: &str) -> Result<u64, LedgerError> {
        self.apply(owner_id, key, |balance| Ok(balance.saturating_add(amount)))
    }
}

/// Settlement status tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementStatus {
    Completed,
    /// Retries exhausted, awaiting reconciliation
    Pending { reason: String },
}

/// Payout settlement record for one round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub round_id: Uuid,
    pub owner_id: String,
    pub payout: u64,
    pub status: SettlementStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, SettlementStatus::Pending { .. })
    }
}

/// Stake debit whose outcome the ledger never confirmed
///
/// The round was never opened, so the stake is refunded once the debit is
/// settled one way or the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnconfirmedDebit {
    pub round_id: Uuid,
    pub owner_id: String,
    pub stake: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

fn debit_key(round_id: Uuid) -> String {
    format!("{}:debit", round_id)
}

fn credit_key(round_id: Uuid) -> String {
    format!("{}:credit", round_id)
}

fn refund_key(round_id: Uuid) -> String {
    format!("{}:refund", round_id)
}

/// Applies round outcomes to the ledger
pub struct SettlementCoordinator {
    ledger: Arc<dyn BalanceLedger>,
    config: SettlementConfig,
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
    records: DashMap<Uuid, SettlementRecord>,
    unconfirmed_debits: DashMap<Uuid, UnconfirmedDebit>,
}

impl SettlementCoordinator {
    pub fn new(ledger: Arc<dyn BalanceLedger>, config: SettlementConfig) -> Self {
        Self {
            ledger,
            config,
            owner_locks: DashMap::new(),
            records: DashMap::new(),
            unconfirmed_debits: DashMap::new(),
        }
    }

    pub async fn balance(&self, owner_id: &str) -> EngineResult<u64> {
        Ok(self.ledger.balance(owner_id).await?)
    }

    /// Debit a round's stake. Returns the owner's new balance.
    pub async fn debit_stake(&self, round_id: Uuid, owner_id: &str, stake: u64) -> EngineResult<u64> {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        let available = self.ledger.balance(owner_id).await?;
        if stake > available {
            return Err(GameError::InsufficientFunds {
                required: stake,
                available,
            });
        }

        let key = debit_key(round_id);
        let (ledger, key) = (&self.ledger, key.as_str());
        match self.with_retry(move || ledger.debit(owner_id, stake, key)).await {
            Ok((balance, _)) => Ok(balance),
            Err((LedgerError::InsufficientFunds { requested, available }, _)) => Err(GameError::InsufficientFunds {
                required: requested,
                available,
            }),
            Err((e, attempts)) => {
                // The write may have landed; park it so the stake can be refunded
                error!(
                    %round_id,
                    owner = owner_id,
                    stake,
                    key,
                    attempts,
                    error = %e,
                    "stake debit unconfirmed, parked for refund"
                );
                self.unconfirmed_debits.insert(
                    round_id,
                    UnconfirmedDebit {
                        round_id,
                        owner_id: owner_id.to_string(),
                        stake,
                        reason: e.to_string(),
                        created_at: Utc::now(),
                    },
                );
                Err(GameError::Ledger(e))
            }
        }
    }

    /// Debits that failed without a definite answer from the ledger
    pub fn unconfirmed_debits(&self) -> Vec<UnconfirmedDebit> {
        let mut debits: Vec<UnconfirmedDebit> = self
            .unconfirmed_debits
            .iter()
            .map(|d| d.value().clone())
            .collect();
        debits.sort_by_key(|d| d.created_at);
        debits
    }

    /// Settle every unconfirmed debit and refund it. Returns the refunded debits.
    ///
    /// Replaying the debit key is a no-op if the original write landed and a
    /// fresh debit if it did not, so the refund always nets the stake to zero.
    pub async fn reconcile_debits(&self) -> Vec<UnconfirmedDebit> {
        let mut refunded = Vec::new();

        for mut debit in self.unconfirmed_debits() {
            let lock = self.owner_lock(&debit.owner_id);
            let _guard = lock.lock().await;
            let round_id = debit.round_id;

            match self.ledger.debit(&debit.owner_id, debit.stake, &debit_key(round_id)).await {
                Ok(_) => {}
                Err(LedgerError::InsufficientFunds { .. }) => {
                    // Never applied, nothing to refund
                    info!(%round_id, owner = %debit.owner_id, "unconfirmed debit never applied");
                    self.unconfirmed_debits.remove(&round_id);
                    continue;
                }
                Err(e) => {
                    debit.reason = e.to_string();
                    self.unconfirmed_debits.insert(round_id, debit);
                    continue;
                }
            }

            match self.ledger.credit(&debit.owner_id, debit.stake, &refund_key(round_id)).await {
                Ok(balance) => {
                    info!(%round_id, owner = %debit.owner_id, stake = debit.stake, balance, "unconfirmed stake refunded");
                    self.unconfirmed_debits.remove(&round_id);
                    refunded.push(debit);
                }
                Err(e) => {
                    debit.reason = e.to_string();
                    self.unconfirmed_debits.insert(round_id, debit);
                }
            }
        }

        refunded
    }

    /// Credit a resolved round's payout exactly once.
    ///
    /// Fails with `SettlementPending` when the ledger keeps failing; the round
    /// is then listed by [`pending`](Self::pending).
    pub async fn settle(&self, round_id: Uuid, owner_id: &str, payout: u64) -> EngineResult<SettlementRecord> {
        if let Some(record) = self.records.get(&round_id) {
            if !record.is_pending() {
                debug!(%round_id, "settlement already completed");
                return Ok(record.clone());
            }
        }

        let mut record = SettlementRecord {
            round_id,
            owner_id: owner_id.to_string(),
            payout,
            status: SettlementStatus::Completed,
            attempts: 0,
            created_at: Utc::now(),
            completed_at: None,
        };

        if payout == 0 {
            record.completed_at = Some(Utc::now());
            self.records.insert(round_id, record.clone());
            return Ok(record);
        }

        self.attempt_credit(&mut record).await;
        self.records.insert(round_id, record.clone());

        match &record.status {
            SettlementStatus::Completed => Ok(record),
            SettlementStatus::Pending { reason } => Err(GameError::SettlementPending {
                round_id,
                reason: reason.clone(),
            }),
        }
    }

    /// Rounds whose payout credit is awaiting reconciliation
    pub fn pending(&self) -> Vec<SettlementRecord> {
        let mut pending: Vec<SettlementRecord> = self
            .records
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Re-attempt every pending credit. Returns the records that completed.
    pub async fn retry_pending(&self) -> Vec<SettlementRecord> {
        let mut completed = Vec::new();

        for mut record in self.pending() {
            self.attempt_credit(&mut record).await;
            if !record.is_pending() {
                completed.push(record.clone());
            }
            self.records.insert(record.round_id, record);
        }

        if !completed.is_empty() {
            info!(count = completed.len(), "reconciled pending settlements");
        }
        completed
    }

    pub fn record(&self, round_id: Uuid) -> Option<SettlementRecord> {
        self.records.get(&round_id).map(|r| r.clone())
    }

    /// Drop the record of a completed settlement. Pending records are kept.
    pub fn forget(&self, round_id: Uuid) -> bool {
        let Some((_, record)) = self.records.remove_if(&round_id, |_, r| !r.is_pending()) else {
            return false;
        };

        // Unused owner locks go too; a holder elsewhere keeps the count above one
        self.owner_locks
            .remove_if(&record.owner_id, |_, lock| Arc::strong_count(lock) == 1);
        true
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn owner_lock_count(&self) -> usize {
        self.owner_locks.len()
    }

    async fn attempt_credit(&self, record: &mut SettlementRecord) {
        let lock = self.owner_lock(&record.owner_id);
        let _guard = lock.lock().await;

        let key = credit_key(record.round_id);
        let owner_id = record.owner_id.clone();
        let payout = record.payout;
        let (ledger, owner, key) = (&self.ledger, owner_id.as_str(), key.as_str());

        match self.with_retry(move || ledger.credit(owner, payout, key)).await {
            Ok((balance, attempts)) => {
                record.attempts += attempts;
                record.status = SettlementStatus::Completed;
                record.completed_at = Some(Utc::now());
                info!(
                    round_id = %record.round_id,
                    owner = %record.owner_id,
                    payout,
                    balance,
                    "payout credited"
                );
            }
            Err((e, attempts)) => {
                record.attempts += attempts;
                record.status = SettlementStatus::Pending { reason: e.to_string() };
                error!(
                    round_id = %record.round_id,
                    owner = %record.owner_id,
                    payout,
                    error = %e,
                    "payout credit failed, parked for reconciliation"
                );
            }
        }
    }

    /// Run `op` with bounded exponential backoff on transient errors.
    /// Both outcomes carry the number of attempts made.
    async fn with_retry<F, Fut>(&self, mut op: F) -> Result<(u64, u32), (LedgerError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<u64, LedgerError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.backoff_for(attempt);
                    warn!(attempt, ?delay, error = %e, "ledger call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Ledger whose credits fail a fixed number of times first, and whose
    /// debits can apply yet report a timeout
    struct FlakyLedger {
        inner: InMemoryLedger,
        credit_failures: AtomicU32,
        lost_debit_acks: AtomicU32,
    }

    #[async_trait]
    impl BalanceLedger for FlakyLedger {
        async fn balance(&self, owner_id: &str) -> Result<u64, LedgerError> {
            self.inner.balance(owner_id).await
        }

        async fn debit(&self, owner_id: &str, amount: u64, key: &str) -> Result<u64, LedgerError> {
            let balance = self.inner.debit(owner_id, amount, key).await?;
            let lost = self.lost_debit_acks.load(Ordering::SeqCst);
            if lost > 0 {
                self.lost_debit_acks.store(lost - 1, Ordering::SeqCst);
                return Err(LedgerError::Unavailable("write timed out".to_string()));
            }
            Ok(balance)
        }

        async fn credit(&self, owner_id: &str, amount: u64, key: &str) -> Result<u64, LedgerError> {
            let left = self.credit_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.credit_failures.store(left - 1, Ordering::SeqCst);
                return Err(LedgerError::Unavailable("write timed out".to_string()));
            }
            self.inner.credit(owner_id, amount, key).await
        }
    }

    fn fast_config() -> SettlementConfig {
        SettlementConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    fn flaky(failures: u32) -> Arc<FlakyLedger> {
        Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(1_000),
            credit_failures: AtomicU32::new(failures),
            lost_debit_acks: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_in_memory_ledger_idempotency() {
        let ledger = InMemoryLedger::new(500);

        assert_eq!(ledger.balance("alice").await.unwrap(), 500);
        assert_eq!(ledger.debit("alice", 100, "r1:debit").await.unwrap(), 400);
        assert_eq!(ledger.debit("alice", 100, "r1:debit").await.unwrap(), 400);
        assert_eq!(ledger.credit("alice", 50, "r1:credit").await.unwrap(), 450);
        assert_eq!(ledger.credit("alice", 50, "r1:credit").await.unwrap(), 450);
        assert_eq!(ledger.balance("alice").await.unwrap(), 450);
    }

    #[tokio::test]
    async fn test_in_memory_ledger_rejects_overdraft() {
        let ledger = InMemoryLedger::new(0);
        ledger.set_balance("bob", 30);

        let result = ledger.debit("bob", 31, "r2:debit").await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { requested: 31, available: 30 })));
        assert_eq!(ledger.balance("bob").await.unwrap(), 30);

        // A failed debit does not burn its key
        ledger.set_balance("bob", 40);
        assert_eq!(ledger.debit("bob", 31, "r2:debit").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_debit_checks_balance() {
        let coordinator = SettlementCoordinator::new(Arc::new(InMemoryLedger::new(100)), fast_config());

        let result = coordinator.debit_stake(Uuid::new_v4(), "carol", 150).await;
        assert!(matches!(result, Err(GameError::InsufficientFunds { required: 150, available: 100 })));
        assert_eq!(coordinator.balance("carol").await.unwrap(), 100);

        assert_eq!(coordinator.debit_stake(Uuid::new_v4(), "carol", 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settle_twice_credits_once() {
        let coordinator = SettlementCoordinator::new(Arc::new(InMemoryLedger::new(1_000)), fast_config());
        let round_id = Uuid::new_v4();

        coordinator.debit_stake(round_id, "dave", 100).await.unwrap();
        coordinator.settle(round_id, "dave", 250).await.unwrap();
        coordinator.settle(round_id, "dave", 250).await.unwrap();

        assert_eq!(coordinator.balance("dave").await.unwrap(), 1_150);
    }

    #[tokio::test]
    async fn test_zero_payout_skips_ledger() {
        let ledger = flaky(10);
        let coordinator = SettlementCoordinator::new(ledger, fast_config());

        let record = coordinator.settle(Uuid::new_v4(), "erin", 0).await.unwrap();
        assert_eq!(record.status, SettlementStatus::Completed);
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let ledger = flaky(2);
        let coordinator = SettlementCoordinator::new(ledger.clone(), fast_config());

        let record = coordinator.settle(Uuid::new_v4(), "frank", 300).await.unwrap();
        assert_eq!(record.status, SettlementStatus::Completed);
        assert_eq!(record.attempts, 3);
        assert_eq!(ledger.balance("frank").await.unwrap(), 1_300);
    }

    #[tokio::test]
    async fn test_exhausted_retries_park_settlement() {
        let ledger = flaky(5);
        let coordinator = SettlementCoordinator::new(ledger.clone(), fast_config());
        let round_id = Uuid::new_v4();

        let result = coordinator.settle(round_id, "gina", 300).await;
        assert!(matches!(result, Err(GameError::SettlementPending { .. })));
        assert_eq!(coordinator.pending().len(), 1);
        assert_eq!(ledger.balance("gina").await.unwrap(), 1_000);

        // 2 failures left, then success within one retry pass
        let completed = coordinator.retry_pending().await;
        assert_eq!(completed.len(), 1);
        assert!(coordinator.pending().is_empty());
        assert_eq!(ledger.balance("gina").await.unwrap(), 1_300);

        // settled rounds stay settled
        coordinator.settle(round_id, "gina", 300).await.unwrap();
        assert_eq!(ledger.balance("gina").await.unwrap(), 1_300);
    }

    #[tokio::test]
    async fn test_concurrent_settlements_for_one_owner() {
        let ledger = Arc::new(InMemoryLedger::new(0));
        let coordinator = Arc::new(SettlementCoordinator::new(ledger.clone(), fast_config()));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.settle(Uuid::new_v4(), "hank", 10).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.balance("hank").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_unacknowledged_debit_is_refunded() {
        let ledger = flaky(0);
        ledger.lost_debit_acks.store(3, Ordering::SeqCst);
        let coordinator = SettlementCoordinator::new(ledger.clone(), fast_config());
        let round_id = Uuid::new_v4();

        let result = coordinator.debit_stake(round_id, "ivy", 100).await;
        assert!(matches!(result, Err(GameError::Ledger(LedgerError::Unavailable(_)))));

        // The first attempt landed; replays under the same key were no-ops
        assert_eq!(ledger.balance("ivy").await.unwrap(), 900);
        let parked = coordinator.unconfirmed_debits();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].round_id, round_id);

        let refunded = coordinator.reconcile_debits().await;
        assert_eq!(refunded.len(), 1);
        assert_eq!(ledger.balance("ivy").await.unwrap(), 1_000);
        assert!(coordinator.unconfirmed_debits().is_empty());

        assert!(coordinator.reconcile_debits().await.is_empty());
        assert_eq!(ledger.balance("ivy").await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_forget_drops_only_completed_records() {
        let ledger = flaky(5);
        let coordinator = SettlementCoordinator::new(ledger.clone(), fast_config());
        let settled = Uuid::new_v4();
        let parked = Uuid::new_v4();

        coordinator.settle(settled, "jack", 0).await.unwrap();
        assert!(coordinator.settle(parked, "jack", 50).await.is_err());
        assert_eq!(coordinator.record_count(), 2);

        assert!(coordinator.forget(settled));
        assert!(!coordinator.forget(parked));
        assert!(coordinator.record(settled).is_none());
        assert!(coordinator.record(parked).unwrap().is_pending());
        assert_eq!(coordinator.pending().len(), 1);
        assert_eq!(coordinator.owner_lock_count(), 0);
    }
}
