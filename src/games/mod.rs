pub mod types;
pub mod rng;
pub mod board;
pub mod fairness;
pub mod multiplier;
pub mod bonus;
pub mod round;
pub mod settlement;
pub mod engine;

pub use types::*;
pub use rng::{Clock, ManualClock, OsRandom, RandomSource, SeededRandom, SystemClock};
pub use round::{RevealOutcome, Round, RoundRules};
pub use settlement::{BalanceLedger, InMemoryLedger, LedgerError, SettlementCoordinator, SettlementRecord, SettlementStatus};
pub use engine::{GameEngine, SweepStats};
