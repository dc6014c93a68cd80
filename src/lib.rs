//! Anomaly Hunt - server-authoritative wagering grid game
//!
//! A player stakes credits on a hidden grid of safe cells, hazards and one
//! bonus trigger. Each safe reveal compounds a multiplier; a hazard forfeits
//! the stake; the bonus trigger opens a short timed target-hitting sub-round.
//! Board generation, outcomes and payouts are all decided server-side and
//! settled against an external balance ledger exactly once per round.

pub mod api;
pub mod config;
pub mod errors;
pub mod games;

pub use config::{ConfigLoader, EngineConfig};
pub use errors::{ConfigurationError, EngineResult, GameError};
pub use games::engine::GameEngine;
