//! Configuration management with validation and defaults
//!
//! Every section has sensible defaults, can be loaded from a TOML file and is
//! overridable through `ANOMALY_*` environment variables.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub game: GameConfig,
    pub bonus: BonusConfig,
    pub settlement: SettlementConfig,
    pub ledger: LedgerConfig,
    pub api: ApiConfig,
}

/// Board and payout rules
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Number of cells on the board (6x6 grid by default)
    pub board_size: usize,
    /// Per-reveal multiplier discount, compounding
    pub house_edge: f64,
    /// How long resolved, settled rounds stay queryable before archival
    pub resolved_retention_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            board_size: 36,
            house_edge: 0.99,
            resolved_retention_secs: 300,
        }
    }
}

/// Timed bonus sub-round rules
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusConfig {
    pub duration_ms: u64,
    pub spawn_interval_ms: u64,
    pub target_ttl_ms: u64,
    pub claim_score: u64,
    /// Interval of the background task that closes expired bonus rounds
    pub sweep_interval_ms: u64,
}

impl Default for BonusConfig {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            spawn_interval_ms: 600,
            target_ttl_ms: 1_200,
            claim_score: 200,
            sweep_interval_ms: 500,
        }
    }
}

impl BonusConfig {
    /// Never zero, `tokio::time::interval` rejects an empty period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Retry policy for balance writes
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl SettlementConfig {
    /// Exponential backoff before retry number `attempt` (1-based), capped
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let millis = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// In-memory ledger settings used by the bundled server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Credits granted to an account seen for the first time
    pub starting_credits: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_credits: 500,
        }
    }
}

/// HTTP API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.game.board_size < 3 {
            return Err(ConfigurationError::invalid(
                "game.board_size",
                self.game.board_size,
                "board needs room for a hazard, a bonus cell and a safe cell",
            ));
        }

        if !(self.game.house_edge > 0.0 && self.game.house_edge <= 1.0) {
            return Err(ConfigurationError::invalid(
                "game.house_edge",
                self.game.house_edge,
                "must be in (0, 1]",
            ));
        }

        if self.bonus.duration_ms == 0 || self.bonus.spawn_interval_ms == 0 || self.bonus.target_ttl_ms == 0 {
            return Err(ConfigurationError::invalid(
                "bonus",
                format!(
                    "{}/{}/{}",
                    self.bonus.duration_ms, self.bonus.spawn_interval_ms, self.bonus.target_ttl_ms
                ),
                "durations must be positive",
            ));
        }

        if self.bonus.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid(
                "bonus.sweep_interval_ms",
                0,
                "sweeper interval must be positive",
            ));
        }

        if self.bonus.spawn_interval_ms > self.bonus.duration_ms {
            return Err(ConfigurationError::invalid(
                "bonus.spawn_interval_ms",
                self.bonus.spawn_interval_ms,
                "must not exceed bonus.duration_ms",
            ));
        }

        if self.settlement.max_attempts == 0 {
            return Err(ConfigurationError::invalid(
                "settlement.max_attempts",
                0,
                "at least one attempt is required",
            ));
        }

        if self.api.port == 0 {
            return Err(ConfigurationError::invalid("api.port", 0, "port cannot be zero"));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigurationError::invalid(
                "api.request_timeout_secs",
                0,
                "every request would time out",
            ));
        }

        Ok(())
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and process environment, then validate
    pub fn load(&self) -> Result<EngineConfig, ConfigurationError> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup
    pub fn load_with<F>(&self, lookup: F) -> Result<EngineConfig, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => EngineConfig::default(),
        };

        apply_overrides(&mut config, lookup)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<EngineConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }
}

fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("ANOMALY_API_HOST") {
        config.api.host = host;
    }
    if let Some(port) = lookup("ANOMALY_API_PORT") {
        config.api.port = parse_var("ANOMALY_API_PORT", &port, "invalid port number")?;
    }
    if let Some(size) = lookup("ANOMALY_BOARD_SIZE") {
        config.game.board_size = parse_var("ANOMALY_BOARD_SIZE", &size, "invalid board size")?;
    }
    if let Some(edge) = lookup("ANOMALY_HOUSE_EDGE") {
        config.game.house_edge = parse_var("ANOMALY_HOUSE_EDGE", &edge, "invalid decimal")?;
    }
    if let Some(credits) = lookup("ANOMALY_STARTING_CREDITS") {
        config.ledger.starting_credits =
            parse_var("ANOMALY_STARTING_CREDITS", &credits, "invalid credit amount")?;
    }
    if let Some(attempts) = lookup("ANOMALY_SETTLEMENT_MAX_ATTEMPTS") {
        config.settlement.max_attempts =
            parse_var("ANOMALY_SETTLEMENT_MAX_ATTEMPTS", &attempts, "invalid attempt count")?;
    }

    Ok(())
}

fn parse_var<T: std::str::FromStr>(field: &str, value: &str, reason: &str) -> Result<T, ConfigurationError> {
    value
        .parse()
        .map_err(|_| ConfigurationError::invalid(field, value, reason))
}
