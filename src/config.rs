//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Exchange
//! credentials are referenced by env-var name and resolved at runtime via
//! `std::env::var`. Gate thresholds come from a named preset with optional
//! per-field overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::strategy::gates::GateConfig;
use crate::strategy::StakePolicy;
use crate::types::StrategyMode;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub window: WindowConfig,
    pub gates: GatesConfig,
    pub staking: StakingConfig,
    pub risk: RiskLimitsConfig,
    pub exchange: ExchangeConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    pub poll_interval_secs: u64,
    /// Exchange commission rate applied to winnings.
    pub commission: f64,
    /// Maximum relative move from target odds before a selection is skipped.
    pub max_drift: f64,
    /// How long after the last off the loop keeps running, in minutes.
    pub post_race_linger_mins: f64,
    pub mode: StrategyMode,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "PADDOCK-001".into(),
            poll_interval_secs: 300,
            commission: 0.02,
            max_drift: 0.15,
            post_race_linger_mins: 30.0,
            mode: StrategyMode::Backing,
        }
    }
}

/// Bet-window geometry, in minutes before the off.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub tracking_start_mins: f64,
    pub center_mins: f64,
    pub half_width_mins: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            tracking_start_mins: 240.0,
            center_mins: 60.0,
            half_width_mins: 5.0,
        }
    }
}

/// Gate thresholds: a named preset plus optional field overrides.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatesConfig {
    pub preset: String,
    pub min_disagreement: Option<f64>,
    pub min_edge: Option<f64>,
    pub min_rank: Option<u32>,
    pub max_rank: Option<u32>,
    pub odds_min: Option<f64>,
    pub odds_max: Option<f64>,
    pub min_overround: Option<f64>,
    pub max_overround: Option<f64>,
    pub min_ev: Option<f64>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            preset: "hybrid_v3".into(),
            min_disagreement: None,
            min_edge: None,
            min_rank: None,
            max_rank: None,
            odds_min: None,
            odds_max: None,
            min_overround: None,
            max_overround: None,
            min_ev: None,
        }
    }
}

impl GatesConfig {
    /// Resolve the preset and apply any explicit overrides.
    pub fn resolve(&self) -> Result<GateConfig> {
        let mut cfg = match GateConfig::preset(&self.preset) {
            Some(c) => c,
            None => bail!("Unknown gate preset: {}", self.preset),
        };
        if let Some(v) = self.min_disagreement {
            cfg.min_disagreement = v;
        }
        if let Some(v) = self.min_edge {
            cfg.min_edge = v;
        }
        if let Some(v) = self.min_rank {
            cfg.min_rank = v;
        }
        if let Some(v) = self.max_rank {
            cfg.max_rank = v;
        }
        if let Some(v) = self.odds_min {
            cfg.odds_min = v;
        }
        if let Some(v) = self.odds_max {
            cfg.odds_max = v;
        }
        if let Some(v) = self.min_overround {
            cfg.min_overround = v;
        }
        if let Some(v) = self.max_overround {
            cfg.max_overround = v;
        }
        if let Some(v) = self.min_ev {
            cfg.min_ev = v;
        }
        Ok(cfg)
    }
}

/// Staking section. All stakes flow through the engine in units;
/// `unit_value_gbp` converts to pounds at placement time.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StakingConfig {
    pub policy: StakePolicy,
    pub kelly_fraction: f64,
    /// Cap on any single stake, in units.
    pub max_stake_per_bet: f64,
    /// Below these odds the favorite cap applies.
    pub favorite_odds_threshold: f64,
    pub max_stake_favorite: f64,
    /// GBP per staking unit. Defaults to 1% of the run's bankroll when unset.
    pub unit_value_gbp: Option<f64>,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            policy: StakePolicy::Fixed,
            kelly_fraction: 0.10,
            max_stake_per_bet: 0.3,
            favorite_odds_threshold: 4.0,
            max_stake_favorite: 0.15,
            unit_value_gbp: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskLimitsConfig {
    pub max_bets_per_race: usize,
    /// Per-race stake cap, in units.
    pub max_stake_per_race: f64,
    /// Daily committed-stake cap, in units.
    pub max_daily_stake: f64,
    /// Daily realized-loss halt, in units.
    pub max_daily_loss: f64,
    /// Minimum GBP available at the best back price.
    pub min_liquidity_gbp: f64,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            max_bets_per_race: 1,
            max_stake_per_race: 1.0,
            max_daily_stake: 15.0,
            max_daily_loss: 5.0,
            min_liquidity_gbp: 100.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub app_key_env: String,
    pub username_env: String,
    pub password_env: String,
    pub api_endpoint: String,
    pub login_endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            app_key_env: "BETFAIR_APP_KEY".into(),
            username_env: "BETFAIR_USERNAME".into(),
            password_env: "BETFAIR_PASSWORD".into(),
            api_endpoint: "https://api.betfair.com/exchange/betting/rest/v1.0".into(),
            login_endpoint: "https://identitysso.betfair.com/api/login".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: String,
    pub selections_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
            selections_file: "data/selections.csv".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields defaults,
    /// so a checkout runs dry against the standard preset with no setup.
    pub fn load(path: &str) -> Result<Self> {
        if !std::path::Path::new(path).exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Used for exchange credentials referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
