//! Kelly stake sizing.
//!
//! Fractional Kelly on the blended probability, with a per-bet cap and a
//! tighter cap on short-priced runners. Stakes are in units throughout; the
//! engine converts to GBP at placement time.

use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StakeConfig {
    /// Fractional Kelly multiplier (0.10 = tenth-Kelly).
    pub kelly_fraction: f64,
    /// Hard cap on any single stake, in units.
    pub max_stake_per_bet: f64,
    /// Below these odds the favorite cap applies.
    pub favorite_odds_threshold: f64,
    /// Cap for short-priced runners, in units.
    pub max_stake_favorite: f64,
    /// Commission rate on winnings.
    pub commission: f64,
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.10,
            max_stake_per_bet: 0.3,
            favorite_odds_threshold: 4.0,
            max_stake_favorite: 0.15,
            commission: 0.02,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

/// Which limit bound the final stake, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingCap {
    None,
    PerBet,
    Favorite,
}

/// Sizing output.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeDecision {
    /// Unclamped full-Kelly fraction.
    pub kelly_full: f64,
    /// Final stake in units, always within `[0, max_stake_per_bet]`.
    pub stake: f64,
    pub bound_by: BindingCap,
}

#[derive(Debug, Clone, Default)]
pub struct StakeSizer {
    config: StakeConfig,
}

impl StakeSizer {
    pub fn new(config: StakeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StakeConfig {
        &self.config
    }

    /// Size a back bet from the blended win probability and current odds.
    ///
    /// Full Kelly on commission-adjusted net odds b:
    ///   f* = (p·(b+1) - 1) / b
    /// then the configured fraction and caps.
    pub fn size(&self, p_blend: f64, odds: f64) -> StakeDecision {
        if odds <= 1.0 {
            return StakeDecision {
                kelly_full: 0.0,
                stake: 0.0,
                bound_by: BindingCap::None,
            };
        }

        let b = (odds - 1.0) * (1.0 - self.config.commission);
        if b <= 0.0 {
            return StakeDecision {
                kelly_full: 0.0,
                stake: 0.0,
                bound_by: BindingCap::None,
            };
        }

        let kelly_full = ((p_blend * (b + 1.0) - 1.0) / b).clamp(0.0, 1.0);
        let raw = kelly_full * self.config.kelly_fraction;

        let (stake, bound_by) = self.apply_caps(raw, odds);

        debug!(
            p_blend = format!("{:.4}", p_blend),
            odds,
            kelly_full = format!("{:.4}", kelly_full),
            stake = format!("{:.4}", stake),
            bound_by = ?bound_by,
            "Stake sized"
        );

        StakeDecision {
            kelly_full,
            stake,
            bound_by,
        }
    }

    /// Apply the caps to a fixed recommended stake (fixed staking policy).
    pub fn fixed(&self, stake_units: f64, odds: f64) -> StakeDecision {
        let (stake, bound_by) = self.apply_caps(stake_units.max(0.0), odds);
        StakeDecision {
            kelly_full: 0.0,
            stake,
            bound_by,
        }
    }

    fn apply_caps(&self, raw: f64, odds: f64) -> (f64, BindingCap) {
        let mut stake = raw;
        let mut bound = BindingCap::None;

        if stake > self.config.max_stake_per_bet {
            stake = self.config.max_stake_per_bet;
            bound = BindingCap::PerBet;
        }
        if odds < self.config.favorite_odds_threshold && stake > self.config.max_stake_favorite {
            stake = self.config.max_stake_favorite;
            bound = BindingCap::Favorite;
        }

        (stake, bound)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
