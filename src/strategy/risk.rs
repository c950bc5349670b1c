//! Account-level risk controls.
//!
//! Sits between the stake sizer and placement: per-race caps, the daily
//! committed-stake cap, the daily loss halt, and the liquidity floor. Owns
//! the day's ledger; the engine reports settlements into it.

use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_bets_per_race: usize,
    /// Per-race total stake cap, in units.
    pub max_stake_per_race: f64,
    /// Daily committed-stake cap, in units.
    pub max_daily_stake: f64,
    /// Realized daily loss at which the controller halts, in units.
    pub max_daily_loss: f64,
    /// Minimum GBP available at the best back price.
    pub min_liquidity_gbp: f64,
}

impl Default for RiskConfig {
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

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Day-scoped running totals. Reset by constructing a fresh controller.
#[derive(Debug, Clone, Default)]
pub struct DailyLedger {
    /// Units committed to placed bets so far today.
    pub committed: f64,
    /// Realized profit/loss from settled bets, in units.
    pub settled_pnl: f64,
    /// Once set, no further placements today.
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// A stake awaiting risk approval.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeProposal {
    pub selection_id: String,
    pub stake: f64,
    pub ev_adjusted: f64,
}

/// Skip reason recorded when the daily loss halt is active.
pub const RISK_HALT: &str = "RISK_HALT";
/// Skip reason recorded when the daily stake cap leaves no headroom.
pub const DAILY_STAKE_EXHAUSTED: &str = "Daily stake limit reached";

#[derive(Debug, Default)]
pub struct RiskController {
    config: RiskConfig,
    ledger: DailyLedger,
}

impl RiskController {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            ledger: DailyLedger::default(),
        }
    }

    pub fn ledger(&self) -> &DailyLedger {
        &self.ledger
    }

    pub fn is_halted(&self) -> bool {
        self.ledger.halted
    }

    /// Liquidity floor on the volume the bet would consume.
    pub fn check_liquidity(&self, available_gbp: f64) -> Result<(), String> {
        if available_gbp < self.config.min_liquidity_gbp {
            return Err(format!(
                "Low liquidity: £{:.0} < £{:.0}",
                available_gbp, self.config.min_liquidity_gbp
            ));
        }
        Ok(())
    }

    /// Per-race cap: keep the top N proposals by EV; if their stakes still
    /// exceed the race cap, rescale the group so the sum lands exactly on it.
    pub fn apply_race_cap(&self, mut proposals: Vec<StakeProposal>) -> Vec<StakeProposal> {
        if proposals.is_empty() {
            return proposals;
        }

        proposals.sort_by(|a, b| {
            b.ev_adjusted
                .partial_cmp(&a.ev_adjusted)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if proposals.len() > self.config.max_bets_per_race {
            warn!(
                dropped = proposals.len() - self.config.max_bets_per_race,
                cap = self.config.max_bets_per_race,
                "Per-race bet cap applied"
            );
            proposals.truncate(self.config.max_bets_per_race);
        }

        let total: f64 = proposals.iter().map(|p| p.stake).sum();
        if total > self.config.max_stake_per_race {
            let factor = self.config.max_stake_per_race / total;
            warn!(
                total = format!("{:.3}", total),
                cap = self.config.max_stake_per_race,
                factor = format!("{:.3}", factor),
                "Per-race stake cap: rescaling"
            );
            for p in &mut proposals {
                p.stake *= factor;
            }
        }

        proposals
    }

    /// Commit a stake against the daily caps. Returns the stake actually
    /// allowed (scaled down to the remaining headroom when needed) and books
    /// it into the ledger. `Err` carries the skip reason.
    pub fn commit(&mut self, stake: f64) -> Result<f64, String> {
        if self.halt_triggered() {
            return Err(RISK_HALT.to_string());
        }

        let remaining = self.config.max_daily_stake - self.ledger.committed;
        if remaining <= 0.0 {
            return Err(DAILY_STAKE_EXHAUSTED.to_string());
        }

        let allowed = if stake > remaining {
            info!(
                requested = format!("{:.3}", stake),
                remaining = format!("{:.3}", remaining),
                "Daily stake cap: scaling stake to remaining capacity"
            );
            remaining
        } else {
            stake
        };

        self.ledger.committed += allowed;
        Ok(allowed)
    }

    /// Report a settled result. Trips the halt once realized losses reach
    /// the daily loss cap.
    pub fn record_settlement(&mut self, pnl: f64) {
        self.ledger.settled_pnl += pnl;
        if self.halt_triggered() && !self.ledger.halted {
            self.ledger.halted = true;
            warn!(
                pnl = format!("{:.3}", self.ledger.settled_pnl),
                cap = self.config.max_daily_loss,
                "Daily loss cap reached: halting for the day"
            );
        }
    }

    fn halt_triggered(&self) -> bool {
        self.ledger.halted || self.ledger.settled_pnl <= -self.config.max_daily_loss
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
