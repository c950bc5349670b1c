//! Selection gates.
//!
//! Six ordered, fail-fast checks on an assessed runner. The first failing
//! gate's reason string is what lands in the decision log, so the texts here
//! are part of the observable contract. Thresholds come from named presets
//! (the same pipeline tuned differently, never separate code paths).

use std::cmp::Ordering;

use super::edge::EdgeAssessment;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Gate thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub min_disagreement: f64,
    pub min_edge: f64,
    pub min_rank: u32,
    pub max_rank: u32,
    pub odds_min: f64,
    pub odds_max: f64,
    pub min_overround: f64,
    pub max_overround: f64,
    pub min_ev: f64,
}

impl GateConfig {
    /// Look up a named tuning preset.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            // High-conviction mid-field disagreements only.
            "hybrid_v3" => Some(Self {
                min_disagreement: 2.50,
                min_edge: 0.08,
                min_rank: 3,
                max_rank: 6,
                odds_min: 7.0,
                odds_max: 12.0,
                min_overround: 1.01,
                max_overround: 1.18,
                min_ev: 0.05,
            }),
            // Looser variant for paper-trading wider markets.
            "hybrid_wide" => Some(Self {
                min_disagreement: 1.80,
                min_edge: 0.05,
                min_rank: 2,
                max_rank: 8,
                odds_min: 4.0,
                odds_max: 16.0,
                min_overround: 1.01,
                max_overround: 1.25,
                min_ev: 0.03,
            }),
            _ => None,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        // preset() always knows "hybrid_v3"
        Self::preset("hybrid_v3").unwrap_or(Self {
            min_disagreement: 2.50,
            min_edge: 0.08,
            min_rank: 3,
            max_rank: 6,
            odds_min: 7.0,
            odds_max: 12.0,
            min_overround: 1.01,
            max_overround: 1.18,
            min_ev: 0.05,
        })
    }
}

// ---------------------------------------------------------------------------
// Gate evaluation
// ---------------------------------------------------------------------------

/// Run the ordered gates. `Ok(())` means every gate passed; `Err` carries the
/// first failure's reason, verbatim as recorded.
pub fn evaluate(cfg: &GateConfig, a: &EdgeAssessment) -> Result<(), String> {
    // Gate 1: disagreement ratio
    if a.disagreement < cfg.min_disagreement {
        return Err(format!(
            "Low disagreement: {:.2} < {:.2}",
            a.disagreement, cfg.min_disagreement
        ));
    }

    // Gate 2: market rank band
    if a.market_rank < cfg.min_rank {
        return Err(format!("Too favored: rank {} < {}", a.market_rank, cfg.min_rank));
    }
    if a.market_rank > cfg.max_rank {
        return Err(format!("Too unfavored: rank {} > {}", a.market_rank, cfg.max_rank));
    }

    // Gate 3: absolute edge
    if a.edge_absolute < cfg.min_edge {
        return Err(format!("Low edge: {:.3} < {:.3}", a.edge_absolute, cfg.min_edge));
    }

    // Gate 4: odds range
    if a.odds < cfg.odds_min {
        return Err(format!("Odds too low: {:.2} < {}", a.odds, cfg.odds_min));
    }
    if a.odds > cfg.odds_max {
        return Err(format!("Odds too high: {:.2} > {}", a.odds, cfg.odds_max));
    }

    // Gate 5: market quality
    if a.overround > cfg.max_overround {
        return Err(format!(
            "Uncompetitive market: {:.3} > {}",
            a.overround, cfg.max_overround
        ));
    }
    if a.overround < cfg.min_overround {
        return Err(format!(
            "Suspicious market: {:.3} < {}",
            a.overround, cfg.min_overround
        ));
    }

    // Gate 6: adjusted EV
    if a.ev_adjusted < cfg.min_ev {
        return Err(format!("Low EV: {:.3} < {}", a.ev_adjusted, cfg.min_ev));
    }

    Ok(())
}

/// Pick exactly one winner among a race's passing candidates.
///
/// Highest edge wins; ties fall to higher EV, then lower market rank, then
/// the smallest selection id so the choice is fully deterministic.
pub fn select_best<'a>(candidates: &'a [EdgeAssessment]) -> Option<&'a EdgeAssessment> {
    candidates.iter().min_by(|a, b| compare_candidates(a, b))
}

fn compare_candidates(a: &EdgeAssessment, b: &EdgeAssessment) -> Ordering {
    b.edge_absolute
        .partial_cmp(&a.edge_absolute)
        .unwrap_or(Ordering::Equal)
        .then(
            b.ev_adjusted
                .partial_cmp(&a.ev_adjusted)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.market_rank.cmp(&b.market_rank))
        .then(a.selection_id.cmp(&b.selection_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
