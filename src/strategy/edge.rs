//! Model/market disagreement scoring.
//!
//! Blends the morning model's probability toward the market in log-odds space
//! with an adaptive weight, then computes a commission-adjusted expected value
//! with a penalty on market leaders (where the crowd is hardest to beat).

use tracing::debug;

use super::odds::NormalizedRunner;

// ---------------------------------------------------------------------------
// Assessment
// ---------------------------------------------------------------------------

/// Full scoring output for one runner. Carries everything the gates and the
/// decision log need.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeAssessment {
    pub selection_id: String,
    pub odds: f64,
    pub market_rank: u32,
    pub overround: f64,
    pub p_model: f64,
    pub q_vigfree: f64,
    /// p_model / q_vigfree: how much richer the model is than the market.
    pub disagreement: f64,
    /// p_model - q_vigfree, in probability points.
    pub edge_absolute: f64,
    /// Blend weight toward the market.
    pub lambda: f64,
    pub p_blend: f64,
    pub ev_adjusted: f64,
}

// ---------------------------------------------------------------------------
// Blending
// ---------------------------------------------------------------------------

fn logit(p: f64) -> f64 {
    let p = p.clamp(0.001, 0.999);
    (p / (1.0 - p)).ln()
}

fn invlogit(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Blend a model probability toward the market vig-free probability in
/// log-odds space. lambda 0 = pure model, 1 = pure market.
pub fn blend_to_market(p_model: f64, q_vigfree: f64, lambda: f64) -> f64 {
    let z = (1.0 - lambda) * logit(p_model) + lambda * logit(q_vigfree);
    invlogit(z)
}

/// Adaptive blend weight from market context.
///
/// Trust the market more on short prices, market leaders, and very
/// competitive books; trust the model more in the mid-field sweet spot.
pub fn adaptive_lambda(odds: f64, market_rank: u32, overround: f64) -> f64 {
    let mut lam: f64 = if odds < 5.0 {
        0.40
    } else if odds < 8.0 {
        0.30
    } else if odds < 12.0 {
        0.20
    } else {
        0.45
    };

    if market_rank == 1 {
        lam += 0.25;
    } else if market_rank == 2 {
        lam += 0.15;
    } else if market_rank >= 6 {
        lam -= 0.10;
    }

    if overround < 1.10 {
        lam += 0.10;
    } else if overround > 1.20 {
        lam -= 0.05;
    }

    lam.clamp(0.10, 0.70)
}

/// Expected value of a back bet at `odds` with win probability `p_blend`,
/// penalized on the first and second favorites.
pub fn ev_adjusted(p_blend: f64, odds: f64, market_rank: u32, commission: f64) -> f64 {
    if odds <= 1.0 {
        return -1.0;
    }
    let b = (odds - 1.0) * (1.0 - commission);
    let ev_base = p_blend * b - (1.0 - p_blend);

    match market_rank {
        1 => ev_base * 0.3,
        2 => ev_base * 0.6,
        _ => ev_base,
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Scores a runner against its normalized book entry.
#[derive(Debug, Clone)]
pub struct EdgeScorer {
    commission: f64,
}

impl EdgeScorer {
    pub fn new(commission: f64) -> Self {
        Self { commission }
    }

    /// Full assessment of one runner given the model probability.
    pub fn assess(&self, p_model: f64, runner: &NormalizedRunner, overround: f64) -> EdgeAssessment {
        let disagreement = p_model / runner.q_vigfree;
        let edge_absolute = p_model - runner.q_vigfree;
        let lambda = adaptive_lambda(runner.odds, runner.market_rank, overround);
        let p_blend = blend_to_market(p_model, runner.q_vigfree, lambda);
        let ev = ev_adjusted(p_blend, runner.odds, runner.market_rank, self.commission);

        debug!(
            selection_id = %runner.selection_id,
            odds = runner.odds,
            rank = runner.market_rank,
            disagreement = format!("{:.2}", disagreement),
            edge = format!("{:.3}", edge_absolute),
            lambda = format!("{:.2}", lambda),
            p_blend = format!("{:.4}", p_blend),
            ev = format!("{:.3}", ev),
            "Runner assessed"
        );

        EdgeAssessment {
            selection_id: runner.selection_id.clone(),
            odds: runner.odds,
            market_rank: runner.market_rank,
            overround,
            p_model,
            q_vigfree: runner.q_vigfree,
            disagreement,
            edge_absolute,
            lambda,
            p_blend,
            ev_adjusted: ev,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_runner(odds: f64, q_vigfree: f64, rank: u32) -> NormalizedRunner {
        NormalizedRunner {
            selection_id: "101".into(),
            odds,
            q_market: 1.0 / odds,
            q_vigfree,
            market_rank: rank,
        }
    }

    #[test]
    fn test_lambda_odds_bands() {
        // mid-field rank so no rank adjustment; overround in neutral band
        assert_eq!(adaptive_lambda(3.0, 4, 1.15), 0.40);
        assert_eq!(adaptive_lambda(6.0, 4, 1.15), 0.30);
        assert_eq!(adaptive_lambda(9.0, 4, 1.15), 0.20);
        assert_eq!(adaptive_lambda(20.0, 4, 1.15), 0.45);
    }

    #[test]
    fn test_lambda_rank_and_overround_adjustments() {
        // favorite at short odds in a competitive book: 0.40 + 0.25 + 0.10
        assert!((adaptive_lambda(3.0, 1, 1.05) - 0.70).abs() < 1e-12);
        // second favorite: 0.40 + 0.15
        assert!((adaptive_lambda(3.0, 2, 1.15) - 0.55).abs() < 1e-12);
        // outsider in a weak book: 0.45 - 0.10 - 0.05
        assert!((adaptive_lambda(15.0, 7, 1.25) - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_clamped() {
        // longshot favorite is impossible, but force the arithmetic high
        assert!(adaptive_lambda(20.0, 1, 1.05) <= 0.70);
        // sweet spot outsider in a weak book drives it low: 0.20 - 0.10 - 0.05
        assert!(adaptive_lambda(9.0, 8, 1.25) >= 0.10);
    }

    #[test]
    fn test_blend_is_between_inputs() {
        let p = blend_to_market(0.20, 0.08, 0.25);
        assert!(p > 0.08 && p < 0.20);

        // lambda 0 returns the model, lambda 1 the market
        assert!((blend_to_market(0.20, 0.08, 0.0) - 0.20).abs() < 1e-9);
        assert!((blend_to_market(0.20, 0.08, 1.0) - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_blend_clips_extremes() {
        // degenerate inputs must not produce NaN or infinities
        let p = blend_to_market(1.0, 0.0, 0.5);
        assert!(p.is_finite());
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn test_ev_favorite_penalty() {
        let base = ev_adjusted(0.20, 9.0, 4, 0.02);
        let fav = ev_adjusted(0.20, 9.0, 1, 0.02);
        let second = ev_adjusted(0.20, 9.0, 2, 0.02);
        assert!((fav - base * 0.3).abs() < 1e-12);
        assert!((second - base * 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_ev_degenerate_odds() {
        assert_eq!(ev_adjusted(0.5, 1.0, 3, 0.02), -1.0);
        assert_eq!(ev_adjusted(0.5, 0.5, 3, 0.02), -1.0);
    }

    #[test]
    fn test_ev_known_value() {
        // b = 8 * 0.98 = 7.84; ev = 0.15*7.84 - 0.85 = 0.326
        let ev = ev_adjusted(0.15, 9.0, 4, 0.02);
        assert!((ev - 0.326).abs() < 1e-9);
    }

    #[test]
    fn test_assess_wires_everything() {
        let scorer = EdgeScorer::new(0.02);
        let runner = make_runner(9.0, 0.04, 5);
        let a = scorer.assess(0.111, &runner, 1.12);

        assert!((a.disagreement - 0.111 / 0.04).abs() < 1e-9);
        assert!((a.edge_absolute - (0.111 - 0.04)).abs() < 1e-9);
        assert_eq!(a.lambda, adaptive_lambda(9.0, 5, 1.12));
        assert!((a.p_blend - blend_to_market(0.111, 0.04, a.lambda)).abs() < 1e-12);
        assert!((a.ev_adjusted - ev_adjusted(a.p_blend, 9.0, 5, 0.02)).abs() < 1e-12);
    }
}
