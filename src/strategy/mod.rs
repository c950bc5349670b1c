//! Scoring pipeline — normalization, edge scoring, gating, and stake sizing.

pub mod edge;
pub mod gates;
pub mod kelly;
pub mod odds;
pub mod risk;

use serde::Deserialize;
use tracing::{debug, info};

use crate::exchange::MarketBook;
use gates::GateConfig;
use kelly::{StakeDecision, StakeSizer};

pub use edge::{EdgeAssessment, EdgeScorer};

// ---------------------------------------------------------------------------
// Staking policy
// ---------------------------------------------------------------------------

/// How the final stake is produced for a winning candidate.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StakePolicy {
    /// Use the morning file's recommended stake verbatim (caps still apply).
    Fixed,
    /// Size from the blended probability via fractional Kelly.
    Kelly,
}

// ---------------------------------------------------------------------------
// Candidates and verdicts
// ---------------------------------------------------------------------------

/// One tracked runner entering the race's scoring pass.
#[derive(Debug, Clone)]
pub struct RaceCandidate {
    /// Exchange selection id, resolved earlier by the loop.
    pub selection_id: String,
    /// Model win probability from the morning file.
    pub p_model: f64,
    /// Morning recommended stake, in units (fixed policy).
    pub fixed_stake: f64,
}

/// Outcome of the scoring pass for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Passed every gate and won the race's tie-break.
    Bet {
        assessment: EdgeAssessment,
        stake: StakeDecision,
    },
    /// Failed a gate, lost the tie-break, or had no usable price.
    Rejected {
        assessment: Option<EdgeAssessment>,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Pipelines book normalization → edge scoring → gates → per-race selection
/// → stake sizing. Pure given the book snapshot: replaying the same inputs
/// yields the same verdicts.
pub struct ScoringPipeline {
    scorer: EdgeScorer,
    gates: GateConfig,
    sizer: StakeSizer,
    policy: StakePolicy,
}

impl ScoringPipeline {
    pub fn new(scorer: EdgeScorer, gates: GateConfig, sizer: StakeSizer, policy: StakePolicy) -> Self {
        Self {
            scorer,
            gates,
            sizer,
            policy,
        }
    }

    /// Score every tracked candidate in one race against a book snapshot.
    /// Returns one verdict per candidate, in input order. At most one
    /// candidate receives [`Verdict::Bet`].
    pub fn evaluate_race(&self, book: &MarketBook, candidates: &[RaceCandidate]) -> Vec<Verdict> {
        let normalized = match odds::normalize(book) {
            Some(n) => n,
            None => {
                return candidates
                    .iter()
                    .map(|_| Verdict::Rejected {
                        assessment: None,
                        reason: "No price available".into(),
                    })
                    .collect();
            }
        };

        if normalized.suspicious {
            debug!(
                market_id = %book.market_id,
                overround = format!("{:.3}", normalized.overround),
                "Suspicious overround: scoring anyway, gates decide"
            );
        }

        // Assess each candidate; run the gates; remember the first failure.
        let mut assessed: Vec<(usize, EdgeAssessment, Option<String>)> = Vec::new();
        let mut verdicts: Vec<Option<Verdict>> = vec![None; candidates.len()];

        for (i, cand) in candidates.iter().enumerate() {
            let runner = match normalized.runner(&cand.selection_id) {
                Some(r) => r,
                None => {
                    verdicts[i] = Some(Verdict::Rejected {
                        assessment: None,
                        reason: "No price available".into(),
                    });
                    continue;
                }
            };
            let assessment = self.scorer.assess(cand.p_model, runner, normalized.overround);
            let gate_result = gates::evaluate(&self.gates, &assessment).err();
            assessed.push((i, assessment, gate_result));
        }

        // Winner among the gate passers.
        let passers: Vec<EdgeAssessment> = assessed
            .iter()
            .filter(|(_, _, fail)| fail.is_none())
            .map(|(_, a, _)| a.clone())
            .collect();
        let winner = gates::select_best(&passers).cloned();

        for (i, assessment, gate_failure) in assessed {
            let verdict = if let Some(reason) = gate_failure {
                Verdict::Rejected {
                    assessment: Some(assessment),
                    reason,
                }
            } else if let Some(w) = winner
                .as_ref()
                .filter(|w| w.selection_id == assessment.selection_id)
            {
                let stake = match self.policy {
                    StakePolicy::Kelly => self.sizer.size(w.p_blend, w.odds),
                    StakePolicy::Fixed => self.sizer.fixed(candidates[i].fixed_stake, w.odds),
                };
                info!(
                    selection_id = %w.selection_id,
                    edge = format!("{:.3}", w.edge_absolute),
                    ev = format!("{:.3}", w.ev_adjusted),
                    stake = format!("{:.3}", stake.stake),
                    "Race winner selected"
                );
                Verdict::Bet {
                    assessment,
                    stake,
                }
            } else {
                let w = winner.as_ref().map(|w| w.edge_absolute).unwrap_or(0.0);
                Verdict::Rejected {
                    reason: format!("Outscored: edge {:.3} < {:.3}", assessment.edge_absolute, w),
                    assessment: Some(assessment),
                }
            };
            verdicts[i] = Some(verdict);
        }

        verdicts
            .into_iter()
            .map(|v| {
                v.unwrap_or(Verdict::Rejected {
                    assessment: None,
                    reason: "No price available".into(),
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
