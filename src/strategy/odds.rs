//! Race book normalization.
//!
//! Turns a raw market book into vig-free probabilities and market ranks. The
//! overround tells us how competitive the book is; downstream gates reject
//! races where it falls outside the tradable band.

use crate::exchange::MarketBook;

/// Runners below this price are treated as unquoted.
pub const MIN_INCLUDED_ODDS: f64 = 1.01;

/// Overround band outside which a book is flagged suspicious.
pub const OVERROUND_SANE_MIN: f64 = 1.00;
pub const OVERROUND_SANE_MAX: f64 = 1.40;

// ---------------------------------------------------------------------------
// Normalized book
// ---------------------------------------------------------------------------

/// A runner after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRunner {
    pub selection_id: String,
    pub odds: f64,
    /// Raw implied probability, 1/odds.
    pub q_market: f64,
    /// Implied probability with the vig removed.
    pub q_vigfree: f64,
    /// Dense rank by ascending odds; 1 = favorite, equal odds share a rank.
    pub market_rank: u32,
}

/// A race book after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBook {
    pub runners: Vec<NormalizedRunner>,
    pub overround: f64,
    /// Overround outside the sane band. Normalized anyway; gates decide.
    pub suspicious: bool,
}

impl NormalizedBook {
    pub fn runner(&self, selection_id: &str) -> Option<&NormalizedRunner> {
        self.runners.iter().find(|r| r.selection_id == selection_id)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a race book. Runners with no quote or odds below
/// [`MIN_INCLUDED_ODDS`] are excluded. Returns `None` when nothing is left
/// to normalize.
pub fn normalize(book: &MarketBook) -> Option<NormalizedBook> {
    let mut included: Vec<(String, f64)> = book
        .runners
        .iter()
        .filter_map(|r| {
            r.back_odds
                .filter(|o| *o >= MIN_INCLUDED_ODDS)
                .map(|o| (r.selection_id.clone(), o))
        })
        .collect();

    if included.is_empty() {
        return None;
    }

    let overround: f64 = included.iter().map(|(_, o)| 1.0 / o).sum();
    let suspicious = overround < OVERROUND_SANE_MIN || overround > OVERROUND_SANE_MAX;

    // Dense rank by ascending odds: sort a copy, walk it assigning a new rank
    // only when the price changes.
    included.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut runners = Vec::with_capacity(included.len());
    let mut rank = 0u32;
    let mut last_odds = f64::NEG_INFINITY;
    for (selection_id, odds) in included {
        if odds > last_odds {
            rank += 1;
            last_odds = odds;
        }
        let q_market = 1.0 / odds;
        runners.push(NormalizedRunner {
            selection_id,
            odds,
            q_market,
            q_vigfree: q_market / overround,
            market_rank: rank,
        });
    }

    Some(NormalizedBook {
        runners,
        overround,
        suspicious,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::RunnerPrice;

    fn make_book(odds: &[(&str, Option<f64>)]) -> MarketBook {
        MarketBook {
            market_id: "1.234".into(),
            total_matched_gbp: 10_000.0,
            runners: odds
                .iter()
                .map(|(id, o)| RunnerPrice {
                    selection_id: (*id).into(),
                    back_odds: *o,
                    available_gbp: 500.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_vigfree_sums_to_one() {
        let book = make_book(&[
            ("1", Some(2.0)),
            ("2", Some(4.0)),
            ("3", Some(8.0)),
            ("4", Some(10.0)),
        ]);
        let nb = normalize(&book).unwrap();
        let total: f64 = nb.runners.iter().map(|r| r.q_vigfree).sum();
        assert!((total - 1.0).abs() < 1e-12);
        // overround = 0.5 + 0.25 + 0.125 + 0.1
        assert!((nb.overround - 0.975).abs() < 1e-12);
    }

    #[test]
    fn test_vigfree_invariant_to_uniform_rescale() {
        let raw = [("1", 1.8), ("2", 3.5), ("3", 6.0)];
        let book = make_book(&raw.map(|(id, o)| (id, Some(o))));
        let nb = normalize(&book).unwrap();

        // stretching every price by the same factor moves the overround,
        // not the vig-free probabilities
        let stretched = make_book(&raw.map(|(id, o)| (id, Some(o * 1.08))));
        let ns = normalize(&stretched).unwrap();
        for (a, b) in nb.runners.iter().zip(&ns.runners) {
            assert!((a.q_vigfree - b.q_vigfree).abs() < 1e-12);
        }
        assert!((ns.overround - nb.overround / 1.08).abs() < 1e-12);
    }

    #[test]
    fn test_dense_rank_with_ties() {
        let book = make_book(&[
            ("a", Some(6.0)),
            ("b", Some(3.0)),
            ("c", Some(6.0)),
            ("d", Some(12.0)),
        ]);
        let nb = normalize(&book).unwrap();
        assert_eq!(nb.runner("b").unwrap().market_rank, 1);
        assert_eq!(nb.runner("a").unwrap().market_rank, 2);
        assert_eq!(nb.runner("c").unwrap().market_rank, 2);
        // dense: next distinct price takes the next rank, not rank 4
        assert_eq!(nb.runner("d").unwrap().market_rank, 3);
    }

    #[test]
    fn test_excludes_unquoted_and_sub_minimum() {
        let book = make_book(&[
            ("a", Some(1.005)),
            ("b", None),
            ("c", Some(5.0)),
        ]);
        let nb = normalize(&book).unwrap();
        assert_eq!(nb.runners.len(), 1);
        assert_eq!(nb.runners[0].selection_id, "c");
        assert!((nb.overround - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_empty_book_is_none() {
        let book = make_book(&[("a", None), ("b", Some(1.0))]);
        assert!(normalize(&book).is_none());
    }

    #[test]
    fn test_suspicious_flag() {
        // Two runners at evens: overround 1.0 exactly — sane.
        let even = make_book(&[("a", Some(2.0)), ("b", Some(2.0))]);
        assert!(!normalize(&even).unwrap().suspicious);

        // Heavy book: overround 1.5 — flagged but still normalized.
        let heavy = make_book(&[("a", Some(2.0)), ("b", Some(2.0)), ("c", Some(2.0))]);
        let nb = normalize(&heavy).unwrap();
        assert!(nb.suspicious);
        assert_eq!(nb.runners.len(), 3);

        // Thin book: overround 0.2 — flagged low.
        let thin = make_book(&[("a", Some(5.0))]);
        assert!(normalize(&thin).unwrap().suspicious);
    }
}
