//! Per-race timing state.
//!
//! Each tracked selection walks PRE → TRACKING → BET_WINDOW → LATE →
//! FINISHED, driven purely by wall-clock distance to the scheduled off.
//! Phases only move forward: a clock wobble never rewinds a race.

use crate::config::WindowConfig;
use crate::exchange::{MarketBook, MarketRef};
use crate::types::ObservationStatus;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Race timing phase. Ordering matters: later phases compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RacePhase {
    Pre,
    Tracking,
    BetWindow,
    Late,
    Finished,
}

impl RacePhase {
    /// Phase for a given minutes-to-off (negative once the race has run).
    pub fn at(minutes_to_off: f64, window: &WindowConfig) -> Self {
        let high = window.center_mins + window.half_width_mins;
        let low = window.center_mins - window.half_width_mins;

        if minutes_to_off > window.tracking_start_mins {
            RacePhase::Pre
        } else if minutes_to_off > high {
            RacePhase::Tracking
        } else if minutes_to_off >= low {
            RacePhase::BetWindow
        } else if minutes_to_off >= 0.0 {
            RacePhase::Late
        } else {
            RacePhase::Finished
        }
    }

    /// Status stamped on price-log rows observed in this phase.
    pub fn observation_status(&self) -> ObservationStatus {
        match self {
            RacePhase::Pre | RacePhase::Tracking => ObservationStatus::Tracking,
            RacePhase::BetWindow => ObservationStatus::BetWindow,
            RacePhase::Late | RacePhase::Finished => ObservationStatus::TooLate,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-race state
// ---------------------------------------------------------------------------

/// Runtime state for one tracked selection.
#[derive(Debug, Clone, Default)]
pub struct RaceState {
    phase: Option<RacePhase>,
    /// Resolved exchange identifiers; None until the lookup succeeds.
    pub market: Option<MarketRef>,
    pub best_odds_seen: Option<f64>,
    /// Most recent quote and the book it came from, for the late fallback.
    pub last_odds: Option<f64>,
    pub last_book: Option<MarketBook>,
    /// A DecisionRecord has been written; nothing further may be decided.
    pub decided: bool,
    pub bet_id: Option<String>,
}

impl RaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RacePhase {
        self.phase.unwrap_or(RacePhase::Pre)
    }

    /// Advance to the observed phase. Never rewinds.
    pub fn advance(&mut self, observed: RacePhase) -> RacePhase {
        let next = match self.phase {
            Some(current) if current > observed => current,
            _ => observed,
        };
        self.phase = Some(next);
        next
    }

    /// Record a successful quote.
    pub fn note_odds(&mut self, odds: f64, book: MarketBook) {
        self.last_odds = Some(odds);
        self.last_book = Some(book);
        self.best_odds_seen = Some(match self.best_odds_seen {
            Some(best) if best >= odds => best,
            _ => odds,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> WindowConfig {
        WindowConfig::default()
    }

    #[test]
    fn test_phase_boundaries() {
        let w = window();
        assert_eq!(RacePhase::at(300.0, &w), RacePhase::Pre);
        assert_eq!(RacePhase::at(240.0, &w), RacePhase::Tracking);
        assert_eq!(RacePhase::at(66.0, &w), RacePhase::Tracking);
        assert_eq!(RacePhase::at(65.0, &w), RacePhase::BetWindow);
        assert_eq!(RacePhase::at(60.0, &w), RacePhase::BetWindow);
        assert_eq!(RacePhase::at(55.0, &w), RacePhase::BetWindow);
        assert_eq!(RacePhase::at(54.9, &w), RacePhase::Late);
        assert_eq!(RacePhase::at(0.0, &w), RacePhase::Late);
        assert_eq!(RacePhase::at(-1.0, &w), RacePhase::Finished);
    }

    #[test]
    fn test_custom_window() {
        let w = WindowConfig {
            tracking_start_mins: 120.0,
            center_mins: 30.0,
            half_width_mins: 10.0,
        };
        assert_eq!(RacePhase::at(121.0, &w), RacePhase::Pre);
        assert_eq!(RacePhase::at(41.0, &w), RacePhase::Tracking);
        assert_eq!(RacePhase::at(40.0, &w), RacePhase::BetWindow);
        assert_eq!(RacePhase::at(20.0, &w), RacePhase::BetWindow);
        assert_eq!(RacePhase::at(19.0, &w), RacePhase::Late);
    }

    #[test]
    fn test_phase_never_rewinds() {
        let mut state = RaceState::new();
        assert_eq!(state.advance(RacePhase::BetWindow), RacePhase::BetWindow);
        // stale clock reading must not pull the race back
        assert_eq!(state.advance(RacePhase::Tracking), RacePhase::BetWindow);
        assert_eq!(state.advance(RacePhase::Late), RacePhase::Late);
        assert_eq!(state.phase(), RacePhase::Late);
    }

    #[test]
    fn test_best_odds_tracking() {
        let mut state = RaceState::new();
        let book = MarketBook::default();
        state.note_odds(8.0, book.clone());
        state.note_odds(9.5, book.clone());
        state.note_odds(8.5, book);
        assert_eq!(state.best_odds_seen, Some(9.5));
        assert_eq!(state.last_odds, Some(8.5));
    }

    #[test]
    fn test_observation_status_mapping() {
        assert_eq!(
            RacePhase::Tracking.observation_status(),
            ObservationStatus::Tracking
        );
        assert_eq!(
            RacePhase::BetWindow.observation_status(),
            ObservationStatus::BetWindow
        );
        assert_eq!(RacePhase::Late.observation_status(), ObservationStatus::TooLate);
    }
}
