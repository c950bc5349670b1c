//! Core domain types shared across the engine.
//!
//! Selections arrive from the morning scoring run as CSV rows; everything the
//! loop produces (odds observations, decision records) is defined here so the
//! sinks, strategy modules, and tests all speak the same language.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Strategy mode
// ---------------------------------------------------------------------------

/// Capability of the running strategy. Both modes share the same decision
/// pipeline; the mode is stamped into records so downstream analysis can
/// separate the books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    Backing,
    BackThenLay,
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyMode::Backing => write!(f, "BACKING"),
            StrategyMode::BackThenLay => write!(f, "BACK_THEN_LAY"),
        }
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "backing" | "back" => Ok(StrategyMode::Backing),
            "back_then_lay" | "backlay" => Ok(StrategyMode::BackThenLay),
            other => Err(format!("Unknown strategy mode: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// A single runner the morning model wants backed today.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub date: NaiveDate,
    pub race_time: NaiveTime,
    pub course: String,
    pub horse: String,
    /// Strategy tag from the scoring run (e.g. "hybrid_v3").
    pub strategy: String,
    /// Expected market odds at scoring time; the drift baseline.
    pub target_odds: f64,
    /// Minimum acceptable odds at bet time.
    pub min_odds: f64,
    /// Recommended stake in GBP (used under the fixed staking policy).
    pub stake: f64,
    /// Model win probability from the scoring run. Falls back to the
    /// probability implied by the target odds when absent.
    pub p_model: Option<f64>,
}

impl Selection {
    /// Model win probability used for edge scoring.
    pub fn model_probability(&self) -> f64 {
        self.p_model.unwrap_or(1.0 / self.target_odds)
    }

    /// Race identity: same key means same market.
    pub fn race_key(&self) -> String {
        format!("{}_{}", self.race_time.format("%H:%M"), self.course)
    }

    /// Full selection identity, unique per (race, horse, strategy).
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.race_time.format("%H:%M"),
            self.course,
            self.horse,
            self.strategy
        )
    }

    /// Scheduled off as a full datetime on this selection's date.
    pub fn off_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.race_time)
    }

    /// Minutes until the off, negative after the race has started.
    pub fn minutes_to_off(&self, now: NaiveDateTime) -> f64 {
        (self.off_datetime() - now).num_seconds() as f64 / 60.0
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// Market status attached to each price-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationStatus {
    Tracking,
    BetWindow,
    TooLate,
    MarketNotFound,
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationStatus::Tracking => write!(f, "TRACKING"),
            ObservationStatus::BetWindow => write!(f, "BET_WINDOW"),
            ObservationStatus::TooLate => write!(f, "TOO_LATE"),
            ObservationStatus::MarketNotFound => write!(f, "MARKET_NOT_FOUND"),
        }
    }
}

/// One polled look at a selection's market. Appended to the price log on
/// every cycle that produces (or fails to produce) a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsObservation {
    pub timestamp: NaiveDateTime,
    pub race_time: NaiveTime,
    pub course: String,
    pub horse: String,
    pub minutes_to_off: f64,
    pub odds: Option<f64>,
    pub market_id: Option<String>,
    pub selection_id: Option<String>,
    pub status: ObservationStatus,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Final verdict for a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Placed,
    Skipped,
    Failed,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Placed => write!(f, "PLACED"),
            Decision::Skipped => write!(f, "SKIPPED"),
            Decision::Failed => write!(f, "FAILED"),
        }
    }
}

/// Settlement outcome. Results are reported externally; records start PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetResult {
    Pending,
    Win,
    Loss,
}

/// One row of the decision log: exactly one per selection per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: NaiveDateTime,
    pub race_time: NaiveTime,
    pub course: String,
    pub horse: String,
    pub strategy: String,
    pub mode: StrategyMode,
    pub target_odds: f64,
    pub min_odds: f64,
    pub observed_odds: Option<f64>,
    pub stake: f64,
    pub decision: Decision,
    pub bet_id: Option<String>,
    pub reason: String,
    pub market_id: Option<String>,
    pub selection_id: Option<String>,
    pub result: BetResult,
    pub pnl: Option<f64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
