//! Morning selections ingestion.
//!
//! The scoring run leaves a CSV of recommended bets; this module loads the
//! requested day's rows into validated [`Selection`] records. Validation
//! happens once, here, at the boundary: a malformed row is logged and
//! dropped, it never aborts the rest of the file.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::Selection;

/// Source of the day's selections.
pub trait SelectionSource {
    /// Load the ordered selections for one date. Row order is preserved;
    /// it drives the loop's deterministic iteration order.
    fn load(&self, date: NaiveDate) -> Result<Vec<Selection>>;
}

// ---------------------------------------------------------------------------
// CSV source
// ---------------------------------------------------------------------------

/// Raw CSV row, before validation. Column names match the scoring run's
/// output file.
#[derive(Debug, Deserialize)]
struct RawRow {
    date: String,
    time: String,
    course: String,
    horse: String,
    strategy: String,
    odds: f64,
    min_odds_needed: f64,
    stake_gbp: f64,
    #[serde(default)]
    p_model: Option<f64>,
}

pub struct CsvSelectionSource {
    path: PathBuf,
}

impl CsvSelectionSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn validate(row: &RawRow, date: NaiveDate) -> Result<Option<Selection>, String> {
        let row_date = NaiveDate::parse_from_str(row.date.trim(), "%Y-%m-%d")
            .map_err(|e| format!("bad date '{}': {e}", row.date))?;
        if row_date != date {
            return Ok(None);
        }

        let race_time = NaiveTime::parse_from_str(row.time.trim(), "%H:%M")
            .map_err(|e| format!("bad time '{}': {e}", row.time))?;

        if row.course.trim().is_empty() || row.horse.trim().is_empty() {
            return Err("empty course or horse".into());
        }
        if row.odds < 1.01 {
            return Err(format!("target odds {} below 1.01", row.odds));
        }
        if row.min_odds_needed < 1.0 {
            return Err(format!("min odds {} below 1.0", row.min_odds_needed));
        }
        if row.stake_gbp <= 0.0 {
            return Err(format!("non-positive stake {}", row.stake_gbp));
        }
        if let Some(p) = row.p_model {
            if !(0.0..=1.0).contains(&p) || p == 0.0 {
                return Err(format!("model probability {p} outside (0, 1]"));
            }
        }

        Ok(Some(Selection {
            date: row_date,
            race_time,
            course: row.course.trim().to_string(),
            horse: row.horse.trim().to_string(),
            strategy: row.strategy.trim().to_string(),
            target_odds: row.odds,
            min_odds: row.min_odds_needed,
            stake: row.stake_gbp,
            p_model: row.p_model,
        }))
    }
}

impl SelectionSource for CsvSelectionSource {
    fn load(&self, date: NaiveDate) -> Result<Vec<Selection>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open selections file: {}", self.path.display()))?;

        let mut selections = Vec::new();
        let mut dropped = 0usize;

        for (line, record) in reader.deserialize::<RawRow>().enumerate() {
            let row = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "Unreadable selections row, skipping");
                    dropped += 1;
                    continue;
                }
            };
            match Self::validate(&row, date) {
                Ok(Some(sel)) => selections.push(sel),
                Ok(None) => {} // other day's row
                Err(reason) => {
                    warn!(
                        line = line + 2,
                        horse = %row.horse,
                        reason = %reason,
                        "Invalid selections row, skipping"
                    );
                    dropped += 1;
                }
            }
        }

        info!(
            date = %date,
            loaded = selections.len(),
            dropped,
            file = %self.path.display(),
            "Selections loaded"
        );
        Ok(selections)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
