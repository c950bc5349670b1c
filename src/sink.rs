//! Append-only CSV sinks.
//!
//! Two files per day: the price log (one row per odds observation) and the
//! decision log (one row per selection's final verdict). Both are the audit
//! trail; rows are never rewritten. The `status` subcommand reads the
//! decision log back.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::types::{DecisionRecord, OddsObservation};

/// Append-only sink for decision records.
pub trait DecisionSink: Send {
    fn record(&mut self, rec: &DecisionRecord) -> Result<()>;
}

/// Append-only sink for odds observations.
pub trait PriceLog: Send {
    fn append(&mut self, obs: &OddsObservation) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CSV implementations
// ---------------------------------------------------------------------------

/// Serializes one record per call, writing the header only when the file is
/// new. Reopening per write keeps the file consistent even if the process
/// dies mid-day.
fn append_row<T: serde::Serialize>(path: &Path, row: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log dir: {}", parent.display()))?;
    }
    let write_header = !path.exists() || path.metadata().map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}

pub struct CsvDecisionSink {
    path: PathBuf,
}

impl CsvDecisionSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl DecisionSink for CsvDecisionSink {
    fn record(&mut self, rec: &DecisionRecord) -> Result<()> {
        append_row(&self.path, rec)
    }
}

pub struct CsvPriceLog {
    path: PathBuf,
}

impl CsvPriceLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl PriceLog for CsvPriceLog {
    fn append(&mut self, obs: &OddsObservation) -> Result<()> {
        append_row(&self.path, obs)
    }
}

/// Read a day's decision log back. Missing file means no decisions yet.
pub fn load_decisions(path: &Path) -> Result<Vec<DecisionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open decision log: {}", path.display()))?;
    let mut records = Vec::new();
    for rec in reader.deserialize::<DecisionRecord>() {
        records.push(rec.context("Malformed decision log row")?);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
