//! Core engine — race tracking and the poll → score → place loop.

pub mod runner;
pub mod tracker;

pub use runner::{DaySummary, EngineConfig, ExecutionLoop};
pub use tracker::{RacePhase, RaceState};
