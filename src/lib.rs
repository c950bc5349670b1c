//! PADDOCK — Automated horse racing bet decision and execution engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod error;
pub mod selections;
pub mod exchange;
pub mod strategy;
pub mod engine;
pub mod sink;
