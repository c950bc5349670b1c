//! Error taxonomy for the betting engine.
//!
//! Every fallible operation in the exchange client and the loop maps into one
//! of these variants; the loop owns the policy for what each one means
//! (retry, skip, abort). See [`FailurePolicy`].

use thiserror::Error;

/// Typed failure raised by the exchange client or the engine.
#[derive(Debug, Error)]
pub enum BotError {
    /// Session could not be established or was rejected mid-run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The race's exchange market could not be resolved.
    #[error("market lookup failed for {race}: {detail}")]
    MarketLookup { race: String, detail: String },

    /// Market resolved but no usable price was returned.
    #[error("odds unavailable for market {market_id}: {detail}")]
    OddsUnavailable { market_id: String, detail: String },

    /// The exchange rejected or failed a placement attempt.
    #[error("bet placement failed on market {market_id}: {detail}")]
    Placement { market_id: String, detail: String },

    /// A risk control refused the stake.
    #[error("risk limit exceeded: {0}")]
    RiskLimit(String),

    /// A malformed input row or response field.
    #[error("bad data: {0}")]
    Data(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the loop does with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Try again on the next poll cycle.
    RetryNextCycle,
    /// Record the decision and never retry for this race.
    TerminalForRace,
    /// Skip placement but keep tracking and recording.
    SoftStop,
    /// Log, drop the offending row, continue with the rest.
    SkipRow,
    /// Release the session and exit non-zero.
    Fatal,
}

impl BotError {
    /// Policy table: one place that says how each failure class is handled.
    pub fn policy(&self) -> FailurePolicy {
        match self {
            BotError::Auth(_) => FailurePolicy::Fatal,
            BotError::MarketLookup { .. } => FailurePolicy::RetryNextCycle,
            BotError::OddsUnavailable { .. } => FailurePolicy::RetryNextCycle,
            BotError::Placement { .. } => FailurePolicy::TerminalForRace,
            BotError::RiskLimit(_) => FailurePolicy::SoftStop,
            BotError::Data(_) => FailurePolicy::SkipRow,
            // Transport-level failures are indistinguishable from a flaky
            // exchange; treat them like a missed quote.
            BotError::Http(_) => FailurePolicy::RetryNextCycle,
            BotError::Io(_) => FailurePolicy::Fatal,
        }
    }
}
