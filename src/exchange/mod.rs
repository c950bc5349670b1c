//! Exchange integration.
//!
//! Defines the `MarketClient` trait the engine runs against, plus the wire
//! types for race market books. The production implementation is the Betfair
//! exchange client; tests substitute a scripted in-memory client.

pub mod betfair;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::BotError;

/// Resolved identity of a runner within an exchange market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketRef {
    pub market_id: String,
    pub selection_id: String,
}

/// One runner's best available back price.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerPrice {
    pub selection_id: String,
    /// Best available back odds. None when the runner has no offers
    /// (or is non-runner/removed).
    pub back_odds: Option<f64>,
    /// GBP available at the best back price.
    pub available_gbp: f64,
}

/// Snapshot of a race market: every runner's best back price.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketBook {
    pub market_id: String,
    /// Total GBP matched on the market so far.
    pub total_matched_gbp: f64,
    pub runners: Vec<RunnerPrice>,
}

impl MarketBook {
    /// Best back price for a specific runner, if quoted.
    pub fn best_back(&self, selection_id: &str) -> Option<&RunnerPrice> {
        self.runners
            .iter()
            .find(|r| r.selection_id == selection_id && r.back_odds.is_some())
    }
}

/// Abstraction over the betting exchange.
///
/// All methods surface [`BotError`] variants so the engine's policy table can
/// classify each failure without string-matching.
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Establish a session. Must succeed before any other call.
    async fn login(&self) -> Result<(), BotError>;

    /// Release the session. Best-effort; called even on abort paths.
    async fn logout(&self) -> Result<(), BotError>;

    /// Resolve a race and runner to exchange identifiers.
    async fn find_market(
        &self,
        course: &str,
        horse: &str,
        off_time: NaiveDateTime,
    ) -> Result<MarketRef, BotError>;

    /// Fetch the full runner book for a market.
    async fn market_book(&self, market_id: &str) -> Result<MarketBook, BotError>;

    /// Place a back bet. Returns the exchange bet id.
    async fn place_back_bet(
        &self,
        market_id: &str,
        selection_id: &str,
        odds: f64,
        stake_gbp: f64,
    ) -> Result<String, BotError>;
}
