//! The execution loop.
//!
//! Owns the day's selections and their per-race state, polls the exchange on
//! a fixed interval, and drives the scoring pipeline when each race reaches
//! its bet window. Every selection ends the day with exactly one decision
//! record; every quote lands in the price log.
//!
//! All timing flows through the `now` parameter of [`ExecutionLoop::poll_cycle`],
//! so tests replay a day without touching the clock.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WindowConfig;
use crate::error::{BotError, FailurePolicy};
use crate::exchange::MarketClient;
use crate::sink::{DecisionSink, PriceLog};
use crate::strategy::risk::{RiskController, StakeProposal};
use crate::strategy::{RaceCandidate, ScoringPipeline, Verdict};
use crate::types::{
    BetResult, Decision, DecisionRecord, ObservationStatus, OddsObservation, Selection,
    StrategyMode,
};

use super::tracker::{RacePhase, RaceState};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime parameters for one day's run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval_secs: u64,
    pub window: WindowConfig,
    /// Maximum relative move from target odds before skipping.
    pub max_drift: f64,
    /// Minutes past the last off before the loop ends.
    pub post_race_linger_mins: f64,
    pub mode: StrategyMode,
    /// Transmit bets. Off means dry-run: full pipeline, synthetic bet ids.
    pub live: bool,
    /// GBP per staking unit.
    pub unit_value_gbp: f64,
    /// When this file appears, the loop finishes the cycle and exits.
    pub stop_flag: Option<PathBuf>,
}

/// End-of-day tallies, logged when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaySummary {
    pub placed: usize,
    pub skipped: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

pub struct ExecutionLoop<C: MarketClient> {
    config: EngineConfig,
    client: C,
    pipeline: ScoringPipeline,
    risk: RiskController,
    sink: Box<dyn DecisionSink>,
    price_log: Box<dyn PriceLog>,
    selections: Vec<Selection>,
    states: Vec<RaceState>,
    summary: DaySummary,
}

impl<C: MarketClient> ExecutionLoop<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        client: C,
        pipeline: ScoringPipeline,
        risk: RiskController,
        sink: Box<dyn DecisionSink>,
        price_log: Box<dyn PriceLog>,
        selections: Vec<Selection>,
    ) -> Self {
        let states = selections.iter().map(|_| RaceState::new()).collect();
        Self {
            config,
            client,
            pipeline,
            risk,
            sink,
            price_log,
            selections,
            states,
            summary: DaySummary::default(),
        }
    }

    pub fn summary(&self) -> DaySummary {
        self.summary
    }

    pub fn state(&self, idx: usize) -> &RaceState {
        &self.states[idx]
    }

    /// Report a settled result into the day's ledger (units). External
    /// settlement calls this; a large enough loss halts further placement.
    pub fn record_settlement(&mut self, pnl_units: f64) {
        self.risk.record_settlement(pnl_units);
    }

    /// Run until the day is over or shutdown is signalled. Logs in and
    /// guarantees a session-release attempt on every exit route.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.client
            .login()
            .await
            .context("Exchange login failed")?;
        info!(
            selections = self.selections.len(),
            live = self.config.live,
            mode = %self.config.mode,
            "Session open, entering poll loop"
        );

        let result = self.run_inner(shutdown).await;

        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "Session release failed");
        }

        info!(
            placed = self.summary.placed,
            skipped = self.summary.skipped,
            failed = self.summary.failed,
            committed = format!("{:.2}", self.risk.ledger().committed),
            "Day complete"
        );
        result
    }

    async fn run_inner(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.stop_requested() {
                        info!("Stop requested, shutting down after this cycle");
                        break;
                    }
                    let now = chrono::Local::now().naive_local();
                    if let Err(e) = self.poll_cycle(now).await {
                        // poll_cycle only surfaces fatal errors
                        error!(error = %e, "Fatal error, aborting loop");
                        return Err(e.into());
                    }
                    if self.day_over(now) {
                        info!("All races decided and past the linger margin");
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.config
            .stop_flag
            .as_ref()
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// True once every selection is decided and the last off is more than
    /// the linger margin in the past.
    pub fn day_over(&self, now: NaiveDateTime) -> bool {
        let all_decided = self.states.iter().all(|s| s.decided);
        let last_off_passed = self
            .selections
            .iter()
            .all(|s| s.minutes_to_off(now) < -self.config.post_race_linger_mins);
        (all_decided && last_off_passed) || self.selections.is_empty()
    }

    // -- Poll cycle ------------------------------------------------------

    /// One full pass over the day's selections: advance phases, resolve
    /// markets, collect quotes, then decide every race that is due. Only
    /// fatal errors propagate; everything else resolves to a retry or a
    /// recorded decision.
    pub async fn poll_cycle(&mut self, now: NaiveDateTime) -> Result<(), BotError> {
        for idx in 0..self.selections.len() {
            self.poll_selection(idx, now).await?;
        }
        self.decide_due_races(now).await;
        Ok(())
    }

    async fn poll_selection(&mut self, idx: usize, now: NaiveDateTime) -> Result<(), BotError> {
        let sel = self.selections[idx].clone();
        let minutes = sel.minutes_to_off(now);
        let phase = self.states[idx].advance(RacePhase::at(minutes, &self.config.window));

        if phase == RacePhase::Pre {
            return Ok(());
        }
        if self.states[idx].decided && phase == RacePhase::Finished {
            return Ok(());
        }

        // Resolve the market id; retried every poll until found.
        if self.states[idx].market.is_none() {
            match self
                .client
                .find_market(&sel.course, &sel.horse, sel.off_datetime())
                .await
            {
                Ok(market) => {
                    info!(
                        race = %sel.race_key(),
                        horse = %sel.horse,
                        market_id = %market.market_id,
                        selection_id = %market.selection_id,
                        "Market resolved"
                    );
                    self.states[idx].market = Some(market);
                }
                Err(e) => {
                    return match e.policy() {
                        FailurePolicy::Fatal => Err(e),
                        _ => {
                            debug!(race = %sel.race_key(), horse = %sel.horse, error = %e,
                                "Market not found yet");
                            self.append_observation(
                                idx,
                                now,
                                minutes,
                                None,
                                ObservationStatus::MarketNotFound,
                            );
                            Ok(())
                        }
                    };
                }
            }
        }

        // Fetch the book. A transient failure skips this poll for this race
        // and leaves state untouched.
        let market = match self.states[idx].market.clone() {
            Some(m) => m,
            None => return Ok(()),
        };
        match self.client.market_book(&market.market_id).await {
            Ok(book) => {
                let odds = book
                    .best_back(&market.selection_id)
                    .and_then(|r| r.back_odds);
                self.append_observation(idx, now, minutes, odds, phase.observation_status());
                if let Some(o) = odds {
                    self.states[idx].note_odds(o, book);
                }
            }
            Err(e) => match e.policy() {
                FailurePolicy::Fatal => return Err(e),
                _ => {
                    warn!(
                        market_id = %market.market_id,
                        error = %e,
                        "Book fetch failed, retrying next cycle"
                    );
                }
            },
        }
        Ok(())
    }

    fn append_observation(
        &mut self,
        idx: usize,
        now: NaiveDateTime,
        minutes: f64,
        odds: Option<f64>,
        status: ObservationStatus,
    ) {
        let sel = &self.selections[idx];
        let state = &self.states[idx];
        let obs = OddsObservation {
            timestamp: now,
            race_time: sel.race_time,
            course: sel.course.clone(),
            horse: sel.horse.clone(),
            minutes_to_off: minutes,
            odds,
            market_id: state.market.as_ref().map(|m| m.market_id.clone()),
            selection_id: state.market.as_ref().map(|m| m.selection_id.clone()),
            status,
        };
        if let Err(e) = self.price_log.append(&obs) {
            error!(error = %e, "Failed to append price log row");
        }
    }

    // -- Decisions -------------------------------------------------------

    /// Decide every (race, strategy) group that is due this cycle: in the
    /// bet window with a book, or past the window (forced late decision).
    async fn decide_due_races(&mut self, now: NaiveDateTime) {
        for group in self.undecided_groups() {
            let phase = self.states[group[0]].phase();
            match phase {
                RacePhase::BetWindow => {
                    // wait for at least one quote; the late fallback catches
                    // races that never produce one
                    if group.iter().any(|&i| self.states[i].last_book.is_some()) {
                        self.decide_group(&group, now, false).await;
                    }
                }
                RacePhase::Late | RacePhase::Finished => {
                    self.decide_group(&group, now, true).await;
                }
                _ => {}
            }
        }
    }

    /// Undecided selections grouped by (race, strategy), in first-seen order.
    fn undecided_groups(&self) -> Vec<Vec<usize>> {
        let mut order: Vec<(String, Vec<usize>)> = Vec::new();
        for (idx, sel) in self.selections.iter().enumerate() {
            if self.states[idx].decided {
                continue;
            }
            let key = format!("{}_{}", sel.race_key(), sel.strategy);
            match order.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(idx),
                None => order.push((key, vec![idx])),
            }
        }
        order.into_iter().map(|(_, members)| members).collect()
    }

    async fn decide_group(&mut self, group: &[usize], now: NaiveDateTime, late: bool) {
        // Pre-checks first: min odds and drift are per-selection contracts
        // with the morning file, independent of the scoring pipeline.
        let mut survivors: Vec<usize> = Vec::new();
        for &idx in group {
            let sel = self.selections[idx].clone();
            let odds = match self.states[idx].last_odds {
                Some(o) => o,
                None => {
                    // never saw a quote: nothing to decide on
                    self.record_decision(
                        idx,
                        now,
                        Decision::Skipped,
                        0.0,
                        None,
                        "MARKET_NOT_FOUND".into(),
                    );
                    continue;
                }
            };

            if odds < sel.min_odds {
                let reason = format!("Odds too low: {:.2} < {:.2}", odds, sel.min_odds);
                self.record_decision(idx, now, Decision::Skipped, 0.0, None, apply_late_tag(reason, late));
                continue;
            }

            let drift = (odds - sel.target_odds).abs() / sel.target_odds;
            if drift > self.config.max_drift {
                let reason = format!(
                    "Drifted {:.1}% (max {:.0}%)",
                    drift * 100.0,
                    self.config.max_drift * 100.0
                );
                self.record_decision(idx, now, Decision::Skipped, 0.0, None, apply_late_tag(reason, late));
                continue;
            }

            survivors.push(idx);
        }

        if survivors.is_empty() {
            return;
        }

        // All survivors share the race; use the freshest book among them.
        let book = survivors
            .iter()
            .filter_map(|&i| self.states[i].last_book.clone())
            .last();
        let book = match book {
            Some(b) => b,
            None => return, // unreachable: survivors all have odds
        };

        let candidates: Vec<RaceCandidate> = survivors
            .iter()
            .map(|&i| {
                let sel = &self.selections[i];
                RaceCandidate {
                    selection_id: self.states[i]
                        .market
                        .as_ref()
                        .map(|m| m.selection_id.clone())
                        .unwrap_or_default(),
                    p_model: sel.model_probability(),
                    fixed_stake: sel.stake / self.config.unit_value_gbp,
                }
            })
            .collect();

        let verdicts = self.pipeline.evaluate_race(&book, &candidates);

        for (pos, verdict) in verdicts.into_iter().enumerate() {
            let idx = survivors[pos];
            match verdict {
                Verdict::Rejected { reason, .. } => {
                    self.record_decision(idx, now, Decision::Skipped, 0.0, None, apply_late_tag(reason, late));
                }
                Verdict::Bet { assessment, stake } => {
                    self.try_place(idx, now, late, &book, assessment.ev_adjusted, stake.stake)
                        .await;
                }
            }
        }
    }

    /// Risk-approve and place one winning candidate.
    async fn try_place(
        &mut self,
        idx: usize,
        now: NaiveDateTime,
        late: bool,
        book: &crate::exchange::MarketBook,
        ev_adjusted: f64,
        stake_units: f64,
    ) {
        if stake_units <= 0.0 {
            self.record_decision(
                idx,
                now,
                Decision::Skipped,
                0.0,
                None,
                apply_late_tag("Zero stake after sizing".into(), late),
            );
            return;
        }

        let market = match self.states[idx].market.clone() {
            Some(m) => m,
            None => return,
        };

        // Liquidity floor on the volume this bet would consume.
        let available = book
            .best_back(&market.selection_id)
            .map(|r| r.available_gbp)
            .unwrap_or(0.0);
        if let Err(reason) = self.risk.check_liquidity(available) {
            self.record_decision(idx, now, Decision::Skipped, 0.0, None, apply_late_tag(reason, late));
            return;
        }

        // Defensive per-race cap (the pipeline already picks one winner).
        let proposals = self.risk.apply_race_cap(vec![StakeProposal {
            selection_id: market.selection_id.clone(),
            stake: stake_units,
            ev_adjusted,
        }]);
        let capped_units = match proposals.first() {
            Some(p) => p.stake,
            None => return,
        };

        // Daily caps; may scale the stake to the remaining headroom.
        let allowed_units = match self.risk.commit(capped_units) {
            Ok(u) => u,
            Err(reason) => {
                self.record_decision(idx, now, Decision::Skipped, 0.0, None, apply_late_tag(reason, late));
                return;
            }
        };
        let stake_gbp = allowed_units * self.config.unit_value_gbp;
        let odds = match self.states[idx].last_odds {
            Some(o) => o,
            None => return,
        };

        let placement = if self.config.live {
            self.client
                .place_back_bet(&market.market_id, &market.selection_id, odds, stake_gbp)
                .await
        } else {
            Ok(format!("DRY-{}", Uuid::new_v4()))
        };

        match placement {
            Ok(bet_id) => {
                let label = if self.config.live { "EXECUTED" } else { "DRY_RUN" };
                let reason = apply_late_tag(format!("{label} @ {odds:.2}"), late);
                self.states[idx].bet_id = Some(bet_id.clone());
                self.record_decision(idx, now, Decision::Placed, stake_gbp, Some(bet_id), reason);
            }
            Err(e) => {
                // terminal for this race: never retried
                let reason = apply_late_tag(format!("Bet placement failed: {e}"), late);
                self.record_decision(idx, now, Decision::Failed, stake_gbp, None, reason);
            }
        }
    }

    fn record_decision(
        &mut self,
        idx: usize,
        now: NaiveDateTime,
        decision: Decision,
        stake_gbp: f64,
        bet_id: Option<String>,
        reason: String,
    ) {
        let sel = &self.selections[idx];
        let state = &self.states[idx];
        let record = DecisionRecord {
            timestamp: now,
            race_time: sel.race_time,
            course: sel.course.clone(),
            horse: sel.horse.clone(),
            strategy: sel.strategy.clone(),
            mode: self.config.mode,
            target_odds: sel.target_odds,
            min_odds: sel.min_odds,
            observed_odds: state.last_odds,
            stake: stake_gbp,
            decision,
            bet_id,
            reason: reason.clone(),
            market_id: state.market.as_ref().map(|m| m.market_id.clone()),
            selection_id: state.market.as_ref().map(|m| m.selection_id.clone()),
            result: BetResult::Pending,
            pnl: None,
        };

        info!(
            race = %sel.race_key(),
            horse = %sel.horse,
            decision = %decision,
            stake = format!("£{:.2}", stake_gbp),
            reason = %reason,
            "Decision recorded"
        );

        if let Err(e) = self.sink.record(&record) {
            error!(error = %e, "Failed to write decision record");
        }
        self.states[idx].decided = true;
        match decision {
            Decision::Placed => self.summary.placed += 1,
            Decision::Skipped => self.summary.skipped += 1,
            Decision::Failed => self.summary.failed += 1,
        }
    }
}

fn apply_late_tag(reason: String, late: bool) -> String {
    if late {
        format!("LATE_DECISION: {reason}")
    } else {
        reason
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MarketBook, MarketRef, RunnerPrice};
    use crate::strategy::gates::GateConfig;
    use crate::strategy::kelly::{StakeConfig, StakeSizer};
    use crate::strategy::risk::RiskConfig;
    use crate::strategy::{EdgeScorer, StakePolicy};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    // -- Scripted exchange client ---------------------------------------

    #[derive(Default)]
    struct ClientState {
        markets: HashMap<String, MarketRef>,
        books: HashMap<String, MarketBook>,
        fail_lookup: bool,
        fail_book: bool,
        fail_book_as_auth: bool,
        fail_place: bool,
        placed: Vec<(String, String, f64, f64)>,
        logins: usize,
        logouts: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedClient {
        state: Arc<Mutex<ClientState>>,
    }

    #[async_trait]
    impl MarketClient for ScriptedClient {
        async fn login(&self) -> Result<(), BotError> {
            self.state.lock().unwrap().logins += 1;
            Ok(())
        }

        async fn logout(&self) -> Result<(), BotError> {
            self.state.lock().unwrap().logouts += 1;
            Ok(())
        }

        async fn find_market(
            &self,
            course: &str,
            horse: &str,
            _off_time: NaiveDateTime,
        ) -> Result<MarketRef, BotError> {
            let state = self.state.lock().unwrap();
            if state.fail_lookup {
                return Err(BotError::MarketLookup {
                    race: course.into(),
                    detail: "no matching market".into(),
                });
            }
            state
                .markets
                .get(horse)
                .cloned()
                .ok_or_else(|| BotError::MarketLookup {
                    race: course.into(),
                    detail: "unknown horse".into(),
                })
        }

        async fn market_book(&self, market_id: &str) -> Result<MarketBook, BotError> {
            let state = self.state.lock().unwrap();
            if state.fail_book_as_auth {
                return Err(BotError::Auth("session expired".into()));
            }
            if state.fail_book {
                return Err(BotError::OddsUnavailable {
                    market_id: market_id.into(),
                    detail: "scripted outage".into(),
                });
            }
            state
                .books
                .get(market_id)
                .cloned()
                .ok_or_else(|| BotError::OddsUnavailable {
                    market_id: market_id.into(),
                    detail: "no book".into(),
                })
        }

        async fn place_back_bet(
            &self,
            market_id: &str,
            selection_id: &str,
            odds: f64,
            stake_gbp: f64,
        ) -> Result<String, BotError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_place {
                return Err(BotError::Placement {
                    market_id: market_id.into(),
                    detail: "INSUFFICIENT_FUNDS".into(),
                });
            }
            state
                .placed
                .push((market_id.into(), selection_id.into(), odds, stake_gbp));
            Ok(format!("BET-{}", state.placed.len()))
        }
    }

    // -- In-memory sinks -------------------------------------------------

    #[derive(Clone, Default)]
    struct MemSink(Arc<Mutex<Vec<DecisionRecord>>>);

    impl DecisionSink for MemSink {
        fn record(&mut self, rec: &DecisionRecord) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(rec.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemPriceLog(Arc<Mutex<Vec<OddsObservation>>>);

    impl PriceLog for MemPriceLog {
        fn append(&mut self, obs: &OddsObservation) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(obs.clone());
            Ok(())
        }
    }

    // -- Fixtures ---------------------------------------------------------

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 27).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn make_selection(horse: &str, target: f64, min: f64) -> Selection {
        Selection {
            date: day(),
            race_time: NaiveTime::from_hms_opt(14, 30, 0).unwrap(),
            course: "Ascot".into(),
            horse: horse.into(),
            strategy: "hybrid_v3".into(),
            target_odds: target,
            min_odds: min,
            stake: 20.0,
            p_model: Some(0.30),
        }
    }

    /// Competitive ten-runner book; the tracked runner "8" sits mid-field
    /// at 9.0 and passes every hybrid_v3 gate with p_model 0.30.
    fn make_book() -> MarketBook {
        let odds = [
            ("1", 3.0),
            ("2", 5.0),
            ("3", 7.5),
            ("8", 9.0),
            ("5", 14.0),
            ("6", 20.0),
            ("7", 26.0),
            ("4", 34.0),
            ("9", 42.0),
            ("10", 50.0),
        ];
        MarketBook {
            market_id: "1.234".into(),
            total_matched_gbp: 40_000.0,
            runners: odds
                .iter()
                .map(|(id, o)| RunnerPrice {
                    selection_id: (*id).into(),
                    back_odds: Some(*o),
                    available_gbp: 800.0,
                })
                .collect(),
        }
    }

    fn make_client(horse: &str) -> ScriptedClient {
        let client = ScriptedClient::default();
        {
            let mut state = client.state.lock().unwrap();
            state.markets.insert(
                horse.into(),
                MarketRef {
                    market_id: "1.234".into(),
                    selection_id: "8".into(),
                },
            );
            state.books.insert("1.234".into(), make_book());
        }
        client
    }

    fn make_loop(
        client: ScriptedClient,
        selections: Vec<Selection>,
        live: bool,
    ) -> (ExecutionLoop<ScriptedClient>, MemSink, MemPriceLog) {
        let sink = MemSink::default();
        let price_log = MemPriceLog::default();
        let pipeline = ScoringPipeline::new(
            EdgeScorer::new(0.02),
            GateConfig::default(),
            StakeSizer::new(StakeConfig {
                max_stake_per_bet: 5.0,
                ..Default::default()
            }),
            StakePolicy::Fixed,
        );
        let risk = RiskController::new(RiskConfig {
            max_stake_per_race: 5.0,
            ..Default::default()
        });
        let config = EngineConfig {
            poll_interval_secs: 300,
            window: WindowConfig::default(),
            max_drift: 0.15,
            post_race_linger_mins: 30.0,
            mode: StrategyMode::Backing,
            live,
            unit_value_gbp: 10.0,
            stop_flag: None,
        };
        let engine = ExecutionLoop::new(
            config,
            client,
            pipeline,
            risk,
            Box::new(sink.clone()),
            Box::new(price_log.clone()),
            selections,
        );
        (engine, sink, price_log)
    }

    // -- Scenarios ---------------------------------------------------------

    #[tokio::test]
    async fn test_dry_run_placement_in_window() {
        let client = make_client("Thunder Run");
        let (mut engine, sink, prices) =
            make_loop(client, vec![make_selection("Thunder Run", 9.0, 7.0)], false);

        // 60 minutes out: inside the window
        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.decision, Decision::Placed);
        assert_eq!(r.reason, "DRY_RUN @ 9.00");
        assert_eq!(r.stake, 20.0);
        assert_eq!(r.observed_odds, Some(9.0));
        assert!(r.bet_id.as_deref().unwrap().starts_with("DRY-"));
        assert_eq!(r.market_id.as_deref(), Some("1.234"));
        assert_eq!(r.result, BetResult::Pending);

        let obs = prices.0.lock().unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].status, ObservationStatus::BetWindow);
        assert_eq!(obs[0].odds, Some(9.0));
    }

    #[tokio::test]
    async fn test_live_placement_reaches_exchange() {
        let client = make_client("Thunder Run");
        let (mut engine, sink, _) = make_loop(
            client.clone(),
            vec![make_selection("Thunder Run", 9.0, 7.0)],
            true,
        );

        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].reason, "EXECUTED @ 9.00");
        assert_eq!(records[0].bet_id.as_deref(), Some("BET-1"));

        let state = client.state.lock().unwrap();
        assert_eq!(state.placed.len(), 1);
        let (market, selection, odds, stake) = &state.placed[0];
        assert_eq!(market, "1.234");
        assert_eq!(selection, "8");
        assert_eq!(*odds, 9.0);
        assert_eq!(*stake, 20.0);
    }

    #[tokio::test]
    async fn test_min_odds_skip() {
        let client = make_client("Thunder Run");
        let (mut engine, sink, _) =
            make_loop(client, vec![make_selection("Thunder Run", 9.0, 9.5)], false);

        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].decision, Decision::Skipped);
        assert_eq!(records[0].reason, "Odds too low: 9.00 < 9.50");
    }

    #[tokio::test]
    async fn test_drift_skip() {
        let client = make_client("Thunder Run");
        // expected 6.0 in the morning, now trading at 9.0: 50% drift
        let (mut engine, sink, _) =
            make_loop(client, vec![make_selection("Thunder Run", 6.0, 5.0)], false);

        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].decision, Decision::Skipped);
        assert_eq!(records[0].reason, "Drifted 50.0% (max 15%)");
    }

    #[tokio::test]
    async fn test_gate_reason_recorded() {
        let client = make_client("Thunder Run");
        let mut sel = make_selection("Thunder Run", 9.0, 7.0);
        // weak model probability: disagreement gate fails
        sel.p_model = Some(0.12);
        let (mut engine, sink, _) = make_loop(client, vec![sel], false);

        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].decision, Decision::Skipped);
        assert!(
            records[0].reason.starts_with("Low disagreement: "),
            "{}",
            records[0].reason
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_retries_then_market_not_found() {
        let client = make_client("Thunder Run");
        client.state.lock().unwrap().fail_lookup = true;
        let (mut engine, sink, prices) =
            make_loop(client, vec![make_selection("Thunder Run", 9.0, 7.0)], false);

        // tracking polls: no decision, MARKET_NOT_FOUND rows only
        engine.poll_cycle(at(12, 0)).await.unwrap();
        engine.poll_cycle(at(13, 30)).await.unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
        {
            let obs = prices.0.lock().unwrap();
            assert_eq!(obs.len(), 2);
            assert!(obs
                .iter()
                .all(|o| o.status == ObservationStatus::MarketNotFound));
        }

        // past the window with no observation at all
        engine.poll_cycle(at(13, 45)).await.unwrap();
        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Skipped);
        assert_eq!(records[0].reason, "MARKET_NOT_FOUND");
        assert_eq!(records[0].observed_odds, None);
    }

    #[tokio::test]
    async fn test_late_decision_from_last_observation() {
        let client = make_client("Thunder Run");
        let (mut engine, sink, _) = make_loop(
            client.clone(),
            vec![make_selection("Thunder Run", 9.0, 7.0)],
            false,
        );

        // quote collected during tracking
        engine.poll_cycle(at(12, 0)).await.unwrap();
        assert!(sink.0.lock().unwrap().is_empty());

        // outage across the whole window; first poll back is already late
        client.state.lock().unwrap().fail_book = true;
        engine.poll_cycle(at(13, 50)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Placed);
        assert_eq!(records[0].reason, "LATE_DECISION: DRY_RUN @ 9.00");
    }

    #[tokio::test]
    async fn test_placement_failure_is_terminal() {
        let client = make_client("Thunder Run");
        client.state.lock().unwrap().fail_place = true;
        let (mut engine, sink, _) = make_loop(
            client.clone(),
            vec![make_selection("Thunder Run", 9.0, 7.0)],
            true,
        );

        engine.poll_cycle(at(13, 30)).await.unwrap();
        // further polls must not retry the placement
        engine.poll_cycle(at(13, 32)).await.unwrap();
        engine.poll_cycle(at(13, 40)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Failed);
        assert!(records[0].reason.starts_with("Bet placement failed: "));
        assert_eq!(engine.summary().failed, 1);
        assert!(client.state.lock().unwrap().placed.is_empty());
    }

    #[tokio::test]
    async fn test_risk_halt_skips_with_reason() {
        let client = make_client("Thunder Run");
        let (mut engine, sink, _) =
            make_loop(client, vec![make_selection("Thunder Run", 9.0, 7.0)], false);

        // daily loss cap (5 units) already burned
        engine.record_settlement(-5.0);
        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].decision, Decision::Skipped);
        assert_eq!(records[0].reason, "RISK_HALT");
    }

    #[tokio::test]
    async fn test_low_liquidity_skip() {
        let client = make_client("Thunder Run");
        {
            let mut state = client.state.lock().unwrap();
            let book = state.books.get_mut("1.234").unwrap();
            for r in &mut book.runners {
                r.available_gbp = 40.0;
            }
        }
        let (mut engine, sink, _) =
            make_loop(client, vec![make_selection("Thunder Run", 9.0, 7.0)], false);

        engine.poll_cycle(at(13, 30)).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].decision, Decision::Skipped);
        assert_eq!(records[0].reason, "Low liquidity: £40 < £100");
    }

    #[tokio::test]
    async fn test_exactly_one_record_per_selection() {
        let client = make_client("Thunder Run");
        let (mut engine, sink, _) = make_loop(
            client,
            vec![make_selection("Thunder Run", 9.0, 7.0)],
            false,
        );

        for minutes in [240, 180, 120, 65, 60, 55, 40, 20, 0] {
            let now = at(14, 30) - chrono::Duration::minutes(minutes);
            engine.poll_cycle(now).await.unwrap();
        }

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Placed);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let client = make_client("Thunder Run");
        client.state.lock().unwrap().fail_book_as_auth = true;
        let (mut engine, sink, _) =
            make_loop(client, vec![make_selection("Thunder Run", 9.0, 7.0)], false);

        let err = engine.poll_cycle(at(13, 30)).await.unwrap_err();
        assert!(matches!(err, BotError::Auth(_)));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_book_failure_leaves_state_unchanged() {
        let client = make_client("Thunder Run");
        client.state.lock().unwrap().fail_book = true;
        let (mut engine, sink, prices) = make_loop(
            client.clone(),
            vec![make_selection("Thunder Run", 9.0, 7.0)],
            false,
        );

        engine.poll_cycle(at(12, 0)).await.unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(prices.0.lock().unwrap().is_empty());
        assert!(engine.state(0).last_odds.is_none());

        // exchange recovers
        client.state.lock().unwrap().fail_book = false;
        engine.poll_cycle(at(13, 30)).await.unwrap();
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_day_over() {
        let client = make_client("Thunder Run");
        let (mut engine, _, _) = make_loop(
            client,
            vec![make_selection("Thunder Run", 9.0, 7.0)],
            false,
        );

        engine.poll_cycle(at(13, 30)).await.unwrap();
        assert!(!engine.day_over(at(14, 45)));
        assert!(engine.day_over(at(15, 1)));
    }

    #[tokio::test]
    async fn test_run_releases_session() {
        let client = make_client("Thunder Run");
        // empty day: the loop exits on its first tick
        let (mut engine, _, _) = make_loop(client.clone(), vec![], false);

        engine.run(std::future::pending()).await.unwrap();

        let state = client.state.lock().unwrap();
        assert_eq!(state.logins, 1);
        assert_eq!(state.logouts, 1);
    }
}
