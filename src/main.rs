//! PADDOCK — Automated horse racing bet decision and execution engine.
//!
//! Entry point. Loads configuration, initialises structured logging, loads
//! the day's selections, and runs the poll→score→place loop with graceful
//! shutdown. `stop` and `status` operate on a running or finished day via
//! the data directory.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use paddock::config::AppConfig;
use paddock::engine::{EngineConfig, ExecutionLoop};
use paddock::exchange::betfair::BetfairClient;
use paddock::selections::{CsvSelectionSource, SelectionSource};
use paddock::sink::{self, CsvDecisionSink, CsvPriceLog};
use paddock::strategy::kelly::{StakeConfig, StakeSizer};
use paddock::strategy::risk::{RiskConfig, RiskController};
use paddock::strategy::{EdgeScorer, ScoringPipeline};
use paddock::types::Decision;

const BANNER: &str = r#"
 ____   _    ____  ____   ___   ____ _  __
|  _ \ / \  |  _ \|  _ \ / _ \ / ___| |/ /
| |_) / _ \ | | | | | | | | | | |   | ' /
|  __/ ___ \| |_| | |_| | |_| | |___| . \
|_| /_/   \_\____/|____/ \___/ \____|_|\_\

  Race-day bet decision and execution engine
  v0.1.0
"#;

#[derive(Parser)]
#[command(name = "paddock", about = "Automated horse racing betting engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the execution loop for one race day.
    Start {
        /// Race date (YYYY-MM-DD). Defaults to today.
        date: Option<NaiveDate>,
        /// Bankroll in GBP; sets the staking unit when the config leaves
        /// `unit_value_gbp` unset (1 unit = 1% of bankroll).
        #[arg(default_value_t = 100.0)]
        bankroll: f64,
        /// Transmit bets to the exchange. Without this flag every placement
        /// is a dry run.
        #[arg(long)]
        live: bool,
    },
    /// Ask a running loop to finish its cycle and exit.
    Stop,
    /// Summarise the day's decision log.
    Status {
        /// Race date (YYYY-MM-DD). Defaults to today.
        date: Option<NaiveDate>,
    },
}

/// Per-day file locations under the data directory.
struct RunPaths {
    prices: PathBuf,
    decisions: PathBuf,
    stop_flag: PathBuf,
}

impl RunPaths {
    fn for_date(data_dir: &str, date: NaiveDate) -> Self {
        let dir = Path::new(data_dir);
        Self {
            prices: dir.join(format!("prices_{date}.csv")),
            decisions: dir.join(format!("decisions_{date}.csv")),
            stop_flag: dir.join("stop.request"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;
    init_logging();

    match cli.command {
        Command::Start {
            date,
            bankroll,
            live,
        } => start(&cfg, date.unwrap_or_else(today), bankroll, live).await,
        Command::Stop => stop(&cfg),
        Command::Status { date } => status(&cfg, date.unwrap_or_else(today)),
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

// ---------------------------------------------------------------------------
// start
// ---------------------------------------------------------------------------

async fn start(cfg: &AppConfig, date: NaiveDate, bankroll: f64, live: bool) -> Result<()> {
    if bankroll <= 0.0 {
        bail!("Bankroll must be positive, got {bankroll}");
    }

    println!("{BANNER}");
    let unit_value_gbp = cfg.staking.unit_value_gbp.unwrap_or(bankroll * 0.01);
    info!(
        bot = %cfg.bot.name,
        date = %date,
        live,
        mode = %cfg.bot.mode,
        bankroll = format!("£{bankroll:.2}"),
        unit = format!("£{unit_value_gbp:.2}"),
        poll_secs = cfg.bot.poll_interval_secs,
        "Starting race day"
    );

    let paths = RunPaths::for_date(&cfg.paths.data_dir, date);
    // A stale stop request must not kill the fresh run.
    if paths.stop_flag.exists() {
        std::fs::remove_file(&paths.stop_flag)
            .with_context(|| format!("Failed to clear stop flag: {}", paths.stop_flag.display()))?;
    }

    let selections = CsvSelectionSource::new(&cfg.paths.selections_file).load(date)?;
    if selections.is_empty() {
        info!(date = %date, "No selections for this date, nothing to do");
        return Ok(());
    }

    let client = BetfairClient::from_config(&cfg.exchange)
        .context("Failed to build exchange client")?;

    let pipeline = ScoringPipeline::new(
        EdgeScorer::new(cfg.bot.commission),
        cfg.gates.resolve()?,
        StakeSizer::new(StakeConfig {
            kelly_fraction: cfg.staking.kelly_fraction,
            max_stake_per_bet: cfg.staking.max_stake_per_bet,
            favorite_odds_threshold: cfg.staking.favorite_odds_threshold,
            max_stake_favorite: cfg.staking.max_stake_favorite,
            commission: cfg.bot.commission,
        }),
        cfg.staking.policy,
    );

    let risk = RiskController::new(RiskConfig {
        max_bets_per_race: cfg.risk.max_bets_per_race,
        max_stake_per_race: cfg.risk.max_stake_per_race,
        max_daily_stake: cfg.risk.max_daily_stake,
        max_daily_loss: cfg.risk.max_daily_loss,
        min_liquidity_gbp: cfg.risk.min_liquidity_gbp,
    });

    let engine_config = EngineConfig {
        poll_interval_secs: cfg.bot.poll_interval_secs,
        window: cfg.window,
        max_drift: cfg.bot.max_drift,
        post_race_linger_mins: cfg.bot.post_race_linger_mins,
        mode: cfg.bot.mode,
        live,
        unit_value_gbp,
        stop_flag: Some(paths.stop_flag.clone()),
    };

    let mut engine = ExecutionLoop::new(
        engine_config,
        client,
        pipeline,
        risk,
        Box::new(CsvDecisionSink::new(&paths.decisions)),
        Box::new(CsvPriceLog::new(&paths.prices)),
        selections,
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    engine.run(shutdown).await
}

// ---------------------------------------------------------------------------
// stop / status
// ---------------------------------------------------------------------------

fn stop(cfg: &AppConfig) -> Result<()> {
    let flag = Path::new(&cfg.paths.data_dir).join("stop.request");
    if let Some(parent) = flag.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&flag, chrono::Local::now().to_rfc3339())
        .with_context(|| format!("Failed to write stop flag: {}", flag.display()))?;
    println!("Stop requested: {}", flag.display());
    Ok(())
}

fn status(cfg: &AppConfig, date: NaiveDate) -> Result<()> {
    let paths = RunPaths::for_date(&cfg.paths.data_dir, date);
    let records = sink::load_decisions(&paths.decisions)?;

    if records.is_empty() {
        println!("{date}: no decisions recorded");
        return Ok(());
    }

    let placed = records.iter().filter(|r| r.decision == Decision::Placed).count();
    let skipped = records.iter().filter(|r| r.decision == Decision::Skipped).count();
    let failed = records.iter().filter(|r| r.decision == Decision::Failed).count();
    let staked: f64 = records
        .iter()
        .filter(|r| r.decision == Decision::Placed)
        .map(|r| r.stake)
        .sum();

    println!("{date}: {} decisions", records.len());
    println!("  placed:  {placed} (£{staked:.2} staked)");
    println!("  skipped: {skipped}");
    println!("  failed:  {failed}");
    for rec in &records {
        println!(
            "  {} {} {} — {} {}",
            rec.race_time.format("%H:%M"),
            rec.course,
            rec.horse,
            rec.decision,
            rec.reason
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paddock=info"));

    if std::env::var("PADDOCK_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
