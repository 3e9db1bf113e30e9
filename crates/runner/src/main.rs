//! Replays recorded tick data through the simulated exchange.
//!
//! Usage:
//!   ticksim --config ticksim.toml
//!   ticksim --config ticksim.toml --day 20230301 --day 20230302

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use ticksim_backtest::{ExchangeEvent, EventHandler, TickSimulator, TradingContext};
use ticksim_core::config::LoaderType;
use ticksim_core::{Config, TradingDay};
use ticksim_ingestion::{load_contracts, CsvTickLoader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ticksim")]
#[command(about = "Tick-level backtesting exchange")]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = "ticksim.toml")]
    config: PathBuf,

    /// Trading days to play, overriding `replay.trading_days`
    #[arg(long = "day")]
    days: Vec<TradingDay>,
}

/// Logs the order lifecycle. Places no orders.
#[derive(Debug, Default)]
struct LoggingHandler {
    ticks: u64,
}

impl EventHandler for LoggingHandler {
    fn on_event(&mut self, event: &ExchangeEvent, ctx: &mut TradingContext<'_>) {
        match event {
            ExchangeEvent::LoadFinished {
                account,
                orders,
                positions,
            } => info!(
                trading_day = ctx.trading_day(),
                cash = account.cash,
                orders = orders.len(),
                positions = positions.len(),
                "load finished"
            ),
            ExchangeEvent::TickReceived(_) => self.ticks += 1,
            ExchangeEvent::OrderRejected {
                order_id, reason, ..
            } => warn!(%order_id, %reason, "order rejected"),
            ExchangeEvent::AccountChanged(account) => debug!(
                cash = account.cash,
                frozen_margin = account.frozen_margin,
                "account changed"
            ),
            other => debug!(event = other.name(), order_id = ?other.order_id(), "exchange event"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let sim_config = config.simulator.clone();

    let contracts = load_contracts(&sim_config.contract_config).with_context(|| {
        format!(
            "failed to load contracts from {}",
            sim_config.contract_config.display()
        )
    })?;
    let source = match sim_config.loader_type {
        LoaderType::Csv => CsvTickLoader::new(&sim_config.csv_data_path),
    };

    let days = if args.days.is_empty() {
        config.replay.trading_days.clone()
    } else {
        args.days.clone()
    };
    if days.is_empty() {
        bail!("no trading days to play");
    }

    let mut simulator = TickSimulator::new(sim_config, source, contracts);
    simulator.subscribe(config.replay.codes.iter().cloned());
    info!(
        contracts = config.replay.codes.len(),
        days = days.len(),
        "starting replay"
    );

    let mut handler = LoggingHandler::default();
    for day in days {
        let flow = simulator
            .play(day, &mut handler)
            .with_context(|| format!("failed to play trading day {day}"))?;
        println!("{}", serde_json::to_string(&flow)?);
    }
    info!(ticks = handler.ticks, "replay finished");
    Ok(())
}
