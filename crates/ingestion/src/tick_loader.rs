//! Tick sources.
//!
//! Loads one contract's snapshots for one trading day and appends them to a
//! caller-owned buffer, preserving source order.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use ticksim_core::{ContractCode, Level, Result, Tick, TradingDay, Volume};
use tracing::{debug, warn};

/// Datetime format of the `datetime` column.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Anything that can produce a contract's ticks for a trading day.
pub trait TickSource {
    /// Append the ticks of `code` on `trading_day` to `out`.
    ///
    /// Returns how many ticks were appended.
    fn load_tick(&mut self, out: &mut Vec<Tick>, code: &ContractCode, trading_day: TradingDay)
        -> Result<usize>;
}

/// One CSV row.
#[derive(Debug, Deserialize)]
struct TickRow {
    datetime: String,
    tick: u32,
    price: f64,
    volume: u64,
    bid_price1: f64,
    bid_volume1: Volume,
    bid_price2: f64,
    bid_volume2: Volume,
    bid_price3: f64,
    bid_volume3: Volume,
    bid_price4: f64,
    bid_volume4: Volume,
    bid_price5: f64,
    bid_volume5: Volume,
    ask_price1: f64,
    ask_volume1: Volume,
    ask_price2: f64,
    ask_volume2: Volume,
    ask_price3: f64,
    ask_volume3: Volume,
    ask_price4: f64,
    ask_volume4: Volume,
    ask_price5: f64,
    ask_volume5: Volume,
}

impl TickRow {
    fn into_tick(self, code: &ContractCode, trading_day: TradingDay) -> Option<Tick> {
        let time = NaiveDateTime::parse_from_str(&self.datetime, DATETIME_FORMAT)
            .ok()?
            .and_utc()
            .timestamp();

        // Unpublished levels come through as zero prices.
        let levels = |pairs: [(f64, Volume); 5]| -> Vec<Level> {
            pairs
                .into_iter()
                .take_while(|(price, _)| *price > 0.0)
                .map(|(price, volume)| Level { price, volume })
                .collect()
        };

        Some(Tick {
            code: code.clone(),
            time,
            tick_index: self.tick,
            price: self.price,
            volume: self.volume,
            trading_day,
            bids: levels([
                (self.bid_price1, self.bid_volume1),
                (self.bid_price2, self.bid_volume2),
                (self.bid_price3, self.bid_volume3),
                (self.bid_price4, self.bid_volume4),
                (self.bid_price5, self.bid_volume5),
            ]),
            asks: levels([
                (self.ask_price1, self.ask_volume1),
                (self.ask_price2, self.ask_volume2),
                (self.ask_price3, self.ask_volume3),
                (self.ask_price4, self.ask_volume4),
                (self.ask_price5, self.ask_volume5),
            ]),
        })
    }
}

/// Reads `{root}/{trading_day}/{code}.csv`.
pub struct CsvTickLoader {
    root: PathBuf,
}

impl CsvTickLoader {
    /// Create a loader over a data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File holding `code`'s ticks for `trading_day`.
    pub fn file_path(&self, code: &ContractCode, trading_day: TradingDay) -> PathBuf {
        self.root
            .join(trading_day.to_string())
            .join(format!("{code}.csv"))
    }

    fn read_file(
        path: &Path,
        out: &mut Vec<Tick>,
        code: &ContractCode,
        trading_day: TradingDay,
    ) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let before = out.len();
        for (line, row) in reader.deserialize::<TickRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(%code, line = line + 2, error = %e, "skipping malformed tick row");
                    continue;
                }
            };
            match row.into_tick(code, trading_day) {
                Some(tick) => out.push(tick),
                None => warn!(%code, line = line + 2, "skipping tick row with bad datetime"),
            }
        }
        Ok(out.len() - before)
    }
}

impl TickSource for CsvTickLoader {
    fn load_tick(
        &mut self,
        out: &mut Vec<Tick>,
        code: &ContractCode,
        trading_day: TradingDay,
    ) -> Result<usize> {
        let path = self.file_path(code, trading_day);
        if !path.exists() {
            warn!(%code, trading_day, path = %path.display(), "no tick file for contract");
            return Ok(0);
        }
        let count = Self::read_file(&path, out, code, trading_day)?;
        debug!(%code, trading_day, count, "loaded ticks");
        Ok(count)
    }
}

/// Tick source over ticks already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTickSource {
    ticks: HashMap<(ContractCode, TradingDay), Vec<Tick>>,
}

impl MemoryTickSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tick under its own contract and trading day.
    pub fn push(&mut self, tick: Tick) {
        self.ticks
            .entry((tick.code.clone(), tick.trading_day))
            .or_default()
            .push(tick);
    }
}

impl TickSource for MemoryTickSource {
    fn load_tick(
        &mut self,
        out: &mut Vec<Tick>,
        code: &ContractCode,
        trading_day: TradingDay,
    ) -> Result<usize> {
        let ticks = match self.ticks.get(&(code.clone(), trading_day)) {
            Some(ticks) => ticks,
            None => return Ok(0),
        };
        out.extend(ticks.iter().cloned());
        Ok(ticks.len())
    }
}
