//! Configuration structures for the tick simulator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{ContractCode, TradingDay};

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Simulated exchange configuration.
    pub simulator: SimulatorConfig,
    /// What to replay.
    pub replay: ReplayConfig,
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML configuration string.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::config(format!("failed to parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulator;
        if !sim.initial_capital.is_finite() || sim.initial_capital < 0.0 {
            return Err(Error::config("initial_capital must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&sim.compulsory_factor) {
            return Err(Error::config("compulsory_factor must be within [0, 1]"));
        }
        if self.replay.codes.is_empty() {
            return Err(Error::config("replay.codes must name at least one contract"));
        }
        Ok(())
    }
}

/// Tick loader backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    #[default]
    Csv,
}

/// Simulated exchange configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Cash the account starts with.
    pub initial_capital: f64,
    /// Path to the contract reference CSV.
    pub contract_config: PathBuf,
    /// Pacing interval per step, in microseconds.
    pub interval: u64,
    /// Fraction of frozen margin below which forced liquidation would trigger.
    pub compulsory_factor: f64,
    /// Tick loader backend.
    pub loader_type: LoaderType,
    /// Root directory of the CSV tick files.
    pub csv_data_path: PathBuf,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            contract_config: PathBuf::from("contracts.csv"),
            interval: 1,
            compulsory_factor: 0.8,
            loader_type: LoaderType::Csv,
            csv_data_path: PathBuf::from("data"),
        }
    }
}

/// Replay selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Subscribed contracts.
    pub codes: Vec<ContractCode>,
    /// Trading days to play, in order.
    pub trading_days: Vec<TradingDay>,
}
