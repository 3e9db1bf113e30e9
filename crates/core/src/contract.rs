//! Contract reference data: multiplier, margin rate and fee schedule.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{ContractCode, Offset};

/// Exchanges that keep today and yesterday lots apart.
pub const TODAY_SENSITIVE_EXCHANGES: &[&str] = &["SHFE"];

/// Whether `code`'s venue distinguishes today from yesterday lots.
pub fn distinguishes_today(code: &ContractCode) -> bool {
    TODAY_SENSITIVE_EXCHANGES.contains(&code.exchange())
}

/// Reference data for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    /// Contract code.
    pub code: ContractCode,
    /// Contract multiplier (units per lot).
    pub multiplier: f64,
    /// Margin rate as a fraction of notional.
    pub margin_rate: f64,
    /// Fixed fee per lot when opening or closing yesterday lots.
    #[serde(default)]
    pub open_fee_per_lot: f64,
    /// Fee rate on notional when opening or closing yesterday lots.
    #[serde(default)]
    pub open_fee_rate: f64,
    /// Fixed fee per lot when closing today lots.
    #[serde(default)]
    pub close_today_fee_per_lot: f64,
    /// Fee rate on notional when closing today lots.
    #[serde(default)]
    pub close_today_fee_rate: f64,
}

impl ContractInfo {
    /// Fee charged for one lot traded at `price`.
    pub fn fee(&self, price: f64, offset: Offset, is_today: bool) -> f64 {
        let (per_lot, rate) = match (offset, is_today) {
            (Offset::Close, true) => (self.close_today_fee_per_lot, self.close_today_fee_rate),
            _ => (self.open_fee_per_lot, self.open_fee_rate),
        };
        per_lot + rate * price * self.multiplier
    }

    /// Margin required for `volume` lots at `price`.
    #[inline]
    pub fn margin(&self, volume: u32, price: f64) -> f64 {
        volume as f64 * price * self.multiplier * self.margin_rate
    }

    /// Whether the venue distinguishes today from yesterday lots.
    pub fn distinguishes_today(&self) -> bool {
        distinguishes_today(&self.code)
    }
}

/// Read-only contract lookup.
pub trait ContractProvider {
    /// Reference data for `code`, if known.
    fn get_contract(&self, code: &ContractCode) -> Option<&ContractInfo>;
}

/// In-memory contract table.
#[derive(Debug, Clone, Default)]
pub struct ContractTable {
    contracts: HashMap<ContractCode, ContractInfo>,
}

impl ContractTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a contract.
    pub fn insert(&mut self, info: ContractInfo) {
        self.contracts.insert(info.code.clone(), info);
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl FromIterator<ContractInfo> for ContractTable {
    fn from_iter<I: IntoIterator<Item = ContractInfo>>(iter: I) -> Self {
        let mut table = ContractTable::new();
        for info in iter {
            table.insert(info);
        }
        table
    }
}

impl ContractProvider for ContractTable {
    fn get_contract(&self, code: &ContractCode) -> Option<&ContractInfo> {
        self.contracts.get(code)
    }
}
