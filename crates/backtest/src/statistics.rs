//! Order statistics and the per-trading-day flow record.

use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;
use ticksim_core::{Account, ContractCode, TradingDay};

use crate::events::ExchangeEvent;

/// Order counters for one contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrderStatistics {
    /// Orders submitted.
    pub place_order_amount: u32,
    /// Orders admitted by the ledger.
    pub entrust_amount: u32,
    /// Orders fully filled.
    pub trade_amount: u32,
    /// Orders canceled, by request, FAK/FOK or settlement.
    pub cancel_amount: u32,
    /// Orders rejected.
    pub error_amount: u32,
}

impl AddAssign for OrderStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.place_order_amount += rhs.place_order_amount;
        self.entrust_amount += rhs.entrust_amount;
        self.trade_amount += rhs.trade_amount;
        self.cancel_amount += rhs.cancel_amount;
        self.error_amount += rhs.error_amount;
    }
}

/// Counts order lifecycle events per contract.
#[derive(Debug, Clone, Default)]
pub struct StatisticsRecorder {
    per_contract: BTreeMap<ContractCode, OrderStatistics>,
}

impl StatisticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a committed order submission.
    pub fn record_place(&mut self, code: &ContractCode) {
        self.entry(code).place_order_amount += 1;
    }

    /// Count an emitted event. Events that are not order outcomes are ignored.
    pub fn record(&mut self, event: &ExchangeEvent) {
        match event {
            ExchangeEvent::OrderPlaced(order) => self.entry(&order.code).entrust_amount += 1,
            ExchangeEvent::OrderFullyFilled { code, .. } => self.entry(code).trade_amount += 1,
            ExchangeEvent::OrderCanceled { code, .. } => self.entry(code).cancel_amount += 1,
            ExchangeEvent::OrderRejected { code, .. } => self.entry(code).error_amount += 1,
            _ => {}
        }
    }

    pub fn get(&self, code: &ContractCode) -> OrderStatistics {
        self.per_contract.get(code).copied().unwrap_or_default()
    }

    /// Sum over every contract.
    pub fn total(&self) -> OrderStatistics {
        let mut total = OrderStatistics::default();
        for stats in self.per_contract.values() {
            total += *stats;
        }
        total
    }

    pub fn per_contract(&self) -> &BTreeMap<ContractCode, OrderStatistics> {
        &self.per_contract
    }

    pub fn clear(&mut self) {
        self.per_contract.clear();
    }

    fn entry(&mut self, code: &ContractCode) -> &mut OrderStatistics {
        self.per_contract.entry(code.clone()).or_default()
    }
}

/// Summary of one played trading day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyFlow {
    pub trading_day: TradingDay,
    /// Summed over every contract.
    pub statistics: OrderStatistics,
    pub per_contract: BTreeMap<ContractCode, OrderStatistics>,
    pub cash: f64,
    pub frozen_margin: f64,
}

impl DailyFlow {
    pub fn new(trading_day: TradingDay, recorder: &StatisticsRecorder, account: &Account) -> Self {
        Self {
            trading_day,
            statistics: recorder.total(),
            per_contract: recorder.per_contract().clone(),
            cash: account.cash,
            frozen_margin: account.frozen_margin,
        }
    }
}
