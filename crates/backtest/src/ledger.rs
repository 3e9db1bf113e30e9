//! Position and margin ledger.
//!
//! Authoritative per-contract lots and account cash. Only the matching engine
//! and settlement mutate it, and every operation either applies fully or
//! leaves the ledger untouched.

use std::collections::BTreeMap;
use ticksim_core::contract::distinguishes_today;
use ticksim_core::{
    Account, ContractCode, ContractProvider, Direction, Offset, Order, Position, RejectCode,
    Volume,
};
use tracing::{error, warn};

/// Cash effect of one fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DealOutcome {
    /// Fee charged for the fill.
    pub fee: f64,
    /// Realized P&L (closes only).
    pub realized_pnl: f64,
    /// False when an open fill was dropped because cash could not cover the
    /// fee. The dropped lots' margin is released, nothing else changes.
    pub applied: bool,
}

/// Position and account ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    account: Account,
    positions: BTreeMap<ContractCode, Position>,
}

impl Ledger {
    /// Create a ledger seeded with initial capital.
    pub fn new(initial_capital: f64) -> Self {
        Self {
            account: Account::with_capital(initial_capital),
            positions: BTreeMap::new(),
        }
    }

    /// Current account state.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Position for a contract, if one was ever opened.
    pub fn position(&self, code: &ContractCode) -> Option<&Position> {
        self.positions.get(code)
    }

    /// Position snapshot, empty for unknown contracts.
    pub fn position_snapshot(&self, code: &ContractCode) -> Position {
        self.positions
            .get(code)
            .cloned()
            .unwrap_or_else(|| Position::new(code.clone()))
    }

    /// All non-empty positions.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.is_empty())
    }

    /// Decide which lot a close order of `volume` lots draws from.
    ///
    /// Yesterday lots are used when they alone can cover the order.
    pub fn close_is_today(&self, code: &ContractCode, direction: Direction, volume: Volume) -> bool {
        match self.positions.get(code) {
            Some(pos) => pos.lot(direction, false).usable() < volume,
            None => true,
        }
    }

    /// Reserve what an order needs before it may rest.
    ///
    /// Opens freeze margin at the order price; closes freeze lots in the lot
    /// selected by `is_today`.
    pub fn frozen_deduction(
        &mut self,
        order: &Order,
        is_today: bool,
        contracts: &dyn ContractProvider,
    ) -> Result<(), RejectCode> {
        let Some(info) = contracts.get_contract(&order.code) else {
            error!(code = %order.code, "frozen_deduction: no contract info");
            return Err(RejectCode::ContractNotFound);
        };
        match order.offset {
            Offset::Open => {
                let required = info.margin(order.remaining_volume, order.price);
                if required + self.account.frozen_margin > self.account.cash {
                    return Err(RejectCode::InsufficientMargin);
                }
                self.account.frozen_margin += required;
                Ok(())
            }
            Offset::Close => {
                let Some(pos) = self.positions.get_mut(&order.code) else {
                    return Err(RejectCode::InsufficientPosition);
                };
                let lot = pos.lot_mut(order.direction, is_today);
                if lot.usable() < order.remaining_volume {
                    return Err(RejectCode::InsufficientPosition);
                }
                lot.frozen += order.remaining_volume;
                Ok(())
            }
        }
    }

    /// Move an admitted order's reservation to `new_price`.
    ///
    /// Opens freeze or release the margin difference for the unfilled lots;
    /// closes hold lots, not margin, and are unaffected. On rejection the
    /// old reservation stays in place.
    pub fn reprice(
        &mut self,
        order: &Order,
        new_price: f64,
        contracts: &dyn ContractProvider,
    ) -> Result<(), RejectCode> {
        let Some(info) = contracts.get_contract(&order.code) else {
            error!(code = %order.code, "reprice: no contract info");
            return Err(RejectCode::ContractNotFound);
        };
        if order.offset == Offset::Close {
            return Ok(());
        }
        let delta = info.margin(order.remaining_volume, new_price)
            - info.margin(order.remaining_volume, order.price);
        if delta > 0.0 && self.account.frozen_margin + delta > self.account.cash {
            return Err(RejectCode::InsufficientMargin);
        }
        self.account.frozen_margin = (self.account.frozen_margin + delta).max(0.0);
        Ok(())
    }

    /// Release what `volume` unfilled lots of an order were holding.
    pub fn thawing_deduction(
        &mut self,
        order: &Order,
        volume: Volume,
        is_today: bool,
        contracts: &dyn ContractProvider,
    ) -> Result<(), RejectCode> {
        let Some(info) = contracts.get_contract(&order.code) else {
            error!(code = %order.code, "thawing_deduction: no contract info");
            return Err(RejectCode::ContractNotFound);
        };
        match order.offset {
            Offset::Open => {
                let delta = info.margin(volume, order.price);
                self.release_margin(delta);
            }
            Offset::Close => {
                if let Some(pos) = self.positions.get_mut(&order.code) {
                    let lot = pos.lot_mut(order.direction, is_today);
                    lot.frozen = lot.frozen.saturating_sub(volume);
                }
            }
        }
        Ok(())
    }

    /// Realize a fill of `volume` lots at the order price.
    pub fn order_deal(
        &mut self,
        order: &Order,
        volume: Volume,
        is_today: bool,
        contracts: &dyn ContractProvider,
    ) -> Result<DealOutcome, RejectCode> {
        let Some(info) = contracts.get_contract(&order.code) else {
            error!(code = %order.code, "order_deal: no contract info");
            return Err(RejectCode::ContractNotFound);
        };
        let fee = volume as f64 * info.fee(order.price, order.offset, is_today);
        let pos = self
            .positions
            .entry(order.code.clone())
            .or_insert_with(|| Position::new(order.code.clone()));

        match order.offset {
            Offset::Open => {
                if self.account.cash < fee {
                    warn!(
                        order_id = %order.id,
                        volume,
                        fee,
                        cash = self.account.cash,
                        "open fill dropped: cash cannot cover fee"
                    );
                    self.release_margin(info.margin(volume, order.price));
                    return Ok(DealOutcome {
                        fee: 0.0,
                        realized_pnl: 0.0,
                        applied: false,
                    });
                }
                let lot = pos.lot_mut(order.direction, true);
                let total = lot.quantity + volume;
                lot.price = (lot.price * lot.quantity as f64 + order.price * volume as f64)
                    / total as f64;
                lot.quantity = total;
                self.account.cash -= fee;
                Ok(DealOutcome {
                    fee,
                    realized_pnl: 0.0,
                    applied: true,
                })
            }
            Offset::Close => {
                let lot = pos.lot_mut(order.direction, is_today);
                let realized_pnl = volume as f64
                    * (order.price - lot.price)
                    * info.multiplier
                    * order.direction.sign();
                let released = info.margin(volume, lot.price);
                lot.quantity = lot.quantity.saturating_sub(volume);
                lot.frozen = lot.frozen.saturating_sub(volume);
                if lot.quantity == 0 {
                    lot.clear();
                }
                self.account.cash += realized_pnl - fee;
                self.release_margin(released);
                Ok(DealOutcome {
                    fee,
                    realized_pnl,
                    applied: true,
                })
            }
        }
    }

    /// Seed a carried position, freezing the margin its lots occupy.
    pub fn restore(&mut self, position: Position, contracts: &dyn ContractProvider) {
        match contracts.get_contract(&position.code) {
            Some(info) => {
                let margin = [
                    &position.today_long,
                    &position.today_short,
                    &position.yesterday_long,
                    &position.yesterday_short,
                ]
                .iter()
                .map(|lot| info.margin(lot.quantity, lot.price))
                .sum::<f64>();
                self.account.frozen_margin += margin;
            }
            None => error!(code = %position.code, "restore: no contract info, margin not frozen"),
        }
        self.positions.insert(position.code.clone(), position);
    }

    /// Roll lots over a trading-day boundary.
    ///
    /// On venues that keep today and yesterday apart, yesterday lots are
    /// dropped (releasing their margin) and today lots become yesterday lots.
    /// Returns every non-empty position on such a venue, including ones that
    /// held only today lots, since moving those lots changes the position too.
    /// Call only once no order holds frozen lots.
    pub fn crossday_roll(&mut self, contracts: &dyn ContractProvider) -> Vec<ContractCode> {
        let mut changed = Vec::new();
        let mut released = 0.0;
        for (code, pos) in self.positions.iter_mut() {
            if !distinguishes_today(code) || pos.is_empty() {
                continue;
            }
            match contracts.get_contract(code) {
                Some(info) => {
                    released += info.margin(pos.yesterday_long.quantity, pos.yesterday_long.price);
                    released +=
                        info.margin(pos.yesterday_short.quantity, pos.yesterday_short.price);
                }
                None => error!(%code, "crossday_roll: no contract info, margin kept"),
            }
            pos.yesterday_long = pos.today_long;
            pos.yesterday_short = pos.today_short;
            pos.yesterday_long.frozen = 0;
            pos.yesterday_short.frozen = 0;
            pos.today_long.clear();
            pos.today_short.clear();
            changed.push(code.clone());
        }
        self.release_margin(released);
        changed
    }

    fn release_margin(&mut self, amount: f64) {
        self.account.frozen_margin = (self.account.frozen_margin - amount).max(0.0);
    }
}
