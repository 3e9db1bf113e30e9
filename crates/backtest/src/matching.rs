//! Matching engine.
//!
//! Decides, per tick, what happens to every working order of the tick's
//! contract: admission, queue advance, fill, or cancel. Ledger effects are
//! applied before the event that reports them is pushed.

use std::collections::HashMap;
use ticksim_core::{
    ContractCode, ContractProvider, Offset, Order, OrderFlag, OrderId, Side, Tick, Volume,
};
use tracing::{debug, error};

use crate::events::{ExchangeEvent, RejectKind};
use crate::ledger::Ledger;
use crate::queue::{advance_seat, seed_seat};

/// Lifecycle state of a working order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Committed but not yet checked against the ledger.
    PendingAdmission,
    /// Admitted and holding its reservation.
    Resting,
    /// Cancel requested, released on the next matching tick.
    Canceled,
}

/// An order plus the simulation-only state attached to it.
#[derive(Debug, Clone)]
pub struct WorkingOrder {
    pub order: Order,
    pub state: MatchState,
    /// Estimated volume queued ahead at the order's price.
    pub queue_seat: i64,
    /// Close orders: whether today lots are drawn. Always true for opens.
    pub is_today: bool,
    /// Submitted at market and not yet matched. The admission price only
    /// sizes the reservation; the first resting tick prices the order again.
    pub market: bool,
}

/// Working orders, keyed by id and grouped by contract in arrival order.
#[derive(Debug, Clone, Default)]
pub struct WorkingOrders {
    entries: HashMap<OrderId, WorkingOrder>,
    by_code: HashMap<ContractCode, Vec<OrderId>>,
}

impl WorkingOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly committed order awaiting admission.
    ///
    /// Returns false, keeping the existing order, when the id is already
    /// working.
    pub fn insert(&mut self, order: Order, is_today: bool) -> bool {
        let market = order.is_market();
        if self.entries.contains_key(&order.id) {
            error!(order_id = %order.id, "duplicate order id, order dropped");
            return false;
        }
        self.by_code
            .entry(order.code.clone())
            .or_default()
            .push(order.id);
        self.entries.insert(
            order.id,
            WorkingOrder {
                order,
                state: MatchState::PendingAdmission,
                queue_seat: 0,
                is_today,
                market,
            },
        );
        true
    }

    pub fn get(&self, id: OrderId) -> Option<&WorkingOrder> {
        self.entries.get(&id)
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.entries.get(&id).map(|wo| &wo.order)
    }

    pub fn state(&self, id: OrderId) -> Option<MatchState> {
        self.entries.get(&id).map(|wo| wo.state)
    }

    /// Mark a resting order for cancellation.
    ///
    /// Returns false for unknown, pending or already canceled orders.
    pub fn request_cancel(&mut self, id: OrderId) -> bool {
        match self.entries.get_mut(&id) {
            Some(wo) if wo.state == MatchState::Resting => {
                wo.state = MatchState::Canceled;
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every working order, oldest first.
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.entries.values().map(|wo| wo.order.clone()).collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    /// Ids working on `code`, in arrival order.
    pub fn ids_for(&self, code: &ContractCode) -> Vec<OrderId> {
        self.by_code.get(code).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take(&mut self, id: OrderId) -> Option<WorkingOrder> {
        self.entries.remove(&id)
    }

    fn put_back(&mut self, wo: WorkingOrder) {
        self.entries.insert(wo.order.id, wo);
    }

    /// Drop ids that no longer have an entry.
    fn prune(&mut self, code: &ContractCode) {
        let entries = &self.entries;
        if let Some(ids) = self.by_code.get_mut(code) {
            ids.retain(|id| entries.contains_key(id));
            if ids.is_empty() {
                self.by_code.remove(code);
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.by_code.clear();
    }
}

/// Ledger, reference data and event sink for one matching pass.
struct Step<'a> {
    ledger: &'a mut Ledger,
    contracts: &'a dyn ContractProvider,
    events: &'a mut Vec<ExchangeEvent>,
}

impl Step<'_> {
    /// Opposite best price an order would trade against, 0 when absent.
    fn opposite_best(tick: &Tick, side: Side) -> f64 {
        match side {
            Side::Buy => tick.best_ask(),
            Side::Sell => tick.best_bid(),
        }
    }

    fn push_ledger_state(&mut self, wo: &WorkingOrder, position: bool, account: bool) {
        if position {
            self.events.push(ExchangeEvent::PositionChanged(
                self.ledger.position_snapshot(&wo.order.code),
            ));
        }
        if account {
            self.events
                .push(ExchangeEvent::AccountChanged(*self.ledger.account()));
        }
    }

    /// Admission: reserve resources and seed the queue seat. Returns whether
    /// the order keeps working.
    fn admit(&mut self, wo: &mut WorkingOrder, tick: &Tick) -> bool {
        if wo.order.is_market() {
            let price = Self::opposite_best(tick, wo.order.side());
            if price <= 0.0 {
                debug!(order_id = %wo.order.id, "market order with empty opposite book, killed");
                self.push_canceled(wo);
                return false;
            }
            wo.order.price = price;
        }

        match self
            .ledger
            .frozen_deduction(&wo.order, wo.is_today, self.contracts)
        {
            Ok(()) => {
                wo.queue_seat = seed_seat(tick, wo.order.side(), wo.order.price);
                wo.state = MatchState::Resting;
                debug!(
                    order_id = %wo.order.id,
                    price = wo.order.price,
                    seat = wo.queue_seat,
                    "order admitted"
                );
                let is_open = wo.order.offset == Offset::Open;
                self.push_ledger_state(wo, !is_open, is_open);
                self.events.push(ExchangeEvent::OrderPlaced(wo.order.clone()));
                true
            }
            Err(reason) => {
                debug!(order_id = %wo.order.id, %reason, "order rejected");
                self.events.push(ExchangeEvent::OrderRejected {
                    kind: RejectKind::PlaceOrder,
                    order_id: wo.order.id,
                    code: wo.order.code.clone(),
                    reason,
                });
                false
            }
        }
    }

    /// Fill `volume` lots at the order price.
    fn deal(&mut self, wo: &mut WorkingOrder, volume: Volume) {
        let volume = volume.min(wo.order.remaining_volume);
        if volume == 0 {
            return;
        }
        let outcome = match self
            .ledger
            .order_deal(&wo.order, volume, wo.is_today, self.contracts)
        {
            Ok(outcome) => outcome,
            Err(reason) => {
                error!(order_id = %wo.order.id, %reason, "fill skipped");
                return;
            }
        };
        wo.order.remaining_volume -= volume;
        debug!(
            order_id = %wo.order.id,
            volume,
            remaining = wo.order.remaining_volume,
            fee = outcome.fee,
            realized_pnl = outcome.realized_pnl,
            applied = outcome.applied,
            "order filled"
        );

        let order = &wo.order;
        if order.remaining_volume > 0 {
            self.events.push(ExchangeEvent::OrderPartiallyFilled {
                order_id: order.id,
                filled: order.filled_volume(),
                total: order.total_volume,
            });
        } else {
            self.events.push(ExchangeEvent::OrderFullyFilled {
                order_id: order.id,
                code: order.code.clone(),
                offset: order.offset,
                direction: order.direction,
                price: order.price,
                total: order.total_volume,
            });
        }
        self.push_ledger_state(wo, true, true);
    }

    /// Release what the order still holds and report the cancel.
    fn cancel(&mut self, wo: &WorkingOrder) {
        let volume = wo.order.remaining_volume;
        if volume == 0 {
            return;
        }
        match self
            .ledger
            .thawing_deduction(&wo.order, volume, wo.is_today, self.contracts)
        {
            Ok(()) => {
                let is_close = wo.order.offset == Offset::Close;
                self.push_ledger_state(wo, is_close, true);
                self.push_canceled(wo);
            }
            Err(reason) => {
                error!(order_id = %wo.order.id, %reason, "cancel failed");
                self.events.push(ExchangeEvent::OrderRejected {
                    kind: RejectKind::CancelOrder,
                    order_id: wo.order.id,
                    code: wo.order.code.clone(),
                    reason,
                });
            }
        }
    }

    fn push_canceled(&mut self, wo: &WorkingOrder) {
        debug!(order_id = %wo.order.id, volume = wo.order.remaining_volume, "order canceled");
        self.events.push(ExchangeEvent::OrderCanceled {
            order_id: wo.order.id,
            code: wo.order.code.clone(),
            offset: wo.order.offset,
            direction: wo.order.direction,
            price: wo.order.price,
            canceled_volume: wo.order.remaining_volume,
            total: wo.order.total_volume,
        });
    }

    /// Price a market order at the opposite best of the tick it is first
    /// matched on. Returns false when the order was canceled instead.
    fn resolve_market(&mut self, wo: &mut WorkingOrder, tick: &Tick) -> bool {
        let price = Self::opposite_best(tick, wo.order.side());
        if price <= 0.0 {
            debug!(order_id = %wo.order.id, "market order with empty opposite book, canceled");
            self.cancel(wo);
            return false;
        }
        if price == wo.order.price {
            return true;
        }
        match self.ledger.reprice(&wo.order, price, self.contracts) {
            Ok(()) => {
                debug!(
                    order_id = %wo.order.id,
                    from = wo.order.price,
                    to = price,
                    "market order repriced"
                );
                wo.order.price = price;
                if wo.order.offset == Offset::Open {
                    self.push_ledger_state(wo, false, true);
                }
                true
            }
            Err(reason) => {
                debug!(
                    order_id = %wo.order.id,
                    %reason,
                    "market order cannot be repriced, canceled"
                );
                self.cancel(wo);
                false
            }
        }
    }

    /// Match a resting order against `traded` volume. Returns whether the
    /// order keeps working.
    fn execute(&mut self, wo: &mut WorkingOrder, tick: &Tick, traded: Volume) -> bool {
        if wo.market {
            wo.market = false;
            if !self.resolve_market(wo, tick) {
                return false;
            }
        }
        let price = wo.order.price;
        let best = Self::opposite_best(tick, wo.order.side());
        let (crosses, in_range) = match wo.order.side() {
            Side::Buy => (best > 0.0 && price >= best, price >= tick.price),
            Side::Sell => (best > 0.0 && price <= best, price <= tick.price),
        };

        match wo.order.flag {
            OrderFlag::Fok => {
                if crosses && wo.order.remaining_volume <= traded {
                    let volume = wo.order.remaining_volume;
                    self.deal(wo, volume);
                } else {
                    self.cancel(wo);
                    return false;
                }
            }
            OrderFlag::Fak => {
                if crosses {
                    self.deal(wo, traded);
                }
                if wo.order.remaining_volume > 0 {
                    self.cancel(wo);
                    return false;
                }
            }
            OrderFlag::Normal => {
                if crosses {
                    self.deal(wo, traded);
                } else if in_range {
                    let advance = advance_seat(wo.queue_seat, traded);
                    wo.queue_seat = advance.seat;
                    self.deal(wo, advance.fillable);
                }
            }
        }
        wo.order.remaining_volume > 0
    }
}

/// Per-tick fill decisions over the working-order set.
#[derive(Debug, Default)]
pub struct MatchingEngine {
    orders: WorkingOrders,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> &WorkingOrders {
        &self.orders
    }

    pub fn orders_mut(&mut self) -> &mut WorkingOrders {
        &mut self.orders
    }

    /// Run every working order of `tick.code` against the tick.
    ///
    /// `traded` is the contract's volume traded since the previous step.
    pub fn match_tick(
        &mut self,
        tick: &Tick,
        traded: Volume,
        ledger: &mut Ledger,
        contracts: &dyn ContractProvider,
        events: &mut Vec<ExchangeEvent>,
    ) {
        let mut step = Step {
            ledger,
            contracts,
            events,
        };
        for id in self.orders.ids_for(&tick.code) {
            let Some(mut wo) = self.orders.take(id) else {
                continue;
            };
            let keep = match wo.state {
                MatchState::PendingAdmission => step.admit(&mut wo, tick),
                MatchState::Canceled => {
                    step.cancel(&wo);
                    false
                }
                MatchState::Resting => step.execute(&mut wo, tick, traded),
            };
            if keep {
                self.orders.put_back(wo);
            }
        }
        self.orders.prune(&tick.code);
    }

    /// Cancel every working order and empty the set.
    ///
    /// Orders still pending admission hold nothing and are reported as
    /// canceled without touching the ledger.
    pub fn cancel_all(
        &mut self,
        ledger: &mut Ledger,
        contracts: &dyn ContractProvider,
        events: &mut Vec<ExchangeEvent>,
    ) {
        let mut step = Step {
            ledger,
            contracts,
            events,
        };
        for order in self.orders.orders() {
            let Some(wo) = self.orders.take(order.id) else {
                continue;
            };
            match wo.state {
                MatchState::PendingAdmission => step.push_canceled(&wo),
                MatchState::Resting | MatchState::Canceled => step.cancel(&wo),
            }
        }
        self.orders.clear();
    }
}
