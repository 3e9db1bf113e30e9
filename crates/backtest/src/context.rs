//! Strategy-facing request queue.
//!
//! Strategies never touch the ledger or the working-order set. They enqueue
//! place/cancel/settle requests which the simulator drains at the commit
//! point of the step.

use std::collections::HashSet;
use ticksim_core::{
    Account, ContractCode, Direction, Offset, Order, OrderFlag, OrderId, Position, Timestamp,
    TradingDay, Volume,
};
use tracing::{debug, warn};

use crate::events::ExchangeEvent;
use crate::ledger::Ledger;
use crate::matching::{MatchState, WorkingOrders};

/// A request waiting for the commit point.
#[derive(Debug, Clone)]
pub enum Request {
    Place(Order),
    Cancel(OrderId),
    Settle,
}

/// Requests accepted since the last commit, plus the id clock.
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: Vec<Request>,
    pending_cancels: HashSet<OrderId>,
    time: Timestamp,
    tick_index: u32,
    sequence: u32,
    /// Orders placed at the current instant.
    placed_at_instant: u32,
}

/// Orders that fit in one instant before the 16-bit id sequence repeats.
const MAX_ORDERS_PER_INSTANT: u32 = 0x1_0000;

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the simulated instant stamped on new orders.
    pub fn set_clock(&mut self, time: Timestamp, tick_index: u32) {
        if (time, tick_index) != (self.time, self.tick_index) {
            self.placed_at_instant = 0;
        }
        self.time = time;
        self.tick_index = tick_index;
    }

    /// Simulated instant of the last published tick.
    pub fn clock(&self) -> (Timestamp, u32) {
        (self.time, self.tick_index)
    }

    /// Enqueue a new order and return its id.
    ///
    /// Returns `None` for a zero volume, or once the instant has used up
    /// every distinct id.
    pub fn place(
        &mut self,
        offset: Offset,
        direction: Direction,
        code: ContractCode,
        count: Volume,
        price: f64,
        flag: OrderFlag,
    ) -> Option<OrderId> {
        if count == 0 {
            debug!(%code, "ignoring zero-volume order");
            return None;
        }
        if self.placed_at_instant >= MAX_ORDERS_PER_INSTANT {
            warn!(
                %code,
                time = self.time,
                tick_index = self.tick_index,
                "order ids exhausted for this instant, order refused"
            );
            return None;
        }
        self.placed_at_instant += 1;
        self.sequence = self.sequence.wrapping_add(1);
        let id = OrderId::pack(self.time, self.tick_index, self.sequence);
        debug!(order_id = %id, %code, ?offset, ?direction, count, price, ?flag, "place_order");
        self.pending.push(Request::Place(Order {
            id,
            code,
            offset,
            direction,
            price,
            total_volume: count,
            remaining_volume: count,
            create_time: self.time,
            flag,
        }));
        Some(id)
    }

    /// Enqueue a cancel for a resting order.
    ///
    /// Returns false when the order is unknown, not yet admitted, already
    /// canceled, or already has a cancel queued.
    pub fn cancel(&mut self, id: OrderId, orders: &WorkingOrders) -> bool {
        if orders.state(id) != Some(MatchState::Resting) || !self.pending_cancels.insert(id) {
            return false;
        }
        debug!(order_id = %id, "cancel_order");
        self.pending.push(Request::Cancel(id));
        true
    }

    /// Ask for a `SettlementCompleted` acknowledgement at the next commit.
    pub fn settle(&mut self) {
        self.pending.push(Request::Settle);
    }

    /// Take every queued request, oldest first.
    pub fn drain(&mut self) -> Vec<Request> {
        self.pending_cancels.clear();
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// What an event handler sees while handling one event.
pub struct TradingContext<'a> {
    pub(crate) requests: &'a mut RequestQueue,
    pub(crate) ledger: &'a Ledger,
    pub(crate) orders: &'a WorkingOrders,
    pub(crate) trading_day: TradingDay,
}

impl<'a> TradingContext<'a> {
    /// Submit an order. Price 0 means market.
    pub fn place_order(
        &mut self,
        offset: Offset,
        direction: Direction,
        code: ContractCode,
        count: Volume,
        price: f64,
        flag: OrderFlag,
    ) -> Option<OrderId> {
        self.requests
            .place(offset, direction, code, count, price, flag)
    }

    /// Request a cancel. Returns whether a cancel was actually issued.
    pub fn cancel_order(&mut self, id: OrderId) -> bool {
        self.requests.cancel(id, self.orders)
    }

    /// Request a settlement acknowledgement.
    pub fn submit_settlement(&mut self) {
        self.requests.settle();
    }

    pub fn account(&self) -> &Account {
        self.ledger.account()
    }

    pub fn position(&self, code: &ContractCode) -> Position {
        self.ledger.position_snapshot(code)
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.order(id)
    }

    pub fn trading_day(&self) -> TradingDay {
        self.trading_day
    }

    /// Simulated time of the last published tick.
    pub fn last_tick_time(&self) -> Timestamp {
        self.requests.clock().0
    }
}

/// Receives exchange events synchronously, in emission order.
pub trait EventHandler {
    fn on_event(&mut self, event: &ExchangeEvent, ctx: &mut TradingContext<'_>);
}

impl<F> EventHandler for F
where
    F: FnMut(&ExchangeEvent, &mut TradingContext<'_>),
{
    fn on_event(&mut self, event: &ExchangeEvent, ctx: &mut TradingContext<'_>) {
        self(event, ctx)
    }
}
