//! Events emitted by the simulated exchange.

use serde::{Deserialize, Serialize};
use ticksim_core::{
    Account, ContractCode, Direction, Offset, Order, OrderId, Position, RejectCode, Tick, Volume,
};

/// Which request an `OrderRejected` event answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectKind {
    PlaceOrder,
    CancelOrder,
    Other,
}

/// One observable state change, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExchangeEvent {
    /// Ticks are loaded and the opening settlement is done.
    LoadFinished {
        account: Account,
        orders: Vec<Order>,
        positions: Vec<Position>,
    },
    /// A tick of the current tick group.
    TickReceived(Tick),
    /// Acknowledges a settlement request at the commit barrier.
    SettlementCompleted,
    /// Order admitted and resting.
    OrderPlaced(Order),
    OrderPartiallyFilled {
        order_id: OrderId,
        filled: Volume,
        total: Volume,
    },
    OrderFullyFilled {
        order_id: OrderId,
        code: ContractCode,
        offset: Offset,
        direction: Direction,
        price: f64,
        total: Volume,
    },
    OrderCanceled {
        order_id: OrderId,
        code: ContractCode,
        offset: Offset,
        direction: Direction,
        price: f64,
        canceled_volume: Volume,
        total: Volume,
    },
    OrderRejected {
        kind: RejectKind,
        order_id: OrderId,
        code: ContractCode,
        reason: RejectCode,
    },
    PositionChanged(Position),
    AccountChanged(Account),
}

impl ExchangeEvent {
    /// Order the event refers to, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            ExchangeEvent::OrderPlaced(order) => Some(order.id),
            ExchangeEvent::OrderPartiallyFilled { order_id, .. }
            | ExchangeEvent::OrderFullyFilled { order_id, .. }
            | ExchangeEvent::OrderCanceled { order_id, .. }
            | ExchangeEvent::OrderRejected { order_id, .. } => Some(*order_id),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeEvent::LoadFinished { .. } => "load_finished",
            ExchangeEvent::TickReceived(_) => "tick_received",
            ExchangeEvent::SettlementCompleted => "settlement_completed",
            ExchangeEvent::OrderPlaced(_) => "order_placed",
            ExchangeEvent::OrderPartiallyFilled { .. } => "order_partially_filled",
            ExchangeEvent::OrderFullyFilled { .. } => "order_fully_filled",
            ExchangeEvent::OrderCanceled { .. } => "order_canceled",
            ExchangeEvent::OrderRejected { .. } => "order_rejected",
            ExchangeEvent::PositionChanged(_) => "position_changed",
            ExchangeEvent::AccountChanged(_) => "account_changed",
        }
    }
}
