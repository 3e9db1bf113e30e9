//! Core data types for the tick simulator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Wall time in seconds since Unix epoch.
pub type Timestamp = i64;

/// Lots/contracts.
pub type Volume = u32;

/// Trading day id in `YYYYMMDD` form.
pub type TradingDay = u32;

/// Number of published price levels per side.
pub const MAX_DEPTH: usize = 5;

/// Contract identifier, `EXCHANGE.INSTRUMENT` (e.g. `SHFE.rb2305`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContractCode {
    exchange: String,
    instrument: String,
}

impl ContractCode {
    /// Build a code from its parts.
    pub fn new(exchange: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            instrument: instrument.into(),
        }
    }

    /// Exchange part.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Instrument part.
    pub fn instrument(&self) -> &str {
        &self.instrument
    }
}

impl FromStr for ContractCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((exchange, instrument)) if !exchange.is_empty() && !instrument.is_empty() => {
                Ok(Self::new(exchange, instrument))
            }
            _ => Err(Error::data(format!("malformed contract code '{s}'"))),
        }
    }
}

impl TryFrom<String> for ContractCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContractCode> for String {
    fn from(code: ContractCode) -> Self {
        code.to_string()
    }
}

impl fmt::Display for ContractCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.exchange, self.instrument)
    }
}

/// One published depth level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub volume: Volume,
}

/// A tick-level order-book snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    /// Contract.
    pub code: ContractCode,
    /// Wall time (seconds).
    pub time: Timestamp,
    /// Sub-second sequence counter (milliseconds within `time`).
    pub tick_index: u32,
    /// Last traded price.
    pub price: f64,
    /// Cumulative traded volume for the trading day.
    pub volume: u64,
    /// Trading day the snapshot belongs to.
    pub trading_day: TradingDay,
    /// Bid levels, best first.
    pub bids: Vec<Level>,
    /// Ask levels, best first.
    pub asks: Vec<Level>,
}

impl Tick {
    /// The `(time, tick_index)` instant that orders ticks.
    #[inline]
    pub fn instant(&self) -> (Timestamp, u32) {
        (self.time, self.tick_index)
    }

    /// Best bid price, 0 when the side is empty.
    #[inline]
    pub fn best_bid(&self) -> f64 {
        self.bids.first().map(|l| l.price).unwrap_or(0.0)
    }

    /// Best ask price, 0 when the side is empty.
    #[inline]
    pub fn best_ask(&self) -> f64 {
        self.asks.first().map(|l| l.price).unwrap_or(0.0)
    }

    /// Published volume at exactly `price` on `side`'s own book.
    ///
    /// Buys rest on the bid side, sells on the ask side. Returns 0 when the
    /// price is outside the published levels.
    pub fn depth_at(&self, side: Side, price: f64) -> Volume {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels
            .iter()
            .find(|l| l.price == price)
            .map(|l| l.volume)
            .unwrap_or(0)
    }
}

/// Open or close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    Open,
    Close,
}

impl TryFrom<char> for Offset {
    type Error = Error;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Offset::Open),
            '1' => Ok(Offset::Close),
            other => Err(Error::InvalidOffset(other.to_string())),
        }
    }
}

/// Long or short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl TryFrom<char> for Direction {
    type Error = Error;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Direction::Long),
            '1' => Ok(Direction::Short),
            other => Err(Error::InvalidDirection(other.to_string())),
        }
    }
}

/// Side of the book an order trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Derive the book side from offset and direction.
    ///
    /// Opening long and closing short buy; opening short and closing long sell.
    pub fn of(offset: Offset, direction: Direction) -> Self {
        match (offset, direction) {
            (Offset::Open, Direction::Long) | (Offset::Close, Direction::Short) => Side::Buy,
            (Offset::Open, Direction::Short) | (Offset::Close, Direction::Long) => Side::Sell,
        }
    }
}

/// Execution flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderFlag {
    /// Rests in the queue until filled or canceled.
    #[default]
    Normal,
    /// Fill and kill: partial fill allowed, remainder canceled at once.
    Fak,
    /// Fill or kill: all or nothing, at once.
    Fok,
}

impl FromStr for OrderFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "nor" => Ok(OrderFlag::Normal),
            "fak" => Ok(OrderFlag::Fak),
            "fok" => Ok(OrderFlag::Fok),
            other => Err(Error::InvalidFlag(other.to_string())),
        }
    }
}

/// Order identifier.
///
/// Packs the low 32 bits of the wall time, the low 16 bits of the tick index
/// and the low 16 bits of a per-run sequence number, so ids sort by creation
/// instant within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl OrderId {
    /// Pack an id.
    pub fn pack(time: Timestamp, tick_index: u32, sequence: u32) -> Self {
        let v1 = ((time as u64) << 32) & 0xFFFF_FFFF_0000_0000;
        let v2 = ((tick_index as u64) << 16) & 0x0000_0000_FFFF_0000;
        let v3 = (sequence as u64) & 0x0000_0000_0000_FFFF;
        OrderId(v1 | v2 | v3)
    }

    /// Sequence part of the id.
    pub fn sequence(self) -> u32 {
        (self.0 & 0xFFFF) as u32
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A strategy order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub code: ContractCode,
    pub offset: Offset,
    pub direction: Direction,
    /// Limit price; 0 means market until resolved on the first matching tick.
    pub price: f64,
    pub total_volume: Volume,
    pub remaining_volume: Volume,
    pub create_time: Timestamp,
    pub flag: OrderFlag,
}

impl Order {
    /// Whether the order still carries a market (unresolved) price.
    #[inline]
    pub fn is_market(&self) -> bool {
        self.price == 0.0
    }

    /// Book side the order trades on.
    #[inline]
    pub fn side(&self) -> Side {
        Side::of(self.offset, self.direction)
    }

    /// Volume filled so far.
    #[inline]
    pub fn filled_volume(&self) -> Volume {
        self.total_volume - self.remaining_volume
    }
}

/// One of the four lots of a position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionLot {
    /// Lots held.
    pub quantity: Volume,
    /// Average open price.
    pub price: f64,
    /// Lots reserved by working close orders.
    pub frozen: Volume,
}

impl PositionLot {
    /// Lots not reserved by close orders.
    #[inline]
    pub fn usable(&self) -> Volume {
        self.quantity.saturating_sub(self.frozen)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    pub fn clear(&mut self) {
        *self = PositionLot::default();
    }
}

/// Per-contract position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub code: ContractCode,
    pub today_long: PositionLot,
    pub today_short: PositionLot,
    pub yesterday_long: PositionLot,
    pub yesterday_short: PositionLot,
}

impl Position {
    /// Empty position for a contract.
    pub fn new(code: ContractCode) -> Self {
        Self {
            code,
            today_long: PositionLot::default(),
            today_short: PositionLot::default(),
            yesterday_long: PositionLot::default(),
            yesterday_short: PositionLot::default(),
        }
    }

    /// Select a lot.
    pub fn lot(&self, direction: Direction, is_today: bool) -> &PositionLot {
        match (direction, is_today) {
            (Direction::Long, true) => &self.today_long,
            (Direction::Short, true) => &self.today_short,
            (Direction::Long, false) => &self.yesterday_long,
            (Direction::Short, false) => &self.yesterday_short,
        }
    }

    /// Select a lot mutably.
    pub fn lot_mut(&mut self, direction: Direction, is_today: bool) -> &mut PositionLot {
        match (direction, is_today) {
            (Direction::Long, true) => &mut self.today_long,
            (Direction::Short, true) => &mut self.today_short,
            (Direction::Long, false) => &mut self.yesterday_long,
            (Direction::Short, false) => &mut self.yesterday_short,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.today_long.is_empty()
            && self.today_short.is_empty()
            && self.yesterday_long.is_empty()
            && self.yesterday_short.is_empty()
    }

    pub fn long_position(&self) -> Volume {
        self.today_long.quantity + self.yesterday_long.quantity
    }

    pub fn short_position(&self) -> Volume {
        self.today_short.quantity + self.yesterday_short.quantity
    }

    /// Long minus short.
    pub fn net_position(&self) -> i64 {
        self.long_position() as i64 - self.short_position() as i64
    }

    /// Whether any lot reserves more than it holds.
    pub fn is_consistent(&self) -> bool {
        [
            &self.today_long,
            &self.today_short,
            &self.yesterday_long,
            &self.yesterday_short,
        ]
        .iter()
        .all(|lot| lot.frozen <= lot.quantity)
    }
}

/// Account cash state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Cash balance.
    pub cash: f64,
    /// Margin reserved by working open orders and open positions.
    pub frozen_margin: f64,
}

impl Account {
    /// Account seeded with initial capital.
    pub fn with_capital(cash: f64) -> Self {
        Self {
            cash,
            frozen_margin: 0.0,
        }
    }

    /// Cash not reserved as margin.
    #[inline]
    pub fn available(&self) -> f64 {
        self.cash - self.frozen_margin
    }
}

/// Admission rejection codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum RejectCode {
    /// Offset is neither open nor close.
    InvalidOffset = 23,
    /// Selected lot lacks unfrozen quantity.
    InsufficientPosition = 30,
    /// Cash cannot cover frozen margin plus the new requirement.
    InsufficientMargin = 31,
    /// No reference data for the contract.
    ContractNotFound = 10000,
}

impl RejectCode {
    /// Numeric code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectCode::InvalidOffset => "invalid offset",
            RejectCode::InsufficientPosition => "insufficient position",
            RejectCode::InsufficientMargin => "insufficient margin",
            RejectCode::ContractNotFound => "contract not found",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tick() -> Tick {
        Tick {
            code: "SHFE.rb2305".parse().unwrap(),
            time: 1_680_000_000,
            tick_index: 500,
            price: 4001.0,
            volume: 1200,
            trading_day: 20230328,
            bids: vec![
                Level { price: 4000.0, volume: 30 },
                Level { price: 3999.0, volume: 12 },
            ],
            asks: vec![
                Level { price: 4002.0, volume: 25 },
                Level { price: 4003.0, volume: 8 },
            ],
        }
    }

    #[test]
    fn test_contract_code_parse() {
        let code: ContractCode = "SHFE.rb2305".parse().unwrap();
        assert_eq!(code.exchange(), "SHFE");
        assert_eq!(code.instrument(), "rb2305");
        assert_eq!(code.to_string(), "SHFE.rb2305");
        assert!("rb2305".parse::<ContractCode>().is_err());
        assert!(".rb2305".parse::<ContractCode>().is_err());
    }

    #[test]
    fn test_best_prices_and_depth() {
        let tick = make_tick();
        assert_eq!(tick.best_bid(), 4000.0);
        assert_eq!(tick.best_ask(), 4002.0);
        assert_eq!(tick.depth_at(Side::Buy, 3999.0), 12);
        assert_eq!(tick.depth_at(Side::Sell, 4003.0), 8);
        // Price on the other side of the book is not our queue.
        assert_eq!(tick.depth_at(Side::Buy, 4002.0), 0);
        assert_eq!(tick.depth_at(Side::Sell, 3990.0), 0);
    }

    #[test]
    fn test_empty_book_prices() {
        let mut tick = make_tick();
        tick.bids.clear();
        tick.asks.clear();
        assert_eq!(tick.best_bid(), 0.0);
        assert_eq!(tick.best_ask(), 0.0);
    }

    #[test]
    fn test_side_of() {
        assert_eq!(Side::of(Offset::Open, Direction::Long), Side::Buy);
        assert_eq!(Side::of(Offset::Open, Direction::Short), Side::Sell);
        assert_eq!(Side::of(Offset::Close, Direction::Long), Side::Sell);
        assert_eq!(Side::of(Offset::Close, Direction::Short), Side::Buy);
    }

    #[test]
    fn test_order_id_packing() {
        let a = OrderId::pack(1_680_000_000, 500, 1);
        let b = OrderId::pack(1_680_000_000, 500, 2);
        let c = OrderId::pack(1_680_000_001, 0, 3);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(b.sequence(), 2);
        assert_eq!(a.0 >> 32, 1_680_000_000u64 & 0xFFFF_FFFF);
    }

    #[test]
    fn test_offset_from_char() {
        assert_eq!(Offset::try_from('0').unwrap(), Offset::Open);
        assert_eq!(Offset::try_from('1').unwrap(), Offset::Close);
        assert!(matches!(Offset::try_from('9'), Err(Error::InvalidOffset(_))));
    }

    #[test]
    fn test_order_flag_parse() {
        assert_eq!("FAK".parse::<OrderFlag>().unwrap(), OrderFlag::Fak);
        assert_eq!("fok".parse::<OrderFlag>().unwrap(), OrderFlag::Fok);
        assert!("ioc".parse::<OrderFlag>().is_err());
    }

    #[test]
    fn test_position_lots() {
        let mut pos = Position::new("SHFE.rb2305".parse().unwrap());
        pos.lot_mut(Direction::Long, false).quantity = 5;
        pos.lot_mut(Direction::Long, false).frozen = 2;
        pos.today_short.quantity = 3;
        assert_eq!(pos.lot(Direction::Long, false).usable(), 3);
        assert_eq!(pos.long_position(), 5);
        assert_eq!(pos.net_position(), 2);
        assert!(pos.is_consistent());
        pos.today_short.frozen = 4;
        assert!(!pos.is_consistent());
    }

    #[test]
    fn test_reject_codes() {
        assert_eq!(RejectCode::InvalidOffset.code(), 23);
        assert_eq!(RejectCode::InsufficientPosition.code(), 30);
        assert_eq!(RejectCode::InsufficientMargin.code(), 31);
        assert_eq!(RejectCode::InsufficientMargin.to_string(), "insufficient margin (31)");
    }
}
