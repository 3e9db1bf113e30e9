//! Tick playback loop.
//!
//! Replays one trading day of merged ticks, one tick group per step:
//! commit requests, publish the group, match, run the liquidation hook,
//! remember volumes, pace. Everything runs on the caller's thread.

use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

use ticksim_core::config::SimulatorConfig;
use ticksim_core::{
    Account, ContractCode, ContractProvider, Direction, Offset, Order, OrderFlag, OrderId,
    Position, Result, Tick, Timestamp, TradingDay, Volume,
};
use ticksim_ingestion::TickSource;
use tracing::{debug, info};

use crate::context::{EventHandler, Request, RequestQueue, TradingContext};
use crate::events::ExchangeEvent;
use crate::ledger::Ledger;
use crate::matching::MatchingEngine;
use crate::queue::VolumeTracker;
use crate::statistics::{DailyFlow, StatisticsRecorder};

/// Forced-liquidation extension point, run once per step after matching.
///
/// Implementations may inspect the ledger and the current tick group and
/// submit closing orders through the context; those orders are committed at
/// the next step.
pub trait LiquidationHook {
    fn check(
        &mut self,
        ledger: &Ledger,
        group: &[Tick],
        compulsory_factor: f64,
        ctx: &mut TradingContext<'_>,
    );
}

/// Never liquidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiquidation;

impl LiquidationHook for NoLiquidation {
    fn check(&mut self, _: &Ledger, _: &[Tick], _: f64, _: &mut TradingContext<'_>) {}
}

/// Playback state for the current trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Loading,
    InTrading,
    Closed,
}

/// Simulated exchange replaying ticks from `S` with reference data from `C`.
pub struct TickSimulator<S, C> {
    config: SimulatorConfig,
    source: S,
    contracts: C,
    ledger: Ledger,
    engine: MatchingEngine,
    requests: RequestQueue,
    volumes: VolumeTracker,
    statistics: StatisticsRecorder,
    hook: Box<dyn LiquidationHook>,
    /// Subscribed contracts, in subscription order.
    codes: Vec<ContractCode>,
    /// Merged ticks of the current day.
    ticks: Vec<Tick>,
    cursor: usize,
    state: PlayState,
    trading_day: TradingDay,
    /// Events not yet dispatched.
    events: Vec<ExchangeEvent>,
}

impl<S: TickSource, C: ContractProvider> TickSimulator<S, C> {
    /// Create a simulator with an account seeded from `config`.
    pub fn new(config: SimulatorConfig, source: S, contracts: C) -> Self {
        let ledger = Ledger::new(config.initial_capital);
        Self {
            config,
            source,
            contracts,
            ledger,
            engine: MatchingEngine::new(),
            requests: RequestQueue::new(),
            volumes: VolumeTracker::new(),
            statistics: StatisticsRecorder::new(),
            hook: Box::new(NoLiquidation),
            codes: Vec::new(),
            ticks: Vec::new(),
            cursor: 0,
            state: PlayState::Closed,
            trading_day: 0,
            events: Vec::new(),
        }
    }

    /// Replace the forced-liquidation hook.
    pub fn with_hook(mut self, hook: Box<dyn LiquidationHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Add contracts to the replay set. Duplicates are ignored.
    pub fn subscribe(&mut self, codes: impl IntoIterator<Item = ContractCode>) {
        for code in codes {
            if !self.codes.contains(&code) {
                self.codes.push(code);
            }
        }
    }

    pub fn unsubscribe(&mut self, codes: &[ContractCode]) {
        self.codes.retain(|c| !codes.contains(c));
    }

    /// Seed positions carried from a previous run.
    pub fn restore_positions(&mut self, positions: impl IntoIterator<Item = Position>) {
        for position in positions {
            self.ledger.restore(position, &self.contracts);
        }
    }

    /// Submit an order; it is committed at the next commit point.
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

    pub fn cancel_order(&mut self, id: OrderId) -> bool {
        self.requests.cancel(id, self.engine.orders())
    }

    pub fn submit_settlement(&mut self) {
        self.requests.settle();
    }

    pub fn account(&self) -> &Account {
        self.ledger.account()
    }

    pub fn position(&self, code: &ContractCode) -> Position {
        self.ledger.position_snapshot(code)
    }

    pub fn all_positions(&self) -> Vec<Position> {
        self.ledger.positions().cloned().collect()
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.engine.orders().order(id)
    }

    pub fn all_orders(&self) -> Vec<Order> {
        self.engine.orders().orders()
    }

    pub fn find_orders(&self, predicate: impl Fn(&Order) -> bool) -> Vec<Order> {
        self.engine
            .orders()
            .orders()
            .into_iter()
            .filter(|o| predicate(o))
            .collect()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn statistics(&self) -> &StatisticsRecorder {
        &self.statistics
    }

    pub fn trading_day(&self) -> TradingDay {
        self.trading_day
    }

    pub fn last_tick_time(&self) -> Timestamp {
        self.requests.clock().0
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    /// Whether the simulator can take queries and requests.
    pub fn is_usable(&self) -> bool {
        self.state != PlayState::Loading
    }

    /// Replay one trading day to the end.
    pub fn play(
        &mut self,
        trading_day: TradingDay,
        handler: &mut dyn EventHandler,
    ) -> Result<DailyFlow> {
        self.state = PlayState::Loading;
        self.trading_day = trading_day;
        self.statistics.clear();
        self.requests.set_clock(0, 0);
        if let Err(e) = self.load(trading_day) {
            self.state = PlayState::Closed;
            return Err(e);
        }

        self.crossday_settlement();
        self.events.push(ExchangeEvent::LoadFinished {
            account: *self.ledger.account(),
            orders: self.engine.orders().orders(),
            positions: self.all_positions(),
        });
        self.state = PlayState::InTrading;
        self.dispatch(handler);

        while self.state == PlayState::InTrading {
            let started = Instant::now();

            self.commit();
            let group = self.publish();
            self.dispatch(handler);

            self.commit();
            self.match_group(group.clone());
            self.dispatch(handler);

            self.run_hook(group.clone());
            self.dispatch(handler);

            if self.state == PlayState::Closed {
                self.volumes.clear();
            } else {
                for tick in &self.ticks[group] {
                    self.volumes.record(tick);
                }
            }
            self.pace(started);
        }

        let flow = DailyFlow::new(trading_day, &self.statistics, self.ledger.account());
        info!(
            trading_day,
            cash = flow.cash,
            frozen_margin = flow.frozen_margin,
            trades = flow.statistics.trade_amount,
            "trading day closed"
        );
        Ok(flow)
    }

    fn load(&mut self, trading_day: TradingDay) -> Result<()> {
        self.ticks.clear();
        self.cursor = 0;
        for code in &self.codes {
            let count = self.source.load_tick(&mut self.ticks, code, trading_day)?;
            debug!(%code, trading_day, count, "contract loaded");
        }
        // Stable: ticks sharing an instant keep subscription order.
        self.ticks.sort_by_key(|t| t.instant());
        info!(
            trading_day,
            contracts = self.codes.len(),
            ticks = self.ticks.len(),
            "ticks loaded"
        );
        Ok(())
    }

    /// Cancel everything left working and roll positions into the new day.
    fn crossday_settlement(&mut self) {
        let working = self.engine.orders().len();
        self.engine
            .cancel_all(&mut self.ledger, &self.contracts, &mut self.events);

        let before = *self.ledger.account();
        let rolled = self.ledger.crossday_roll(&self.contracts);
        for code in &rolled {
            self.events
                .push(ExchangeEvent::PositionChanged(self.ledger.position_snapshot(code)));
        }
        if *self.ledger.account() != before {
            self.events
                .push(ExchangeEvent::AccountChanged(*self.ledger.account()));
        }
        self.volumes.clear();
        info!(
            trading_day = self.trading_day,
            canceled = working,
            rolled = rolled.len(),
            "crossday settlement"
        );
    }

    /// Apply every queued request.
    fn commit(&mut self) {
        for request in self.requests.drain() {
            match request {
                Request::Place(order) => {
                    let is_today = match order.offset {
                        Offset::Open => true,
                        Offset::Close => self.ledger.close_is_today(
                            &order.code,
                            order.direction,
                            order.total_volume,
                        ),
                    };
                    let code = order.code.clone();
                    if self.engine.orders_mut().insert(order, is_today) {
                        self.statistics.record_place(&code);
                    }
                }
                Request::Cancel(id) => {
                    if !self.engine.orders_mut().request_cancel(id) {
                        debug!(order_id = %id, "cancel of non-resting order ignored");
                    }
                }
                Request::Settle => self.events.push(ExchangeEvent::SettlementCompleted),
            }
        }
    }

    /// Emit the next tick group and return its index range.
    fn publish(&mut self) -> Range<usize> {
        let start = self.cursor;
        let Some(first) = self.ticks.get(start) else {
            self.state = PlayState::Closed;
            return start..start;
        };
        let instant = first.instant();
        let len = self.ticks[start..]
            .iter()
            .take_while(|t| t.instant() == instant)
            .count();
        let end = start + len;

        self.cursor = end;
        self.requests.set_clock(instant.0, instant.1);
        for tick in &self.ticks[start..end] {
            self.events.push(ExchangeEvent::TickReceived(tick.clone()));
        }
        if end >= self.ticks.len() {
            self.state = PlayState::Closed;
        }
        start..end
    }

    fn match_group(&mut self, group: Range<usize>) {
        for tick in &self.ticks[group] {
            // No previous volume yet: nothing can be matched.
            let Some(traded) = self.volumes.incremental(tick) else {
                continue;
            };
            self.engine.match_tick(
                tick,
                traded,
                &mut self.ledger,
                &self.contracts,
                &mut self.events,
            );
        }
    }

    fn run_hook(&mut self, group: Range<usize>) {
        let mut ctx = TradingContext {
            requests: &mut self.requests,
            ledger: &self.ledger,
            orders: self.engine.orders(),
            trading_day: self.trading_day,
        };
        self.hook.check(
            &self.ledger,
            &self.ticks[group],
            self.config.compulsory_factor,
            &mut ctx,
        );
    }

    /// Hand pending events to the handler, in order.
    fn dispatch(&mut self, handler: &mut dyn EventHandler) {
        let events = std::mem::take(&mut self.events);
        for event in &events {
            self.statistics.record(event);
            let mut ctx = TradingContext {
                requests: &mut self.requests,
                ledger: &self.ledger,
                orders: self.engine.orders(),
                trading_day: self.trading_day,
            };
            handler.on_event(event, &mut ctx);
        }
    }

    fn pace(&self, started: Instant) {
        if self.config.interval == 0 {
            return;
        }
        let budget = Duration::from_micros(self.config.interval);
        if let Some(rest) = budget.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use ticksim_core::{ContractInfo, ContractTable, Level, PositionLot, RejectCode};
    use ticksim_ingestion::MemoryTickSource;

    const DAY: TradingDay = 20230301;

    fn rb() -> ContractCode {
        "SHFE.rb2305".parse().unwrap()
    }

    fn make_contracts() -> ContractTable {
        ["SHFE.rb2305", "SHFE.ag2306"]
            .iter()
            .map(|code| ContractInfo {
                code: code.parse().unwrap(),
                multiplier: 10.0,
                margin_rate: 0.1,
                open_fee_per_lot: 2.0,
                open_fee_rate: 0.0,
                close_today_fee_per_lot: 2.0,
                close_today_fee_rate: 0.0,
            })
            .collect()
    }

    fn make_tick(code: &str, day: TradingDay, time: Timestamp, volume: u64) -> Tick {
        Tick {
            code: code.parse().unwrap(),
            time,
            tick_index: 0,
            price: 4000.0,
            volume,
            trading_day: day,
            bids: vec![Level { price: 3999.0, volume: 30 }],
            asks: vec![Level { price: 4000.0, volume: 20 }],
        }
    }

    /// rb ticks at 09:00:00.. with the given cumulative volumes.
    fn make_source(day: TradingDay, volumes: &[u64]) -> MemoryTickSource {
        let mut source = MemoryTickSource::new();
        for (i, volume) in volumes.iter().enumerate() {
            source.push(make_tick("SHFE.rb2305", day, 1_677_632_400 + i as i64, *volume));
        }
        source
    }

    fn make_simulator(source: MemoryTickSource) -> TickSimulator<MemoryTickSource, ContractTable> {
        let config = SimulatorConfig {
            initial_capital: 100_000.0,
            interval: 0,
            ..SimulatorConfig::default()
        };
        let mut sim = TickSimulator::new(config, source, make_contracts());
        sim.subscribe([rb()]);
        sim
    }

    /// Records every event and checks ledger invariants at each one.
    #[derive(Default)]
    struct Recorder {
        events: Vec<ExchangeEvent>,
        remaining: HashMap<OrderId, Volume>,
    }

    impl Recorder {
        fn names(&self) -> Vec<&'static str> {
            self.events.iter().map(|e| e.name()).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.events.iter().filter(|e| e.name() == name).count()
        }

        fn check(&mut self, event: &ExchangeEvent, ctx: &TradingContext<'_>) {
            assert!(ctx.account().frozen_margin >= 0.0);
            match event {
                ExchangeEvent::PositionChanged(pos) => assert!(pos.is_consistent()),
                ExchangeEvent::OrderPlaced(order) => {
                    self.remaining.insert(order.id, order.remaining_volume);
                }
                ExchangeEvent::OrderPartiallyFilled { order_id, filled, total } => {
                    let remaining = total - filled;
                    let previous = self.remaining.insert(*order_id, remaining);
                    assert!(previous.map_or(true, |p| remaining < p));
                }
                ExchangeEvent::OrderFullyFilled { order_id, .. } => {
                    self.remaining.insert(*order_id, 0);
                }
                _ => {}
            }
            self.events.push(event.clone());
        }
    }

    impl EventHandler for Recorder {
        fn on_event(&mut self, event: &ExchangeEvent, ctx: &mut TradingContext<'_>) {
            self.check(event, ctx);
        }
    }

    #[test]
    fn test_round_trip_open_fill() {
        let mut sim = make_simulator(make_source(DAY, &[100, 100, 130, 130]));
        let mut recorder = Recorder::default();
        let mut handler = |event: &ExchangeEvent, ctx: &mut TradingContext<'_>| {
            if let ExchangeEvent::LoadFinished { .. } = event {
                ctx.place_order(Offset::Open, Direction::Long, rb(), 10, 4000.0, OrderFlag::Normal);
            }
            recorder.check(event, ctx);
        };

        let flow = sim.play(DAY, &mut handler).unwrap();
        let names = recorder.names();
        assert_eq!(names[0], "load_finished");
        assert_eq!(recorder.count("tick_received"), 4);
        assert_eq!(recorder.count("order_placed"), 1);
        assert_eq!(recorder.count("order_fully_filled"), 1);

        let filled = names.iter().position(|n| *n == "order_fully_filled").unwrap();
        assert_eq!(names[filled + 1], "position_changed");
        assert_eq!(names[filled + 2], "account_changed");
        match &recorder.events[filled + 1] {
            ExchangeEvent::PositionChanged(pos) => assert_eq!(pos.today_long.quantity, 10),
            other => panic!("unexpected {other:?}"),
        }
        match &recorder.events[filled + 2] {
            ExchangeEvent::AccountChanged(account) => {
                assert_relative_eq!(account.cash, 100_000.0 - 20.0, epsilon = 1e-9)
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(flow.trading_day, DAY);
        assert_eq!(flow.statistics.place_order_amount, 1);
        assert_eq!(flow.statistics.entrust_amount, 1);
        assert_eq!(flow.statistics.trade_amount, 1);
        assert_eq!(sim.state(), PlayState::Closed);
        assert!(sim.all_orders().is_empty());
    }

    #[test]
    fn test_double_cancel_single_event() {
        let mut sim = make_simulator(make_source(DAY, &[100, 100, 100, 100]));
        let mut recorder = Recorder::default();
        let mut results = Vec::new();
        let mut handler = |event: &ExchangeEvent, ctx: &mut TradingContext<'_>| {
            match event {
                ExchangeEvent::LoadFinished { .. } => {
                    ctx.place_order(Offset::Open, Direction::Long, rb(), 1, 3990.0, OrderFlag::Normal);
                }
                ExchangeEvent::OrderPlaced(order) => {
                    results.push(ctx.cancel_order(order.id));
                    results.push(ctx.cancel_order(order.id));
                }
                _ => {}
            }
            recorder.check(event, ctx);
        };

        sim.play(DAY, &mut handler).unwrap();
        assert_eq!(results, vec![true, false]);
        assert_eq!(recorder.count("order_canceled"), 1);
        assert_relative_eq!(sim.account().frozen_margin, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_crossday_settlement() {
        let mut source = make_source(DAY, &[100, 100, 100]);
        for (i, volume) in [200u64, 200].iter().enumerate() {
            source.push(make_tick("SHFE.rb2305", 20230302, 1_677_718_800 + i as i64, *volume));
        }
        let mut sim = make_simulator(source);

        let mut pos = Position::new(rb());
        pos.yesterday_short = PositionLot { quantity: 3, price: 4000.0, frozen: 0 };
        sim.restore_positions([pos]);
        assert_relative_eq!(sim.account().frozen_margin, 12_000.0, epsilon = 1e-9);

        let id = sim
            .place_order(Offset::Open, Direction::Long, rb(), 1, 3990.0, OrderFlag::Normal)
            .unwrap();

        let mut day1 = Recorder::default();
        sim.play(DAY, &mut day1).unwrap();
        let rolled = day1
            .events
            .iter()
            .find_map(|e| match e {
                ExchangeEvent::PositionChanged(pos) => Some(pos.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(rolled.yesterday_short.quantity, 0);
        // Order placed before play is committed in the loop and survives day one.
        assert!(sim.order(id).is_some());
        assert_relative_eq!(sim.account().frozen_margin, 3_990.0, epsilon = 1e-9);

        let mut day2 = Recorder::default();
        sim.play(20230302, &mut day2).unwrap();
        let names = day2.names();
        let canceled = names.iter().position(|n| *n == "order_canceled").unwrap();
        let loaded = names.iter().position(|n| *n == "load_finished").unwrap();
        assert!(canceled < loaded);
        assert!(sim.order(id).is_none());
        assert_relative_eq!(sim.account().frozen_margin, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tick_groups_merge_contracts() {
        let mut source = make_source(DAY, &[100, 110]);
        source.push(make_tick("SHFE.ag2306", DAY, 1_677_632_400, 50));
        let mut sim = make_simulator(source);
        sim.subscribe(["SHFE.ag2306".parse().unwrap()]);

        let mut recorder = Recorder::default();
        sim.play(DAY, &mut recorder).unwrap();
        let codes: Vec<String> = recorder
            .events
            .iter()
            .filter_map(|e| match e {
                ExchangeEvent::TickReceived(tick) => Some(tick.code.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec!["SHFE.rb2305", "SHFE.ag2306", "SHFE.rb2305"]);
    }

    #[test]
    fn test_unknown_contract_rejected() {
        let mut source = make_source(DAY, &[100, 100, 100]);
        for i in 0..3 {
            source.push(make_tick("DCE.m2305", DAY, 1_677_632_400 + i, 10));
        }
        let mut sim = make_simulator(source);
        let code: ContractCode = "DCE.m2305".parse().unwrap();
        sim.subscribe([code.clone()]);
        sim.place_order(Offset::Open, Direction::Long, code, 1, 3000.0, OrderFlag::Normal);

        let mut recorder = Recorder::default();
        let flow = sim.play(DAY, &mut recorder).unwrap();
        let reason = recorder.events.iter().find_map(|e| match e {
            ExchangeEvent::OrderRejected { reason, .. } => Some(*reason),
            _ => None,
        });
        assert_eq!(reason, Some(RejectCode::ContractNotFound));
        assert_eq!(flow.statistics.error_amount, 1);
    }

    #[test]
    fn test_settlement_acknowledged() {
        let mut sim = make_simulator(make_source(DAY, &[100, 100]));
        sim.submit_settlement();
        let mut recorder = Recorder::default();
        sim.play(DAY, &mut recorder).unwrap();
        assert_eq!(recorder.count("settlement_completed"), 1);
    }

    #[test]
    fn test_empty_day_closes() {
        let mut sim = make_simulator(MemoryTickSource::new());
        let mut recorder = Recorder::default();
        let flow = sim.play(DAY, &mut recorder).unwrap();
        assert_eq!(recorder.names(), vec!["load_finished"]);
        assert_relative_eq!(flow.cash, 100_000.0, epsilon = 1e-9);
    }

    struct CountingHook {
        groups: Rc<Cell<usize>>,
    }

    impl LiquidationHook for CountingHook {
        fn check(&mut self, _: &Ledger, group: &[Tick], factor: f64, _: &mut TradingContext<'_>) {
            assert!(!group.is_empty());
            assert_relative_eq!(factor, 0.8, epsilon = 1e-9);
            self.groups.set(self.groups.get() + 1);
        }
    }

    #[test]
    fn test_hook_runs_every_step() {
        let groups = Rc::new(Cell::new(0));
        let mut sim = make_simulator(make_source(DAY, &[100, 110, 120])).with_hook(Box::new(
            CountingHook {
                groups: Rc::clone(&groups),
            },
        ));
        let mut recorder = Recorder::default();
        sim.play(DAY, &mut recorder).unwrap();
        assert_eq!(groups.get(), 3);
    }
}
