//! Queue-position estimation from published depth and traded volume.
//!
//! There is no per-order feed, so an order's place in the price-time queue is
//! approximated: the seat starts at the published depth at the order's price
//! and shrinks by each tick's incremental traded volume. A negative seat means
//! the queue ahead is exhausted and the overshoot is fillable.

use std::collections::HashMap;
use ticksim_core::{ContractCode, Side, Tick, Volume};

/// Seed a queue seat from the depth at `price` on the order's own side.
pub fn seed_seat(tick: &Tick, side: Side, price: f64) -> i64 {
    tick.depth_at(side, price) as i64
}

/// Result of consuming traded volume against a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatAdvance {
    /// Seat after consumption, never negative.
    pub seat: i64,
    /// Volume that reached the order, not yet capped by its remaining volume.
    pub fillable: Volume,
}

/// Consume `traded` volume ahead of the order.
pub fn advance_seat(seat: i64, traded: Volume) -> SeatAdvance {
    let next = seat - traded as i64;
    if next < 0 {
        SeatAdvance {
            seat: 0,
            fillable: next.unsigned_abs().min(Volume::MAX as u64) as Volume,
        }
    } else {
        SeatAdvance {
            seat: next,
            fillable: 0,
        }
    }
}

/// Tracks each contract's cumulative volume as of the previous step.
#[derive(Debug, Clone, Default)]
pub struct VolumeTracker {
    last: HashMap<ContractCode, u64>,
}

impl VolumeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Volume traded since the previous step, or `None` before the contract's
    /// first recorded tick.
    pub fn incremental(&self, tick: &Tick) -> Option<Volume> {
        self.last.get(&tick.code).map(|last| {
            tick.volume
                .saturating_sub(*last)
                .min(Volume::MAX as u64) as Volume
        })
    }

    /// Remember a tick's cumulative volume for the next step.
    pub fn record(&mut self, tick: &Tick) {
        self.last.insert(tick.code.clone(), tick.volume);
    }

    /// Forget everything (end of the trading day).
    pub fn clear(&mut self) {
        self.last.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticksim_core::Level;

    fn make_tick(volume: u64) -> Tick {
        Tick {
            code: "SHFE.rb2305".parse().unwrap(),
            time: 0,
            tick_index: 0,
            price: 4000.0,
            volume,
            trading_day: 20230301,
            bids: vec![Level { price: 3999.0, volume: 40 }],
            asks: vec![Level { price: 4001.0, volume: 15 }],
        }
    }

    #[test]
    fn test_seed_from_own_side() {
        let tick = make_tick(0);
        assert_eq!(seed_seat(&tick, Side::Buy, 3999.0), 40);
        assert_eq!(seed_seat(&tick, Side::Sell, 4001.0), 15);
        assert_eq!(seed_seat(&tick, Side::Buy, 3990.0), 0);
    }

    #[test]
    fn test_advance_seat() {
        assert_eq!(advance_seat(40, 10), SeatAdvance { seat: 30, fillable: 0 });
        assert_eq!(advance_seat(40, 40), SeatAdvance { seat: 0, fillable: 0 });
        assert_eq!(advance_seat(40, 47), SeatAdvance { seat: 0, fillable: 7 });
        assert_eq!(advance_seat(0, 3), SeatAdvance { seat: 0, fillable: 3 });
    }

    #[test]
    fn test_queue_never_fills_before_seat_consumed() {
        // Seat 25, trickle of 6 per tick: nothing fillable until 30 traded.
        let mut seat = 25;
        let mut traded = 0;
        for _ in 0..4 {
            let adv = advance_seat(seat, 6);
            traded += 6;
            assert_eq!(adv.fillable, 0, "filled after only {traded}");
            seat = adv.seat;
        }
        let adv = advance_seat(seat, 6);
        assert_eq!(adv.fillable, 5);
    }

    #[test]
    fn test_volume_tracker() {
        let mut tracker = VolumeTracker::new();
        let first = make_tick(100);
        assert_eq!(tracker.incremental(&first), None);
        tracker.record(&first);

        assert_eq!(tracker.incremental(&make_tick(130)), Some(30));
        // Cumulative volume never runs backwards; treat a reset as no trade.
        assert_eq!(tracker.incremental(&make_tick(90)), Some(0));

        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.incremental(&make_tick(130)), None);
    }
}
