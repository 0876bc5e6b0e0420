//! Optimal trade entry zones
//!
//! The OTE zone is the 61.8% - 78.6% retracement of an impulse leg, with the
//! 70.5% level as its midpoint. `top` and `bottom` are always price-ordered.

use super::bars::{Bar, BarHistory};
use super::fvg::FvgZone;
use super::impulse::ImpulseLeg;
use super::signal::Bias;
use serde::{Deserialize, Serialize};

pub type OteId = usize;

pub const FIB_618: f64 = 0.618;
pub const FIB_705: f64 = 0.705;
pub const FIB_786: f64 = 0.786;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OteConfig {
    /// Entry-side wick must be at least this fraction of the body
    pub min_wick_body_ratio: f64,
    /// Setups older than this are inactive
    pub max_age_bars: usize,
}

impl Default for OteConfig {
    fn default() -> Self {
        Self {
            min_wick_body_ratio: 0.5,
            max_age_bars: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OteZone {
    pub id: OteId,
    pub direction: Bias,
    pub top: f64,
    pub bottom: f64,
    pub midpoint: f64,
    pub fib_618: f64,
    pub fib_705: f64,
    pub fib_786: f64,
    pub impulse: ImpulseLeg,
    pub created_index: usize,
    pub tapped: bool,
    pub tap_index: Option<usize>,
    pub rejected: bool,
    pub rejection_index: Option<usize>,
    /// Price closed beyond the leg origin
    pub invalidated: bool,
    /// Retired at a session change
    #[serde(default)]
    pub expired: bool,
}

impl OteZone {
    pub fn from_impulse(leg: &ImpulseLeg, created_index: usize) -> Self {
        let range = leg.range();
        let (fib_618, fib_705, fib_786) = match leg.direction {
            Bias::Bullish => {
                let high = leg.high();
                (high - FIB_618 * range, high - FIB_705 * range, high - FIB_786 * range)
            }
            Bias::Bearish => {
                let low = leg.low();
                (low + FIB_618 * range, low + FIB_705 * range, low + FIB_786 * range)
            }
        };

        Self {
            id: 0,
            direction: leg.direction,
            top: fib_618.max(fib_786),
            bottom: fib_618.min(fib_786),
            midpoint: fib_705,
            fib_618,
            fib_705,
            fib_786,
            impulse: leg.clone(),
            created_index,
            tapped: false,
            tap_index: None,
            rejected: false,
            rejection_index: None,
            invalidated: false,
            expired: false,
        }
    }

    /// Move the levels onto an extended version of the same leg
    fn reanchor(&mut self, leg: &ImpulseLeg) {
        let moved = OteZone::from_impulse(leg, self.created_index);
        self.top = moved.top;
        self.bottom = moved.bottom;
        self.midpoint = moved.midpoint;
        self.fib_618 = moved.fib_618;
        self.fib_705 = moved.fib_705;
        self.fib_786 = moved.fib_786;
        self.impulse = moved.impulse;
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }

    /// Some part of the bar traded inside the zone
    pub fn is_tapped_by(&self, bar: &Bar) -> bool {
        bar.low <= self.top && bar.high >= self.bottom
    }

    /// Tap plus a close on the favourable side, matching body and entry wick
    pub fn is_rejection(&self, bar: &Bar, min_wick_body_ratio: f64) -> bool {
        if !self.is_tapped_by(bar) {
            return false;
        }
        let body = bar.body();
        match self.direction {
            Bias::Bullish => {
                let wick = bar.lower_wick();
                bar.is_bullish() && bar.close >= self.bottom && wick > 0.0 && wick >= min_wick_body_ratio * body
            }
            Bias::Bearish => {
                let wick = bar.upper_wick();
                bar.is_bearish() && bar.close <= self.top && wick > 0.0 && wick >= min_wick_body_ratio * body
            }
        }
    }

    pub fn is_invalidated_by(&self, bar: &Bar) -> bool {
        match self.direction {
            Bias::Bullish => bar.close < self.impulse.start_price,
            Bias::Bearish => bar.close > self.impulse.start_price,
        }
    }

    pub fn is_active(&self, current_index: usize, max_age_bars: usize) -> bool {
        !self.invalidated && !self.expired && current_index.saturating_sub(self.created_index) <= max_age_bars
    }
}

/// FVG and OTE price ranges intersect
pub fn fvg_overlaps_ote(fvg: &FvgZone, ote: &OteZone) -> bool {
    fvg.overlaps(ote.bottom, ote.top)
}

/// What changed on one bar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OteUpdate {
    pub created: Option<OteId>,
    /// Existing setup whose leg made a new extreme
    pub extended: Option<OteId>,
    pub tapped: Vec<OteId>,
    pub rejected: Vec<OteId>,
    pub invalidated: Vec<OteId>,
}

/// Arena of OTE setups
#[derive(Debug, Clone)]
pub struct OteTracker {
    config: OteConfig,
    zones: Vec<OteZone>,
    last_index: usize,
}

impl OteTracker {
    pub fn new(config: OteConfig) -> Self {
        Self {
            config,
            zones: Vec::new(),
            last_index: 0,
        }
    }

    /// Update existing setups with the newest bar, then register `leg`.
    ///
    /// A setup is keyed by its leg's direction, origin and displacement bar;
    /// a leg that keeps extending re-anchors its setup instead of adding one.
    pub fn update(&mut self, history: &BarHistory, leg: Option<&ImpulseLeg>) -> OteUpdate {
        let mut update = OteUpdate::default();
        let (Some(index), Some(bar)) = (history.last_index(), history.last()) else {
            return update;
        };
        self.last_index = index;

        let max_age = self.config.max_age_bars;
        let wick_ratio = self.config.min_wick_body_ratio;
        for zone in self.zones.iter_mut() {
            if !zone.is_active(index, max_age) || zone.impulse.end_index >= index {
                continue;
            }
            if zone.is_invalidated_by(bar) {
                zone.invalidated = true;
                update.invalidated.push(zone.id);
                continue;
            }
            if zone.is_tapped_by(bar) && !zone.tapped {
                zone.tapped = true;
                zone.tap_index = Some(index);
                update.tapped.push(zone.id);
            }
            if zone.tapped && !zone.rejected && zone.is_rejection(bar, wick_ratio) {
                zone.rejected = true;
                zone.rejection_index = Some(index);
                update.rejected.push(zone.id);
            }
        }

        if let Some(leg) = leg {
            match self.zones.iter_mut().find(|z| z.impulse.same_leg(leg)) {
                Some(zone) => {
                    if !zone.invalidated && !zone.expired && leg.end_index > zone.impulse.end_index {
                        zone.reanchor(leg);
                        update.extended = Some(zone.id);
                    }
                }
                None => {
                    let mut zone = OteZone::from_impulse(leg, index);
                    zone.id = self.zones.len();
                    update.created = Some(zone.id);
                    self.zones.push(zone);
                }
            }
        }

        update
    }

    pub fn get(&self, id: OteId) -> Option<&OteZone> {
        self.zones.get(id)
    }

    pub fn zones(&self) -> &[OteZone] {
        &self.zones
    }

    pub fn active(&self) -> impl Iterator<Item = &OteZone> {
        let (index, max_age) = (self.last_index, self.config.max_age_bars);
        self.zones.iter().filter(move |z| z.is_active(index, max_age))
    }

    pub fn newest_active(&self, direction: Bias) -> Option<&OteZone> {
        self.active().filter(|z| z.direction == direction).last()
    }

    /// Retire every setup, keeping the arena for audit
    pub fn expire_all(&mut self) {
        for zone in self.zones.iter_mut() {
            zone.expired = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::test_support::*;

    fn leg(direction: Bias, start: f64, end: f64) -> ImpulseLeg {
        let ts = bar_at(0, 0.0, 0.0, 0.0, 0.0).timestamp;
        ImpulseLeg {
            direction,
            start_price: start,
            end_price: end,
            start_index: 0,
            end_index: 4,
            start_time: ts,
            end_time: ts,
            displacement_index: 2,
            size_ticks: (end - start).abs() / 0.25,
            displacement_ratio: 3.0,
        }
    }

    #[test]
    fn test_bullish_levels() {
        let zone = OteZone::from_impulse(&leg(Bias::Bullish, 100.0, 200.0), 5);
        assert!((zone.top - 138.2).abs() < 1e-9);
        assert!((zone.midpoint - 129.5).abs() < 1e-9);
        assert!((zone.bottom - 121.4).abs() < 1e-9);
        assert!(zone.top >= zone.bottom);
    }

    #[test]
    fn test_bearish_levels_stay_ordered() {
        let zone = OteZone::from_impulse(&leg(Bias::Bearish, 200.0, 100.0), 5);
        assert!((zone.bottom - 161.8).abs() < 1e-9);
        assert!((zone.top - 178.6).abs() < 1e-9);
        assert!((zone.midpoint - 170.5).abs() < 1e-9);
        assert!(zone.top >= zone.bottom);
    }

    #[test]
    fn test_ordering_holds_for_any_leg() {
        for (start, end) in [(1.0, 2.0), (2.0, 1.0), (5000.0, 5000.25), (7000.0, 6950.0)] {
            for direction in [Bias::Bullish, Bias::Bearish] {
                let zone = OteZone::from_impulse(&leg(direction, start, end), 0);
                assert!(zone.top >= zone.bottom);
                assert!(zone.contains(zone.midpoint));
            }
        }
    }

    #[test]
    fn test_rejection_candle() {
        let zone = OteZone::from_impulse(&leg(Bias::Bullish, 100.0, 110.0), 5);
        // Zone 102.14 - 103.82
        let hammer = bar_at(0, 103.5, 104.0, 102.5, 103.9);
        assert!(zone.is_rejection(&hammer, 0.5));

        let bearish_bar = bar_at(0, 103.9, 104.0, 102.5, 103.5);
        assert!(!zone.is_rejection(&bearish_bar, 0.5));

        let no_touch = bar_at(0, 105.0, 106.0, 104.5, 105.5);
        assert!(!zone.is_tapped_by(&no_touch));
    }

    #[test]
    fn test_tracker_tap_is_monotonic() {
        let mut tracker = OteTracker::new(OteConfig::default());
        let mut history = BarHistory::new(100);
        let impulse = leg(Bias::Bullish, 100.0, 110.0);

        for i in 0..5 {
            history.push(bar_at(i, 105.0, 110.0, 104.0, 109.0));
        }
        let update = tracker.update(&history, Some(&impulse));
        let id = update.created.expect("zone");

        let closes = [
            (109.0, 109.5, 103.0, 103.8), // tap
            (103.8, 108.0, 103.6, 107.5), // away
            (107.5, 108.0, 107.0, 107.8),
        ];
        let mut flags = Vec::new();
        for (i, &(o, h, l, c)) in closes.iter().enumerate() {
            history.push(bar_at(5 + i as i64, o, h, l, c));
            let update = tracker.update(&history, Some(&impulse));
            assert!(update.created.is_none());
            flags.push(tracker.get(id).map(|z| z.tapped).unwrap_or(false));
        }
        assert_eq!(flags, vec![true, true, true]);
        assert_eq!(tracker.get(id).and_then(|z| z.tap_index), Some(5));
    }

    #[test]
    fn test_tracker_invalidation() {
        let mut tracker = OteTracker::new(OteConfig::default());
        let mut history = BarHistory::new(100);
        let impulse = leg(Bias::Bullish, 100.0, 110.0);
        for i in 0..5 {
            history.push(bar_at(i, 105.0, 110.0, 104.0, 109.0));
        }
        tracker.update(&history, Some(&impulse));
        history.push(bar_at(5, 101.0, 101.5, 98.0, 99.0));
        let update = tracker.update(&history, None);
        assert_eq!(update.invalidated, vec![0]);
        assert!(tracker.newest_active(Bias::Bullish).is_none());
    }

    #[test]
    fn test_extending_leg_reanchors_one_setup() {
        let mut tracker = OteTracker::new(OteConfig::default());
        let mut history = BarHistory::new(100);
        let first = leg(Bias::Bullish, 100.0, 110.0);
        for i in 0..5 {
            history.push(bar_at(i, 105.0, 110.0, 104.0, 109.0));
        }
        let id = tracker.update(&history, Some(&first)).created.expect("zone");

        let extended = ImpulseLeg {
            end_price: 115.0,
            end_index: 6,
            ..first.clone()
        };
        for i in 5..7 {
            history.push(bar_at(i, 109.0, 115.0, 108.5, 114.5));
            let update = tracker.update(&history, Some(&extended));
            assert!(update.created.is_none());
        }
        assert_eq!(tracker.zones().len(), 1);
        let zone = tracker.get(id).expect("zone");
        assert_eq!(zone.impulse.end_index, 6);
        assert!((zone.top - (115.0 - FIB_618 * 15.0)).abs() < 1e-9);
        assert_eq!(zone.created_index, 4);

        // A different origin is a new setup
        let other = ImpulseLeg {
            start_index: 5,
            displacement_index: 6,
            ..extended
        };
        history.push(bar_at(7, 114.5, 115.0, 114.0, 114.5));
        assert_eq!(tracker.update(&history, Some(&other)).created, Some(1));
    }

    #[test]
    fn test_rejection_recorded_once() {
        let mut tracker = OteTracker::new(OteConfig::default());
        let mut history = BarHistory::new(100);
        let impulse = leg(Bias::Bullish, 100.0, 110.0);
        for i in 0..5 {
            history.push(bar_at(i, 105.0, 110.0, 104.0, 109.0));
        }
        tracker.update(&history, Some(&impulse));

        // Zone 102.14 - 103.82: hammer closing inside
        history.push(bar_at(5, 103.5, 104.0, 102.5, 103.9));
        let update = tracker.update(&history, None);
        assert_eq!((update.tapped.clone(), update.rejected.clone()), (vec![0], vec![0]));
        history.push(bar_at(6, 103.5, 104.0, 102.5, 103.9));
        assert!(tracker.update(&history, None).rejected.is_empty());
        assert_eq!(tracker.get(0).and_then(|z| z.rejection_index), Some(5));
    }

    #[test]
    fn test_expire_all_deactivates_setups() {
        let mut tracker = OteTracker::new(OteConfig::default());
        let mut history = BarHistory::new(100);
        for i in 0..5 {
            history.push(bar_at(i, 105.0, 110.0, 104.0, 109.0));
        }
        tracker.update(&history, Some(&leg(Bias::Bullish, 100.0, 110.0)));
        assert!(tracker.newest_active(Bias::Bullish).is_some());

        tracker.expire_all();
        assert_eq!(tracker.zones().len(), 1);
        assert!(tracker.newest_active(Bias::Bullish).is_none());
    }
}
