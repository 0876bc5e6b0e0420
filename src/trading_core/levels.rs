//! Key levels tracked through the trading day
//!
//! - Prior session: high/low of the previous New York calendar date
//! - Overnight (ONH/ONL): 18:00 ET to the 09:30 ET open of the next day
//! - Opening range: the first `opening_range_minutes` of regular hours
//!
//! Overnight and opening-range levels only become liquidity once their
//! window has closed. Both are spent at the next date change.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::America::New_York;
use tracing::{debug, info};

use super::bars::Bar;
use super::session::trading_date;
use super::sweep::{LiquidityZone, SessionLevels, SweepConfig, SweepKind};

/// RTH session times, minutes after midnight ET
pub const RTH_OPEN_MINUTE: u32 = 9 * 60 + 30;
pub const RTH_CLOSE_MINUTE: u32 = 16 * 60;

/// Overnight session starts at 6pm ET
pub const OVERNIGHT_START_MINUTE: u32 = 18 * 60;

/// Minutes after midnight in New York
pub fn ny_minute_of_day(timestamp: DateTime<Utc>) -> u32 {
    let et = timestamp.with_timezone(&New_York);
    et.hour() * 60 + et.minute()
}

/// A bar opened a new New York date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRoll {
    pub date: NaiveDate,
    /// Levels of the date that just ended
    pub closed: Option<SessionLevels>,
}

#[derive(Debug, Clone)]
pub struct KeyLevelTracker {
    opening_range_minutes: u32,
    current_date: Option<NaiveDate>,
    running_session: Option<SessionLevels>,
    prior_session: Option<SessionLevels>,
    /// Dated by the day its window started
    overnight_building: Option<SessionLevels>,
    overnight: Option<SessionLevels>,
    opening_range_building: Option<SessionLevels>,
    opening_range: Option<SessionLevels>,
}

impl KeyLevelTracker {
    pub fn new(config: &SweepConfig) -> Self {
        Self {
            opening_range_minutes: config.opening_range_minutes,
            current_date: None,
            running_session: None,
            prior_session: None,
            overnight_building: None,
            overnight: None,
            opening_range_building: None,
            opening_range: None,
        }
    }

    /// Fold one bar in. Returns the roll when the bar starts a new date.
    pub fn update(&mut self, bar: &Bar) -> Option<DateRoll> {
        let date = trading_date(bar.timestamp);
        let minute = ny_minute_of_day(bar.timestamp);
        let mut roll = None;

        if self.current_date == Some(date) {
            if let Some(levels) = self.running_session.as_mut() {
                levels.extend(bar);
            }
        } else {
            if self.current_date.is_some() {
                let closed = self.running_session.take();
                if let Some(done) = closed {
                    self.prior_session = Some(done);
                }
                self.overnight = None;
                self.opening_range = None;
                self.opening_range_building = None;
                roll = Some(DateRoll { date, closed });
            }
            self.current_date = Some(date);
            self.running_session = Some(SessionLevels::from_bar(date, bar));
        }

        self.update_overnight(date, minute, bar);
        self.update_opening_range(date, minute, bar);
        roll
    }

    fn update_overnight(&mut self, date: NaiveDate, minute: u32, bar: &Bar) {
        if minute >= OVERNIGHT_START_MINUTE {
            match self.overnight_building.as_mut() {
                Some(range) if range.date == date => range.extend(bar),
                _ => self.overnight_building = Some(SessionLevels::from_bar(date, bar)),
            }
        } else if minute < RTH_OPEN_MINUTE {
            match self.overnight_building.as_mut() {
                Some(range) if range.date == date || range.date.succ_opt() == Some(date) => range.extend(bar),
                _ => self.overnight_building = Some(SessionLevels::from_bar(date, bar)),
            }
        } else if let Some(range) = self.overnight_building.take() {
            info!("Overnight {}: H {:.2} L {:.2}", date, range.high, range.low);
            self.overnight = Some(SessionLevels { date, ..range });
        }
    }

    fn update_opening_range(&mut self, date: NaiveDate, minute: u32, bar: &Bar) {
        let end = RTH_OPEN_MINUTE + self.opening_range_minutes;
        if (RTH_OPEN_MINUTE..end).contains(&minute) {
            match self.opening_range_building.as_mut() {
                Some(range) => range.extend(bar),
                None => self.opening_range_building = Some(SessionLevels::from_bar(date, bar)),
            }
        } else if minute >= end && minute < RTH_CLOSE_MINUTE {
            if let Some(range) = self.opening_range_building.take() {
                debug!("Opening range {}: H {:.2} L {:.2}", date, range.high, range.low);
                self.opening_range = Some(range);
            }
        }
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current_date
    }

    pub fn prior_session(&self) -> Option<&SessionLevels> {
        self.prior_session.as_ref()
    }

    pub fn set_prior_session(&mut self, levels: SessionLevels) {
        self.prior_session = Some(levels);
    }

    pub fn overnight(&self) -> Option<&SessionLevels> {
        self.overnight.as_ref()
    }

    pub fn opening_range(&self) -> Option<&SessionLevels> {
        self.opening_range.as_ref()
    }

    /// Enabled key levels as sweepable zones
    pub fn liquidity(&self, config: &SweepConfig) -> Vec<LiquidityZone> {
        let sources = [
            (config.use_session_levels, self.prior_session, SweepKind::PriorSession),
            (config.use_overnight_levels, self.overnight, SweepKind::Overnight),
            (config.use_opening_range, self.opening_range, SweepKind::OpeningRange),
        ];
        let mut zones = Vec::new();
        for (enabled, levels, kind) in sources {
            if let (true, Some(levels)) = (enabled, levels) {
                zones.extend(levels.liquidity(kind));
            }
        }
        zones
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::test_support::*;
    use crate::trading_core::sweep::LevelSide;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).expect("date")
    }

    #[test]
    fn test_ny_minute_of_day() {
        // bar_at(0) is 09:30 ET in January
        assert_eq!(ny_minute_of_day(bar_at(0, 1.0, 1.0, 1.0, 1.0).timestamp), RTH_OPEN_MINUTE);
        assert_eq!(ny_minute_of_day(bar_at(-930, 1.0, 1.0, 1.0, 1.0).timestamp), OVERNIGHT_START_MINUTE);
    }

    #[test]
    fn test_overnight_and_opening_range() {
        let mut tracker = KeyLevelTracker::new(&SweepConfig::default());

        // Sunday evening open, then the early hours of Monday
        assert!(tracker.update(&bar_at(-930, 100.0, 101.0, 99.5, 100.5)).is_none());
        tracker.update(&bar_at(-900, 100.5, 105.0, 100.0, 104.0));
        let roll = tracker.update(&bar_at(-300, 104.0, 104.5, 98.0, 99.0)).expect("roll");
        assert_eq!(roll.date, date(6));
        assert_eq!(roll.closed.map(|l| (l.high, l.low)), Some((105.0, 99.5)));
        assert!(tracker.overnight().is_none());

        // The 09:30 bar closes the overnight window and opens the range
        tracker.update(&bar_at(0, 100.0, 102.0, 99.0, 101.0));
        let overnight = tracker.overnight().copied().expect("overnight");
        assert_eq!((overnight.date, overnight.high, overnight.low), (date(6), 105.0, 98.0));

        for minute in 1..15 {
            tracker.update(&bar_at(minute, 101.0, 101.0 + minute as f64 * 0.25, 100.5, 101.0));
        }
        assert!(tracker.opening_range().is_none());

        tracker.update(&bar_at(15, 101.0, 110.0, 90.0, 101.0));
        let range = tracker.opening_range().copied().expect("opening range");
        assert_eq!((range.high, range.low), (104.5, 99.0));

        let zones = tracker.liquidity(&SweepConfig::default());
        let kinds: Vec<_> = zones.iter().map(|z| (z.kind, z.side)).collect();
        assert_eq!(
            kinds,
            vec![
                (SweepKind::PriorSession, LevelSide::High),
                (SweepKind::PriorSession, LevelSide::Low),
                (SweepKind::Overnight, LevelSide::High),
                (SweepKind::Overnight, LevelSide::Low),
                (SweepKind::OpeningRange, LevelSide::High),
                (SweepKind::OpeningRange, LevelSide::Low),
            ]
        );
        assert!(zones.iter().all(|z| z.strength == 1 && z.level_index.is_none()));
    }

    #[test]
    fn test_levels_are_gated_and_spent_at_date_change() {
        let config = SweepConfig {
            use_overnight_levels: false,
            use_opening_range: false,
            ..Default::default()
        };
        let mut tracker = KeyLevelTracker::new(&config);
        for minute in [-300, 0, 1, 20] {
            tracker.update(&bar_at(minute, 100.0, 101.0, 99.0, 100.0));
        }
        assert!(tracker.overnight().is_some());
        assert!(tracker.opening_range().is_some());
        assert!(tracker.liquidity(&config).is_empty());

        tracker.update(&bar_at(24 * 60 - 300, 100.0, 101.0, 99.0, 100.0));
        assert!(tracker.overnight().is_none());
        assert!(tracker.opening_range().is_none());
        let zones = tracker.liquidity(&config);
        assert_eq!(zones.len(), 2);
        assert!(zones.iter().all(|z| z.kind == SweepKind::PriorSession));
    }
}
