//! Impulse leg detection
//!
//! An impulse is anchored on the most recent displacement-sized candle, then
//! stretched back to the swing it launched from and forward to the extreme
//! it ran to.

use super::bars::{to_ticks, Bar};
use super::signal::Bias;
use super::swings::{is_swing_high, is_swing_low};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpulseConfig {
    /// Anchor candle body vs average body
    pub body_multiplier: f64,
    /// Bars each side to confirm the origin swing
    pub swing_lookback: usize,
    pub min_leg_ticks: f64,
    /// Furthest the anchor (and leg ends) may sit from the newest bar
    pub max_bars_back: usize,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        Self {
            body_multiplier: 2.0,
            swing_lookback: 3,
            min_leg_ticks: 10.0,
            max_bars_back: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpulseLeg {
    pub direction: Bias,
    pub start_price: f64,
    pub end_price: f64,
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Anchor candle
    pub displacement_index: usize,
    pub size_ticks: f64,
    /// Anchor body / average body
    pub displacement_ratio: f64,
}

impl ImpulseLeg {
    pub fn high(&self) -> f64 {
        self.start_price.max(self.end_price)
    }

    pub fn low(&self) -> f64 {
        self.start_price.min(self.end_price)
    }

    pub fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// Same anchor and origin as `other`
    pub fn same_leg(&self, other: &ImpulseLeg) -> bool {
        self.direction == other.direction
            && self.start_index == other.start_index
            && self.displacement_index == other.displacement_index
    }
}

/// Find the current impulse leg in `bars` (`bars[0]` has index `first_index`)
pub fn detect_impulse(
    bars: &[Bar],
    first_index: usize,
    average_body: f64,
    config: &ImpulseConfig,
    tick_size: f64,
) -> Option<ImpulseLeg> {
    let n = bars.len();
    if n < config.swing_lookback * 2 + 5 || average_body <= 0.0 {
        return None;
    }

    let oldest = n.saturating_sub(config.max_bars_back + 1);
    let anchor = (oldest..n)
        .rev()
        .find(|&k| bars[k].body() >= config.body_multiplier * average_body && bars[k].open != bars[k].close)?;
    let anchor_bar = &bars[anchor];
    let direction = if anchor_bar.is_bullish() { Bias::Bullish } else { Bias::Bearish };

    // Walk back to the origin swing, remembering the extreme seen on the way
    let lookback = config.swing_lookback;
    let floor = anchor.saturating_sub(config.max_bars_back);
    let mut origin = anchor;
    let mut found_swing = false;
    for j in (floor..=anchor).rev() {
        let better = match direction {
            Bias::Bullish => bars[j].low < bars[origin].low,
            Bias::Bearish => bars[j].high > bars[origin].high,
        };
        if better {
            origin = j;
        }
        if j < anchor {
            let confirmed = match direction {
                Bias::Bullish => is_swing_low(bars, j, lookback.min(j), lookback),
                Bias::Bearish => is_swing_high(bars, j, lookback.min(j), lookback),
            };
            if confirmed {
                origin = j;
                found_swing = true;
                break;
            }
        }
    }
    if !found_swing && origin == anchor {
        return None;
    }

    // Forward to the furthest extreme in the direction of travel
    let last = (anchor + config.max_bars_back).min(n - 1);
    let mut extreme = anchor;
    for k in anchor..=last {
        let better = match direction {
            Bias::Bullish => bars[k].high > bars[extreme].high,
            Bias::Bearish => bars[k].low < bars[extreme].low,
        };
        if better {
            extreme = k;
        }
    }

    let (start_price, end_price) = match direction {
        Bias::Bullish => (bars[origin].low, bars[extreme].high),
        Bias::Bearish => (bars[origin].high, bars[extreme].low),
    };
    let size_ticks = to_ticks((end_price - start_price).abs(), tick_size);
    if size_ticks < config.min_leg_ticks {
        return None;
    }

    Some(ImpulseLeg {
        direction,
        start_price,
        end_price,
        start_index: first_index + origin,
        end_index: first_index + extreme,
        start_time: bars[origin].timestamp,
        end_time: bars[extreme].timestamp,
        displacement_index: first_index + anchor,
        size_ticks,
        displacement_ratio: anchor_bar.body() / average_body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::test_support::*;

    /// Drift down into a swing low, then a large bullish candle and follow-through
    fn bullish_leg_bars() -> Vec<Bar> {
        bars_from(&[
            (105.0, 105.5, 104.5, 104.75),
            (104.75, 105.0, 104.0, 104.25),
            (104.25, 104.5, 103.5, 103.75),
            (103.75, 104.0, 103.0, 103.25),
            (103.25, 103.5, 102.5, 102.75),
            (102.75, 103.0, 102.0, 102.5), // origin low 102.0
            (102.5, 103.0, 102.25, 102.75),
            (102.75, 103.25, 102.5, 103.0),
            (103.0, 103.5, 102.75, 103.25),
            (103.25, 106.5, 103.0, 106.25), // anchor, body 3.0
            (106.25, 107.5, 106.0, 107.0),
            (107.25, 107.75, 106.75, 107.0),
            (107.0, 107.25, 106.5, 106.75),
        ])
    }

    #[test]
    fn test_detects_bullish_leg() {
        let bars = bullish_leg_bars();
        let leg = detect_impulse(&bars, 50, 0.5, &ImpulseConfig::default(), 0.25).expect("impulse");
        assert_eq!(leg.direction, Bias::Bullish);
        assert_eq!(leg.start_price, 102.0);
        assert_eq!(leg.start_index, 55);
        assert_eq!(leg.end_price, 107.75);
        assert_eq!(leg.end_index, 61);
        assert_eq!(leg.displacement_index, 59);
        assert_eq!(leg.size_ticks, 23.0);
        assert!((leg.displacement_ratio - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_small_leg() {
        let bars = bullish_leg_bars();
        let config = ImpulseConfig {
            min_leg_ticks: 40.0,
            ..Default::default()
        };
        assert!(detect_impulse(&bars, 0, 0.5, &config, 0.25).is_none());
    }

    #[test]
    fn test_no_anchor_no_leg() {
        let bars = bullish_leg_bars();
        // Average body so large nothing qualifies
        assert!(detect_impulse(&bars, 0, 10.0, &ImpulseConfig::default(), 0.25).is_none());
        assert!(detect_impulse(&bars[..8], 0, 0.5, &ImpulseConfig::default(), 0.25).is_none());
    }

    #[test]
    fn test_bearish_leg_mirrors() {
        let mirrored: Vec<Bar> = bullish_leg_bars()
            .into_iter()
            .map(|b| {
                let mut m = b.clone();
                m.open = 200.0 - b.open;
                m.close = 200.0 - b.close;
                m.high = 200.0 - b.low;
                m.low = 200.0 - b.high;
                m
            })
            .collect();
        let leg = detect_impulse(&mirrored, 0, 0.5, &ImpulseConfig::default(), 0.25).expect("impulse");
        assert_eq!(leg.direction, Bias::Bearish);
        assert_eq!(leg.start_price, 98.0);
        assert_eq!(leg.end_price, 92.25);
        assert!(leg.high() >= leg.low());
    }
}
