//! Swing point detection
//!
//! A bar is a swing high when its high is >= every other high within
//! `left` bars before and `right` bars after it (mirror rule for swing lows).
//! The `right` most recent bars can never be classified yet.

use super::bars::Bar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Bars required before the candidate
    pub left_bars: usize,
    /// Bars required after the candidate (confirmation lag)
    pub right_bars: usize,
    /// Only the most recent bars are scanned each call
    pub max_window: usize,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            left_bars: 3,
            right_bars: 1,
            max_window: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

impl std::fmt::Display for SwingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwingKind::High => write!(f, "HIGH"),
            SwingKind::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub price: f64,
    pub kind: SwingKind,
    /// Sequence index of the swing bar
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub left_bars: usize,
    pub right_bars: usize,
}

/// Neighbour range for position `i`, `None` when it can't be classified
fn neighbours(len: usize, i: usize, left: usize, right: usize) -> Option<(usize, usize)> {
    if i < left || i + right >= len {
        return None;
    }
    Some((i - left, i + right))
}

pub fn is_swing_high(bars: &[Bar], i: usize, left: usize, right: usize) -> bool {
    let Some((from, to)) = neighbours(bars.len(), i, left, right) else {
        return false;
    };
    let high = bars[i].high;
    (from..=to).filter(|&j| j != i).all(|j| high >= bars[j].high)
}

pub fn is_swing_low(bars: &[Bar], i: usize, left: usize, right: usize) -> bool {
    let Some((from, to)) = neighbours(bars.len(), i, left, right) else {
        return false;
    };
    let low = bars[i].low;
    (from..=to).filter(|&j| j != i).all(|j| low <= bars[j].low)
}

/// Detect swings over the last `config.max_window` bars.
///
/// `first_index` is the sequence index of `bars[0]`. The result is ordered by
/// bar index; a bar that is both a swing high and a swing low (outside bar)
/// produces two points, high first.
pub fn detect_swings(bars: &[Bar], first_index: usize, config: &SwingConfig) -> Vec<SwingPoint> {
    let start = bars.len().saturating_sub(config.max_window);
    let window = &bars[start..];
    let base = first_index + start;

    let mut swings = Vec::new();
    for i in 0..window.len() {
        if is_swing_high(window, i, config.left_bars, config.right_bars) {
            swings.push(SwingPoint {
                price: window[i].high,
                kind: SwingKind::High,
                index: base + i,
                timestamp: window[i].timestamp,
                left_bars: config.left_bars,
                right_bars: config.right_bars,
            });
        }
        if is_swing_low(window, i, config.left_bars, config.right_bars) {
            swings.push(SwingPoint {
                price: window[i].low,
                kind: SwingKind::Low,
                index: base + i,
                timestamp: window[i].timestamp,
                left_bars: config.left_bars,
                right_bars: config.right_bars,
            });
        }
    }
    swings
}

/// Most recent swing of `kind` at or before `max_index`
pub fn last_swing_before(swings: &[SwingPoint], kind: SwingKind, max_index: usize) -> Option<&SwingPoint> {
    swings
        .iter()
        .rev()
        .find(|s| s.kind == kind && s.index <= max_index)
}
