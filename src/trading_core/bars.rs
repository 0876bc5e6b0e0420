//! Bars, bounded bar history and rolling statistics
//!
//! Every bar pushed into a [`BarHistory`] receives a monotonically increasing
//! sequence index. All age and timeout arithmetic elsewhere in the engine is done
//! on these indices, never on positions inside the (pruned) backing vector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// OHLCV bar for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: u64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

fn default_timeframe() -> String {
    "1m".to_string()
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            symbol: String::new(),
            timeframe: default_timeframe(),
        }
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = symbol.to_string();
        self
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Body as a fraction of total range, `None` for zero-range bars
    pub fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        if range > 0.0 {
            Some(self.body() / range)
        } else {
            None
        }
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self
                .range()
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => self.range(),
        }
    }

    /// Finite prices, high >= low, open and close inside the range
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return false;
        }
        self.high >= self.low
            && self.open <= self.high
            && self.open >= self.low
            && self.close <= self.high
            && self.close >= self.low
    }
}

/// Convert a price distance to ticks
pub fn to_ticks(distance: f64, tick_size: f64) -> f64 {
    if tick_size > 0.0 {
        distance / tick_size
    } else {
        0.0
    }
}

/// Round a price to the nearest tick
pub fn round_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size > 0.0 {
        (price / tick_size).round() * tick_size
    } else {
        price
    }
}

/// Average true range over a slice (first bar only seeds the previous close)
pub fn calculate_atr(bars: &[Bar]) -> f64 {
    if bars.len() < 2 {
        return if let Some(bar) = bars.first() {
            bar.range()
        } else {
            0.0
        };
    }

    let mut sum_tr = 0.0;
    let mut prev_close = bars[0].close;

    for bar in bars.iter().skip(1) {
        sum_tr += bar.true_range(Some(prev_close));
        prev_close = bar.close;
    }

    sum_tr / (bars.len() - 1) as f64
}

/// Bounded bar history with absolute sequence indices
#[derive(Debug, Clone)]
pub struct BarHistory {
    bars: Vec<Bar>,
    /// Sequence index of `bars[0]`
    first_index: usize,
    capacity: usize,
}

impl BarHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: Vec::with_capacity(capacity),
            first_index: 0,
            capacity: capacity.max(1),
        }
    }

    /// Append a bar and return its sequence index
    pub fn push(&mut self, bar: Bar) -> usize {
        let index = self.first_index + self.bars.len();
        self.bars.push(bar);

        // Prune in batches so the backing vector isn't shifted on every bar
        let max_len = self.capacity + self.capacity / 2;
        if self.bars.len() > max_len {
            let excess = self.bars.len() - self.capacity;
            self.bars.drain(..excess);
            self.first_index += excess;
        }

        index
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn first_index(&self) -> usize {
        self.first_index
    }

    pub fn last_index(&self) -> Option<usize> {
        if self.bars.is_empty() {
            None
        } else {
            Some(self.first_index + self.bars.len() - 1)
        }
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        index
            .checked_sub(self.first_index)
            .and_then(|pos| self.bars.get(pos))
    }

    /// The most recent `n` bars and the sequence index of the first one
    pub fn window(&self, n: usize) -> (&[Bar], usize) {
        let start = self.bars.len().saturating_sub(n);
        (&self.bars[start..], self.first_index + start)
    }

    /// Like [`window`](Self::window) but excluding the newest bar
    pub fn window_before_last(&self, n: usize) -> (&[Bar], usize) {
        let end = self.bars.len().saturating_sub(1);
        let start = end.saturating_sub(n);
        (&self.bars[start..end], self.first_index + start)
    }
}

/// Fixed-period rolling mean
#[derive(Debug, Clone)]
pub struct RollingMean {
    samples: VecDeque<f64>,
    period: usize,
    sum: f64,
}

impl RollingMean {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            samples: VecDeque::with_capacity(period),
            period,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.samples.push_back(value);
        self.sum += value;
        if self.samples.len() > self.period {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
    }

    /// True once `period` samples have been seen
    pub fn is_ready(&self) -> bool {
        self.samples.len() >= self.period
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }
}
