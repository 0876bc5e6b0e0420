//! Entry filters applied to a finished setup
//!
//! Premium/discount: longs buy below equilibrium of the dealing range, shorts
//! sell above it. Trend: price must agree with an EMA, either by side or by a
//! recent crossover. Both pass when they lack data.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::signal::Bias;
use super::swings::{SwingKind, SwingPoint};

/// Ranges narrower than this many ticks carry no premium/discount information
pub const MIN_DEALING_RANGE_TICKS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceZone {
    Premium,
    Equilibrium,
    Discount,
}

impl std::fmt::Display for PriceZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceZone::Premium => write!(f, "PREMIUM"),
            PriceZone::Equilibrium => write!(f, "EQUILIBRIUM"),
            PriceZone::Discount => write!(f, "DISCOUNT"),
        }
    }
}

/// High/low that premium and discount are measured against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DealingRange {
    pub high: f64,
    pub low: f64,
}

impl DealingRange {
    pub fn size(&self) -> f64 {
        self.high - self.low
    }

    pub fn equilibrium(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// Zone of `price`, with a band of `buffer_pct` percent of the range
    /// either side of equilibrium
    pub fn zone_of(&self, price: f64, buffer_pct: f64) -> PriceZone {
        let buffer = self.size() * buffer_pct / 100.0;
        let eq = self.equilibrium();
        if price < eq - buffer {
            PriceZone::Discount
        } else if price > eq + buffer {
            PriceZone::Premium
        } else {
            PriceZone::Equilibrium
        }
    }

    pub fn allows(&self, bias: Bias, price: f64, buffer_pct: f64, tick_size: f64) -> bool {
        if self.size() < MIN_DEALING_RANGE_TICKS * tick_size {
            return true;
        }
        let buffer = self.size() * buffer_pct / 100.0;
        let eq = self.equilibrium();
        match bias {
            Bias::Bullish => price <= eq - buffer,
            Bias::Bearish => price >= eq + buffer,
        }
    }
}

/// Most extreme swing high and low formed at or after `since_index`
pub fn swing_dealing_range(swings: &[SwingPoint], since_index: usize) -> Option<DealingRange> {
    let recent = swings.iter().filter(|s| s.index >= since_index);
    let high = recent
        .clone()
        .filter(|s| s.kind == SwingKind::High)
        .map(|s| s.price)
        .reduce(f64::max)?;
    let low = recent
        .filter(|s| s.kind == SwingKind::Low)
        .map(|s| s.price)
        .reduce(f64::min)?;
    (high > low).then_some(DealingRange { high, low })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendFilterMode {
    /// Entry on the bias side of the EMA
    Simple,
    /// Close crossed the EMA in the bias direction within the lookback
    Crossover,
}

/// Exponential moving average seeded with the mean of the first `period` values
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: f64,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    pub fn push(&mut self, value: f64) -> Option<f64> {
        match self.value {
            Some(prev) => self.value = Some((value - prev) * self.multiplier + prev),
            None => {
                self.seed_sum += value;
                self.seed_count += 1;
                if self.seed_count >= self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// EMA plus the recent close/EMA pairs needed for crossover checks
#[derive(Debug, Clone)]
pub struct TrendTracker {
    ema: Ema,
    recent: VecDeque<(f64, f64)>,
    capacity: usize,
}

impl TrendTracker {
    pub fn new(period: usize, crossover_lookback_bars: usize) -> Self {
        let capacity = crossover_lookback_bars.max(1) + 1;
        Self {
            ema: Ema::new(period),
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, close: f64) {
        if let Some(ema) = self.ema.push(close) {
            self.recent.push_back((close, ema));
            if self.recent.len() > self.capacity {
                self.recent.pop_front();
            }
        }
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema.value()
    }

    pub fn allows(&self, bias: Bias, price: f64, mode: TrendFilterMode) -> bool {
        let Some(ema) = self.ema.value() else {
            return true;
        };
        match mode {
            TrendFilterMode::Simple => match bias {
                Bias::Bullish => price >= ema,
                Bias::Bearish => price <= ema,
            },
            TrendFilterMode::Crossover => {
                if self.recent.len() < 2 {
                    return true;
                }
                self.recent
                    .iter()
                    .zip(self.recent.iter().skip(1))
                    .any(|(&(prev_close, prev_ema), &(close, ema))| match bias {
                        Bias::Bullish => prev_close <= prev_ema && close > ema,
                        Bias::Bearish => prev_close >= prev_ema && close < ema,
                    })
            }
        }
    }
}
