//! Liquidity sweep detection
//!
//! A sweep is a bar whose extreme runs a tracked liquidity zone by a minimum
//! number of ticks and then closes back inside. Zones are clustered swing
//! points (buy-side above highs, sell-side below lows) plus the key levels
//! from [`super::levels`]. Sweeping a high (UP) implies a bearish bias,
//! sweeping a low (DOWN) a bullish one.

use super::bars::{to_ticks, Bar};
use super::signal::Bias;
use super::swings::{SwingKind, SwingPoint};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Minimum excursion beyond the level
    pub min_sweep_ticks: f64,
    /// Close must be back on the original side of the level
    pub require_close_back_inside: bool,
    /// Only swings this many bars old (or older) count as liquidity
    pub min_swing_age_bars: usize,
    /// Prior session high/low are tracked as liquidity
    pub use_session_levels: bool,
    /// Overnight (18:00 - 09:30 ET) high/low are tracked as liquidity
    pub use_overnight_levels: bool,
    /// Opening range high/low are tracked once the range is complete
    pub use_opening_range: bool,
    pub opening_range_minutes: u32,
    /// Same-side swings this close merge into one zone
    pub liquidity_cluster_ticks: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_sweep_ticks: 2.0,
            require_close_back_inside: true,
            min_swing_age_bars: 1,
            use_session_levels: true,
            use_overnight_levels: true,
            use_opening_range: true,
            opening_range_minutes: 15,
            liquidity_cluster_ticks: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
    /// A high was taken
    Up,
    /// A low was taken
    Down,
}

impl SweepDirection {
    pub fn bias(self) -> Bias {
        match self {
            SweepDirection::Up => Bias::Bearish,
            SweepDirection::Down => Bias::Bullish,
        }
    }
}

impl std::fmt::Display for SweepDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepDirection::Up => write!(f, "UP"),
            SweepDirection::Down => write!(f, "DOWN"),
        }
    }
}

/// Ordering matters: later variants outrank earlier ones in tie-breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SweepKind {
    Swing,
    OpeningRange,
    Overnight,
    PriorSession,
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepKind::Swing => write!(f, "SWING"),
            SweepKind::OpeningRange => write!(f, "OPENING_RANGE"),
            SweepKind::Overnight => write!(f, "OVERNIGHT"),
            SweepKind::PriorSession => write!(f, "PRIOR_SESSION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepEvent {
    pub direction: SweepDirection,
    pub swept_level: f64,
    pub kind: SweepKind,
    /// Bar that performed the sweep
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// Bar index of the swept swing, if any
    pub level_index: Option<usize>,
    pub excursion_ticks: f64,
    pub close: f64,
    /// 0.0 - 1.0
    pub strength: f64,
    /// Swings clustered into the swept zone, 1 for key levels
    pub liquidity_strength: u32,
}

impl SweepEvent {
    pub fn bias(&self) -> Bias {
        self.direction.bias()
    }
}

/// High/low of a trading session or one of its sub-ranges
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionLevels {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
}

impl SessionLevels {
    pub fn from_bar(date: NaiveDate, bar: &Bar) -> Self {
        Self {
            date,
            high: bar.high,
            low: bar.low,
        }
    }

    pub fn extend(&mut self, bar: &Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// High and low as sweepable zones
    pub fn liquidity(&self, kind: SweepKind) -> [LiquidityZone; 2] {
        [
            LiquidityZone::key_level(self.high, LevelSide::High, kind),
            LiquidityZone::key_level(self.low, LevelSide::Low, kind),
        ]
    }
}

/// Which side of the market a level sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelSide {
    /// Buy-side liquidity rests above highs
    High,
    /// Sell-side liquidity rests below lows
    Low,
}

/// Resting liquidity at one price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityZone {
    pub price: f64,
    pub side: LevelSide,
    pub kind: SweepKind,
    /// Bar index of the swing the zone is priced at
    pub level_index: Option<usize>,
    /// Swings merged into the zone
    pub strength: u32,
}

impl LiquidityZone {
    pub fn key_level(price: f64, side: LevelSide, kind: SweepKind) -> Self {
        Self {
            price,
            side,
            kind,
            level_index: None,
            strength: 1,
        }
    }
}

/// Cluster swings old enough to count into buy-side and sell-side zones.
///
/// A swing within `liquidity_cluster_ticks` of an existing same-side zone
/// joins it: the zone's strength grows and its price moves to the more
/// extreme of the two (ties go to the newer swing).
pub fn define_liquidity_zones(
    swings: &[SwingPoint],
    index: usize,
    config: &SweepConfig,
    tick_size: f64,
) -> Vec<LiquidityZone> {
    let threshold = config.liquidity_cluster_ticks.max(0.0) * tick_size;
    let mut zones: Vec<LiquidityZone> = Vec::new();

    for swing in swings.iter().filter(|s| s.index + config.min_swing_age_bars <= index) {
        let side = match swing.kind {
            SwingKind::High => LevelSide::High,
            SwingKind::Low => LevelSide::Low,
        };
        let existing = zones
            .iter_mut()
            .find(|z| z.side == side && (z.price - swing.price).abs() <= threshold + 1e-9);
        match existing {
            Some(zone) => {
                zone.strength += 1;
                let at_least_as_extreme = match side {
                    LevelSide::High => swing.price >= zone.price,
                    LevelSide::Low => swing.price <= zone.price,
                };
                if at_least_as_extreme {
                    zone.price = swing.price;
                    zone.level_index = Some(swing.index);
                }
            }
            None => zones.push(LiquidityZone {
                price: swing.price,
                side,
                kind: SweepKind::Swing,
                level_index: Some(swing.index),
                strength: 1,
            }),
        }
    }

    zones
}

/// Check one level against the current bar
pub fn check_sweep_at_level(
    bar: &Bar,
    index: usize,
    level: f64,
    side: LevelSide,
    kind: SweepKind,
    config: &SweepConfig,
    tick_size: f64,
) -> Option<SweepEvent> {
    let min_distance = config.min_sweep_ticks * tick_size;

    let (direction, excursion, wick) = match side {
        LevelSide::High => {
            let excursion = bar.high - level;
            if excursion < min_distance || excursion <= 0.0 {
                return None;
            }
            if config.require_close_back_inside && bar.close >= level {
                return None;
            }
            (SweepDirection::Up, excursion, bar.upper_wick())
        }
        LevelSide::Low => {
            let excursion = level - bar.low;
            if excursion < min_distance || excursion <= 0.0 {
                return None;
            }
            if config.require_close_back_inside && bar.close <= level {
                return None;
            }
            (SweepDirection::Down, excursion, bar.lower_wick())
        }
    };

    let excursion_ticks = to_ticks(excursion, tick_size);
    Some(SweepEvent {
        direction,
        swept_level: level,
        kind,
        index,
        timestamp: bar.timestamp,
        level_index: None,
        excursion_ticks,
        close: bar.close,
        strength: sweep_strength(bar, excursion_ticks, wick),
        liquidity_strength: 1,
    })
}

/// Deeper runs with long rejection wicks score higher
pub fn sweep_strength(bar: &Bar, excursion_ticks: f64, rejection_wick: f64) -> f64 {
    let depth = (0.2 + excursion_ticks * 0.075).min(0.8);
    let range = bar.range();
    let wick_ratio = if range > 0.0 { rejection_wick / range } else { 0.0 };
    let rejection = (wick_ratio * 0.3).min(0.2);
    (depth + rejection).min(1.0)
}

/// All sweeps performed by `bar` against the given liquidity
pub fn detect_sweeps(
    bar: &Bar,
    index: usize,
    liquidity: &[LiquidityZone],
    config: &SweepConfig,
    tick_size: f64,
) -> Vec<SweepEvent> {
    liquidity
        .iter()
        .filter_map(|zone| {
            let mut sweep = check_sweep_at_level(bar, index, zone.price, zone.side, zone.kind, config, tick_size)?;
            sweep.level_index = zone.level_index;
            sweep.liquidity_strength = zone.strength;
            Some(sweep)
        })
        .collect()
}

/// Pick the single sweep that drives the setup.
///
/// Key levels outrank swings (prior session, then overnight, then opening
/// range), then the larger excursion wins, then higher strength, then the
/// more recently formed level.
pub fn most_significant_sweep(sweeps: Vec<SweepEvent>) -> Option<SweepEvent> {
    sweeps.into_iter().max_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then(a.excursion_ticks.total_cmp(&b.excursion_ticks))
            .then(a.strength.total_cmp(&b.strength))
            .then(a.level_index.unwrap_or(usize::MAX).cmp(&b.level_index.unwrap_or(usize::MAX)))
    })
}
