//! Fair value gap tracking
//!
//! Zones live in an append-only arena and are referred to by [`FvgId`].
//! Mitigated, aged-out or expired zones stay in the arena for audit; they are
//! only skipped when searching for entries.

use super::bars::{to_ticks, Bar, BarHistory};
use super::signal::Bias;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type FvgId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MitigationRule {
    /// Any later bar trading into the zone
    Touch,
    /// A later close beyond the far edge
    CloseThrough,
}

/// Where inside a zone the entry order rests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryMode {
    /// Edge price reaches first
    FirstTouch,
    Midpoint,
    /// Deepest edge
    FarEdge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FvgConfig {
    pub min_fvg_ticks: f64,
    /// Zones older than this are inactive
    pub max_age_bars: usize,
    pub mitigation: MitigationRule,
}

impl Default for FvgConfig {
    fn default() -> Self {
        Self {
            min_fvg_ticks: 2.0,
            max_age_bars: 50,
            mitigation: MitigationRule::Touch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FvgZone {
    pub id: FvgId,
    pub direction: Bias,
    pub low: f64,
    pub high: f64,
    pub midpoint: f64,
    /// Index of the third bar of the pattern
    pub created_index: usize,
    pub timestamp: DateTime<Utc>,
    pub mitigated: bool,
    pub mitigated_index: Option<usize>,
    /// Bars since creation
    pub age: usize,
    /// Retired at a session change
    #[serde(default)]
    pub expired: bool,
}

impl FvgZone {
    pub fn size(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_active(&self, max_age_bars: usize) -> bool {
        !self.mitigated && !self.expired && self.age <= max_age_bars
    }

    pub fn entry_price(&self, mode: EntryMode) -> f64 {
        match (mode, self.direction) {
            (EntryMode::Midpoint, _) => self.midpoint,
            (EntryMode::FirstTouch, Bias::Bullish) | (EntryMode::FarEdge, Bias::Bearish) => self.high,
            (EntryMode::FirstTouch, Bias::Bearish) | (EntryMode::FarEdge, Bias::Bullish) => self.low,
        }
    }

    /// Whether `bar` mitigates the zone under `rule`
    pub fn is_mitigated_by(&self, bar: &Bar, rule: MitigationRule) -> bool {
        match (rule, self.direction) {
            (MitigationRule::Touch, Bias::Bullish) => bar.low <= self.high,
            (MitigationRule::Touch, Bias::Bearish) => bar.high >= self.low,
            (MitigationRule::CloseThrough, Bias::Bullish) => bar.close < self.low,
            (MitigationRule::CloseThrough, Bias::Bearish) => bar.close > self.high,
        }
    }

    /// Price ranges intersect
    pub fn overlaps(&self, low: f64, high: f64) -> bool {
        self.low <= high && self.high >= low
    }
}

/// Check the three bars ending at `third` for a gap
pub fn detect_fvg(first: &Bar, third: &Bar, index: usize, min_fvg_ticks: f64, tick_size: f64) -> Option<FvgZone> {
    let (direction, low, high) = if first.high < third.low {
        (Bias::Bullish, first.high, third.low)
    } else if first.low > third.high {
        (Bias::Bearish, third.high, first.low)
    } else {
        return None;
    };

    if to_ticks(high - low, tick_size) < min_fvg_ticks {
        return None;
    }

    Some(FvgZone {
        id: 0,
        direction,
        low,
        high,
        midpoint: (low + high) / 2.0,
        created_index: index,
        timestamp: third.timestamp,
        mitigated: false,
        mitigated_index: None,
        age: 0,
        expired: false,
    })
}

#[derive(Debug, Clone)]
pub struct FvgTracker {
    config: FvgConfig,
    tick_size: f64,
    zones: Vec<FvgZone>,
}

impl FvgTracker {
    pub fn new(config: FvgConfig, tick_size: f64) -> Self {
        Self {
            config,
            tick_size,
            zones: Vec::new(),
        }
    }

    pub fn config(&self) -> &FvgConfig {
        &self.config
    }

    /// Process the newest bar in `history`.
    ///
    /// Existing zones are aged and checked for mitigation first, then the
    /// newest three bars are checked for a fresh gap. Returns the id of a
    /// zone created by this bar.
    pub fn update(&mut self, history: &BarHistory) -> Option<FvgId> {
        let index = history.last_index()?;
        let bar = history.get(index)?;

        for zone in self.zones.iter_mut() {
            zone.age = index.saturating_sub(zone.created_index);
            if zone.mitigated || zone.expired || zone.created_index >= index {
                continue;
            }
            if zone.is_mitigated_by(bar, self.config.mitigation) {
                zone.mitigated = true;
                zone.mitigated_index = Some(index);
            }
        }

        let first = history.get(index.checked_sub(2)?)?;
        let mut zone = detect_fvg(first, bar, index, self.config.min_fvg_ticks, self.tick_size)?;
        let id = self.zones.len();
        zone.id = id;
        self.zones.push(zone);
        Some(id)
    }

    pub fn get(&self, id: FvgId) -> Option<&FvgZone> {
        self.zones.get(id)
    }

    /// Full arena, mitigated and expired zones included
    pub fn zones(&self) -> &[FvgZone] {
        &self.zones
    }

    pub fn active(&self) -> impl Iterator<Item = &FvgZone> {
        let max_age = self.config.max_age_bars;
        self.zones.iter().filter(move |z| z.is_active(max_age))
    }

    /// Newest active zone in `direction` created at or after `since_index`
    pub fn newest_active(&self, direction: Bias, since_index: usize) -> Option<&FvgZone> {
        self.active()
            .filter(|z| z.direction == direction && z.created_index >= since_index)
            .last()
    }

    /// Retire every zone. Ids stay valid and zones keep their history.
    pub fn expire_all(&mut self) {
        for zone in self.zones.iter_mut().filter(|z| !z.expired) {
            zone.expired = true;
        }
    }
}
