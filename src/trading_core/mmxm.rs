//! Market maker model phase tracking
//!
//! NONE -> ACCUMULATION -> MANIPULATION -> DISTRIBUTION -> EXPANSION
//!
//! Each phase has its own bar budget. Running out of budget drops the whole
//! tracker back to NONE; a phase is never skipped and never rolls back to an
//! earlier non-NONE phase.

use super::bars::{calculate_atr, to_ticks, BarHistory};
use super::displacement::DisplacementEvent;
use super::fvg::FvgZone;
use super::signal::Bias;
use super::sweep::{SweepDirection, SweepEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MmxmConfig {
    /// History needed before anything is evaluated
    pub min_history_bars: usize,
    pub short_atr_period: usize,
    pub long_atr_period: usize,
    /// Short ATR must be at most this fraction of long ATR
    pub accumulation_atr_ratio: f64,
    pub min_accumulation_bars: usize,
    /// Bars after accumulation ends for a sweep to show up
    pub manipulation_timeout_bars: usize,
    /// Bars after the sweep for displacement + FVG
    pub distribution_timeout_bars: usize,
    /// Bars after distribution for the close beyond the FVG
    pub expansion_timeout_bars: usize,
    /// Bars expansion is held before the cycle restarts
    pub expansion_hold_bars: usize,
    pub min_fvg_ticks: f64,
}

impl Default for MmxmConfig {
    fn default() -> Self {
        Self {
            min_history_bars: 25,
            short_atr_period: 20,
            long_atr_period: 50,
            accumulation_atr_ratio: 0.6,
            min_accumulation_bars: 10,
            manipulation_timeout_bars: 20,
            distribution_timeout_bars: 15,
            expansion_timeout_bars: 20,
            expansion_hold_bars: 20,
            min_fvg_ticks: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MmxmPhase {
    None,
    Accumulation,
    Manipulation,
    Distribution,
    Expansion,
}

impl MmxmPhase {
    /// The only non-reset successor
    pub fn next(self) -> Option<MmxmPhase> {
        match self {
            MmxmPhase::None => Some(MmxmPhase::Accumulation),
            MmxmPhase::Accumulation => Some(MmxmPhase::Manipulation),
            MmxmPhase::Manipulation => Some(MmxmPhase::Distribution),
            MmxmPhase::Distribution => Some(MmxmPhase::Expansion),
            MmxmPhase::Expansion => None,
        }
    }
}

impl std::fmt::Display for MmxmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MmxmPhase::None => write!(f, "NONE"),
            MmxmPhase::Accumulation => write!(f, "ACCUMULATION"),
            MmxmPhase::Manipulation => write!(f, "MANIPULATION"),
            MmxmPhase::Distribution => write!(f, "DISTRIBUTION"),
            MmxmPhase::Expansion => write!(f, "EXPANSION"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MmxmModel {
    /// Lows swept, expecting higher prices
    Buy,
    /// Highs swept, expecting lower prices
    Sell,
}

impl MmxmModel {
    pub fn bias(self) -> Bias {
        match self {
            MmxmModel::Buy => Bias::Bullish,
            MmxmModel::Sell => Bias::Bearish,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmxmState {
    pub phase: MmxmPhase,
    pub model: Option<MmxmModel>,
    pub accumulation_high: Option<f64>,
    pub accumulation_low: Option<f64>,
    pub accumulation_bars: usize,
    pub manipulation_sweep: Option<SweepEvent>,
    pub distribution_fvg: Option<FvgZone>,
    /// Manipulation was followed by a qualifying distribution
    pub is_valid_sequence: bool,
    /// Bar the budget of the current phase is measured from
    pub phase_index: usize,
}

impl Default for MmxmState {
    fn default() -> Self {
        Self {
            phase: MmxmPhase::None,
            model: None,
            accumulation_high: None,
            accumulation_low: None,
            accumulation_bars: 0,
            manipulation_sweep: None,
            distribution_fvg: None,
            is_valid_sequence: false,
            phase_index: 0,
        }
    }
}

/// What a bar contributed to the tracker
#[derive(Debug, Clone, Copy, Default)]
pub struct MmxmInputs<'a> {
    pub sweep: Option<&'a SweepEvent>,
    pub displacement: Option<&'a DisplacementEvent>,
    /// FVG created by this bar
    pub new_fvg: Option<&'a FvgZone>,
}

#[derive(Debug, Clone)]
pub struct MmxmTracker {
    config: MmxmConfig,
    tick_size: f64,
    state: MmxmState,
    accumulation_count: usize,
}

impl MmxmTracker {
    pub fn new(config: MmxmConfig, tick_size: f64) -> Self {
        Self {
            config,
            tick_size,
            state: MmxmState::default(),
            accumulation_count: 0,
        }
    }

    pub fn state(&self) -> &MmxmState {
        &self.state
    }

    pub fn phase(&self) -> MmxmPhase {
        self.state.phase
    }

    pub fn is_valid_for_entry(&self) -> bool {
        self.state.is_valid_sequence
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut MmxmState {
        &mut self.state
    }

    pub fn reset(&mut self) {
        self.state = MmxmState::default();
        self.accumulation_count = 0;
    }

    /// Advance with the newest bar in `history`. Returns the new phase when it changed.
    pub fn update(&mut self, history: &BarHistory, inputs: MmxmInputs<'_>) -> Option<MmxmPhase> {
        if history.len() < self.config.min_history_bars {
            return None;
        }
        let index = history.last_index()?;
        let bar = history.last()?;
        let accumulating = self.check_accumulation(history);
        let elapsed = index.saturating_sub(self.state.phase_index);
        let before = self.state.phase;

        match self.state.phase {
            MmxmPhase::None => {
                if accumulating {
                    self.enter(MmxmPhase::Accumulation, index);
                }
            }
            MmxmPhase::Accumulation => {
                if let Some(sweep) = inputs.sweep {
                    self.state.model = Some(match sweep.direction {
                        SweepDirection::Down => MmxmModel::Buy,
                        SweepDirection::Up => MmxmModel::Sell,
                    });
                    self.state.manipulation_sweep = Some(sweep.clone());
                    self.enter(MmxmPhase::Manipulation, index);
                } else if accumulating {
                    // Still compressing, budget restarts
                    self.state.phase_index = index;
                } else if elapsed > self.config.manipulation_timeout_bars {
                    self.reset_with("no manipulation");
                }
            }
            MmxmPhase::Manipulation => {
                if let Some(fvg) = self.distribution_candidate(inputs) {
                    self.state.distribution_fvg = Some(fvg);
                    self.state.is_valid_sequence = true;
                    self.enter(MmxmPhase::Distribution, index);
                } else if elapsed > self.config.distribution_timeout_bars {
                    self.reset_with("no distribution");
                }
            }
            MmxmPhase::Distribution => {
                let beyond = match (&self.state.distribution_fvg, self.state.model) {
                    (Some(fvg), Some(MmxmModel::Buy)) => bar.close > fvg.high,
                    (Some(fvg), Some(MmxmModel::Sell)) => bar.close < fvg.low,
                    _ => false,
                };
                if beyond {
                    self.enter(MmxmPhase::Expansion, index);
                } else if elapsed > self.config.expansion_timeout_bars {
                    self.reset_with("no expansion");
                }
            }
            MmxmPhase::Expansion => {
                if elapsed > self.config.expansion_hold_bars {
                    self.reset_with("cycle complete");
                }
            }
        }

        (self.state.phase != before).then_some(self.state.phase)
    }

    fn enter(&mut self, phase: MmxmPhase, index: usize) {
        debug!("MMXM: {} -> {} at bar {}", self.state.phase, phase, index);
        self.state.phase = phase;
        self.state.phase_index = index;
    }

    fn reset_with(&mut self, reason: &str) {
        debug!("MMXM: reset from {} ({})", self.state.phase, reason);
        self.reset();
    }

    /// Displacement in the model direction that left a matching FVG
    fn distribution_candidate(&self, inputs: MmxmInputs<'_>) -> Option<FvgZone> {
        let bias = self.state.model?.bias();
        let displacement = inputs.displacement?;
        let fvg = inputs.new_fvg?;
        if displacement.direction != bias
            || fvg.direction != bias
            || to_ticks(fvg.size(), self.tick_size) < self.config.min_fvg_ticks
        {
            return None;
        }
        Some(fvg.clone())
    }

    /// Count bars of compressed ATR; true once the run is long enough
    fn check_accumulation(&mut self, history: &BarHistory) -> bool {
        let bars = history.bars();
        let n = bars.len();
        let short = self.config.short_atr_period.min(n.saturating_sub(1));
        if short < 5 {
            return false;
        }
        let long = self.config.long_atr_period.min(n - 1);
        let recent_atr = calculate_atr(&bars[n - short..]);
        let long_atr = calculate_atr(&bars[n - long..]);
        if long_atr <= 0.0 {
            return false;
        }

        if recent_atr / long_atr > self.config.accumulation_atr_ratio {
            self.accumulation_count = 0;
            return false;
        }

        self.accumulation_count += 1;
        if self.accumulation_count < self.config.min_accumulation_bars {
            return false;
        }

        let (range, _) = history.window(self.config.min_accumulation_bars);
        self.state.accumulation_high = range.iter().map(|b| b.high).reduce(f64::max);
        self.state.accumulation_low = range.iter().map(|b| b.low).reduce(f64::min);
        self.state.accumulation_bars = self.accumulation_count;
        true
    }
}
