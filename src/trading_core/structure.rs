//! Directional confirmers: MSS, BOS and CISD
//!
//! All three test for a close beyond a swing level in the direction of the
//! sweep bias; they differ in which level counts and what else must line up.
//! - MSS: any recent swing in the bias direction
//! - BOS: the swing that stood before the sweep (the structure it was aimed at)
//! - CISD: a displacement candle that itself breaks structure after a sweep

use super::bars::{to_ticks, Bar, BarHistory};
use super::displacement::DisplacementEvent;
use super::signal::Bias;
use super::sweep::SweepEvent;
use super::swings::{last_swing_before, SwingKind, SwingPoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    /// How far back MSS looks for a swing to break
    pub mss_lookback_bars: usize,
    /// Count a wick through the level as a BOS
    pub allow_wick_break: bool,
    /// Minimum gap for the FVG reported by CISD
    pub cisd_min_fvg_ticks: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            mss_lookback_bars: 20,
            allow_wick_break: false,
            cisd_min_fvg_ticks: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakKind {
    Mss,
    Bos,
}

impl std::fmt::Display for BreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakKind::Mss => write!(f, "MSS"),
            BreakKind::Bos => write!(f, "BOS"),
        }
    }
}

/// MSS or BOS event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub kind: BreakKind,
    pub direction: Bias,
    pub broken_level: f64,
    /// Bar that closed through the level
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// Bar index of the broken swing
    pub level_index: usize,
    pub break_ticks: f64,
    pub displacement_magnitude: Option<f64>,
    pub confirms_sweep: bool,
    /// 0.0 - 1.0
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CisdEvent {
    pub direction: Bias,
    pub broken_level: f64,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub displacement_magnitude: f64,
    pub sweep_index: usize,
    /// (low, high) of the gap left by the displacement candle
    pub fvg: Option<(f64, f64)>,
}

fn swing_kind_for(bias: Bias) -> SwingKind {
    match bias {
        Bias::Bullish => SwingKind::High,
        Bias::Bearish => SwingKind::Low,
    }
}

/// Distance beyond the level in the bias direction, positive when broken
fn penetration(bias: Bias, price: f64, level: f64) -> f64 {
    match bias {
        Bias::Bullish => price - level,
        Bias::Bearish => level - price,
    }
}

fn quality_score(break_ticks: f64, displaced: bool, confirms_sweep: bool) -> f64 {
    let mut score = (break_ticks * 0.05).min(0.4);
    if displaced {
        score += 0.3;
    }
    if confirms_sweep {
        score += 0.3;
    }
    score.min(1.0)
}

/// Market structure shift: close beyond the newest swing in the bias direction
pub fn detect_mss(
    bar: &Bar,
    index: usize,
    swings: &[SwingPoint],
    bias: Bias,
    config: &StructureConfig,
    tick_size: f64,
) -> Option<StructureBreak> {
    let kind = swing_kind_for(bias);
    let oldest = index.saturating_sub(config.mss_lookback_bars);

    let swing = swings
        .iter()
        .rev()
        .filter(|s| s.kind == kind && s.index < index && s.index >= oldest)
        .find(|s| penetration(bias, bar.close, s.price) > 0.0)?;

    let break_ticks = to_ticks(penetration(bias, bar.close, swing.price), tick_size);
    Some(StructureBreak {
        kind: BreakKind::Mss,
        direction: bias,
        broken_level: swing.price,
        index,
        timestamp: bar.timestamp,
        level_index: swing.index,
        break_ticks,
        displacement_magnitude: None,
        confirms_sweep: false,
        quality: quality_score(break_ticks, false, false),
    })
}

/// Break of structure against the swing that stood before the sweep
pub fn detect_bos(
    bar: &Bar,
    index: usize,
    swings: &[SwingPoint],
    sweep: &SweepEvent,
    displacement: Option<&DisplacementEvent>,
    config: &StructureConfig,
    tick_size: f64,
) -> Option<StructureBreak> {
    let bias = sweep.bias();
    let swing = last_swing_before(swings, swing_kind_for(bias), sweep.index)?;

    let test_price = match (config.allow_wick_break, bias) {
        (true, Bias::Bullish) => bar.high,
        (true, Bias::Bearish) => bar.low,
        (false, _) => bar.close,
    };
    let beyond = penetration(bias, test_price, swing.price);
    if beyond <= 0.0 {
        return None;
    }

    let displacement = displacement.filter(|d| d.direction == bias);
    let break_ticks = to_ticks(beyond, tick_size);
    Some(StructureBreak {
        kind: BreakKind::Bos,
        direction: bias,
        broken_level: swing.price,
        index,
        timestamp: bar.timestamp,
        level_index: swing.index,
        break_ticks,
        displacement_magnitude: displacement.map(|d| d.magnitude),
        confirms_sweep: true,
        quality: quality_score(break_ticks, displacement.is_some(), true),
    })
}

/// Change in state of delivery.
///
/// `displacement` must be the classification of the bar at `index`; the
/// candle has to move in the sweep's bias direction and close through a swing.
/// A level the candle opened on the near side of is preferred, otherwise the
/// most recent broken swing is used.
pub fn detect_cisd(
    history: &BarHistory,
    index: usize,
    swings: &[SwingPoint],
    sweep: &SweepEvent,
    displacement: &DisplacementEvent,
    config: &StructureConfig,
    tick_size: f64,
) -> Option<CisdEvent> {
    let bias = sweep.bias();
    if displacement.direction != bias || displacement.index != index || index < sweep.index {
        return None;
    }
    let bar = history.get(index)?;
    let kind = swing_kind_for(bias);

    let mut candidates: Vec<&SwingPoint> = swings
        .iter()
        .filter(|s| s.kind == kind && s.index < index)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    // Most extended level first
    match bias {
        Bias::Bullish => candidates.sort_by(|a, b| b.price.total_cmp(&a.price)),
        Bias::Bearish => candidates.sort_by(|a, b| a.price.total_cmp(&b.price)),
    }
    let opened_inside = candidates.iter().find(|s| {
        penetration(bias, bar.close, s.price) > 0.0 && penetration(bias, bar.open, s.price) < 0.0
    });
    let broken = match opened_inside {
        Some(s) => *s,
        None => swings
            .iter()
            .rev()
            .filter(|s| s.kind == kind && s.index < index)
            .find(|s| penetration(bias, bar.close, s.price) > 0.0)?,
    };

    let fvg = index
        .checked_sub(2)
        .and_then(|first| history.get(first))
        .and_then(|first| {
            let (low, high) = match bias {
                Bias::Bullish => (first.high, bar.low),
                Bias::Bearish => (bar.high, first.low),
            };
            let gap = high - low;
            (gap > 0.0 && to_ticks(gap, tick_size) >= config.cisd_min_fvg_ticks).then_some((low, high))
        });

    Some(CisdEvent {
        direction: bias,
        broken_level: broken.price,
        index,
        timestamp: bar.timestamp,
        displacement_magnitude: displacement.magnitude,
        sweep_index: sweep.index,
        fvg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::test_support::*;
    use crate::trading_core::sweep::{SweepDirection, SweepKind};

    fn swing(price: f64, kind: SwingKind, index: usize) -> SwingPoint {
        SwingPoint {
            price,
            kind,
            index,
            timestamp: bar_at(index as i64, 0.0, 0.0, 0.0, 0.0).timestamp,
            left_bars: 3,
            right_bars: 1,
        }
    }

    fn down_sweep(index: usize) -> SweepEvent {
        SweepEvent {
            direction: SweepDirection::Down,
            swept_level: 7000.0,
            kind: SweepKind::Swing,
            index,
            timestamp: bar_at(index as i64, 0.0, 0.0, 0.0, 0.0).timestamp,
            level_index: Some(index.saturating_sub(4)),
            excursion_ticks: 4.0,
            close: 7000.5,
            strength: 0.5,
            liquidity_strength: 1,
        }
    }

    #[test]
    fn test_mss_breaks_newest_swing_high() {
        let swings = vec![swing(7010.0, SwingKind::High, 2), swing(7004.0, SwingKind::High, 8)];
        let bar = bar_at(12, 7003.0, 7006.0, 7002.5, 7005.0);
        let mss = detect_mss(&bar, 12, &swings, Bias::Bullish, &StructureConfig::default(), 0.25).expect("mss");
        assert_eq!(mss.kind, BreakKind::Mss);
        assert_eq!(mss.broken_level, 7004.0);
        assert_eq!(mss.break_ticks, 4.0);
    }

    #[test]
    fn test_mss_respects_lookback() {
        let swings = vec![swing(7004.0, SwingKind::High, 2)];
        let bar = bar_at(40, 7003.0, 7006.0, 7002.5, 7005.0);
        assert!(detect_mss(&bar, 40, &swings, Bias::Bullish, &StructureConfig::default(), 0.25).is_none());
    }

    #[test]
    fn test_bos_uses_pre_sweep_swing() {
        let swings = vec![
            swing(7005.0, SwingKind::High, 6),
            swing(7000.0, SwingKind::Low, 8),
            swing(7002.0, SwingKind::High, 13),
        ];
        let sweep = down_sweep(12);

        // Above the post-sweep swing but not the pre-sweep one
        let bar = bar_at(15, 7002.0, 7004.5, 7001.5, 7004.0);
        assert!(detect_bos(&bar, 15, &swings, &sweep, None, &StructureConfig::default(), 0.25).is_none());

        let bar = bar_at(16, 7004.0, 7006.5, 7003.5, 7006.0);
        let bos = detect_bos(&bar, 16, &swings, &sweep, None, &StructureConfig::default(), 0.25).expect("bos");
        assert_eq!(bos.broken_level, 7005.0);
        assert_eq!(bos.direction, Bias::Bullish);
        assert!(bos.confirms_sweep);
        // 4 ticks: 0.2 + sweep 0.3
        assert!((bos.quality - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bos_wick_break_option() {
        let swings = vec![swing(7005.0, SwingKind::High, 6)];
        let sweep = down_sweep(12);
        let bar = bar_at(16, 7003.0, 7006.0, 7002.5, 7004.5);
        assert!(detect_bos(&bar, 16, &swings, &sweep, None, &StructureConfig::default(), 0.25).is_none());

        let config = StructureConfig {
            allow_wick_break: true,
            ..Default::default()
        };
        assert!(detect_bos(&bar, 16, &swings, &sweep, None, &config, 0.25).is_some());
    }

    #[test]
    fn test_cisd_requires_matching_displacement() {
        let mut history = BarHistory::new(100);
        history.push(bar_at(0, 7001.0, 7002.0, 7000.5, 7001.5));
        history.push(bar_at(1, 7001.5, 7002.5, 7001.0, 7002.0));
        history.push(bar_at(2, 7002.0, 7007.25, 7002.0, 7007.0));
        let swings = vec![swing(7005.0, SwingKind::High, 0)];
        let sweep = down_sweep(1);

        let bullish = DisplacementEvent {
            direction: Bias::Bullish,
            index: 2,
            body_ticks: 20.0,
            body_ratio: 0.95,
            magnitude: 3.0,
        };
        let cisd = detect_cisd(&history, 2, &swings, &sweep, &bullish, &StructureConfig::default(), 0.25)
            .expect("cisd");
        assert_eq!(cisd.broken_level, 7005.0);
        assert_eq!(cisd.sweep_index, 1);

        let bearish = DisplacementEvent {
            direction: Bias::Bearish,
            ..bullish
        };
        assert!(detect_cisd(&history, 2, &swings, &sweep, &bearish, &StructureConfig::default(), 0.25).is_none());
    }

    #[test]
    fn test_cisd_reports_fvg() {
        let mut history = BarHistory::new(100);
        history.push(bar_at(0, 7000.0, 7001.0, 6999.0, 7000.5));
        history.push(bar_at(1, 7000.5, 7004.0, 7000.25, 7003.75));
        history.push(bar_at(2, 7003.75, 7008.0, 7002.0, 7007.75));
        let swings = vec![swing(7003.0, SwingKind::High, 0)];
        let sweep = down_sweep(0);
        let displacement = DisplacementEvent {
            direction: Bias::Bullish,
            index: 2,
            body_ticks: 16.0,
            body_ratio: 0.66,
            magnitude: 2.5,
        };
        let cisd = detect_cisd(&history, 2, &swings, &sweep, &displacement, &StructureConfig::default(), 0.25)
            .expect("cisd");
        assert_eq!(cisd.fvg, Some((7001.0, 7002.0)));
    }
}
