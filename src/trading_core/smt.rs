//! SMT divergence between correlated instruments

use super::bars::Bar;
use super::signal::Bias;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtConfig {
    /// Bars before the current one that define the prior extreme
    pub lookback: usize,
    /// Max timestamp difference for two bars to be paired
    pub tolerance_secs: i64,
    /// Bars a divergence stays relevant for the orchestrator
    pub max_age_bars: usize,
}

impl Default for SmtConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            tolerance_secs: 60,
            max_age_bars: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtDivergence {
    /// BULLISH: primary made a new low the correlated market refused
    pub kind: Bias,
    pub primary_symbol: String,
    pub correlated_symbol: String,
    pub primary_price: f64,
    pub correlated_price: f64,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
}

/// Index futures and ETFs that move together
pub fn correlated_symbol(symbol: &str) -> Option<&'static str> {
    let root = symbol.split('.').next().unwrap_or(symbol).to_ascii_uppercase();
    match root.as_str() {
        "ES" => Some("NQ"),
        "NQ" => Some("ES"),
        "MES" => Some("MNQ"),
        "MNQ" => Some("MES"),
        "SPY" => Some("QQQ"),
        "QQQ" => Some("SPY"),
        _ => None,
    }
}

/// Pair each primary bar with the nearest correlated bar within tolerance.
///
/// Both inputs must be in timestamp order.
pub fn align_by_timestamp<'a>(
    primary: &'a [Bar],
    correlated: &'a [Bar],
    tolerance_secs: i64,
) -> Vec<(&'a Bar, &'a Bar)> {
    let mut pairs = Vec::new();
    if correlated.is_empty() {
        return pairs;
    }

    let distance = |a: &Bar, b: &Bar| (a.timestamp - b.timestamp).num_seconds().abs();
    let mut j = 0;
    for p in primary {
        while j + 1 < correlated.len() && distance(&correlated[j + 1], p) < distance(&correlated[j], p) {
            j += 1;
        }
        if distance(&correlated[j], p) <= tolerance_secs {
            pairs.push((p, &correlated[j]));
        }
    }
    pairs
}

/// Check the newest primary bar for divergence against the correlated series
pub fn detect_smt_divergence(
    primary: &[Bar],
    correlated: &[Bar],
    index: usize,
    config: &SmtConfig,
) -> Option<SmtDivergence> {
    let needed = config.lookback + 1;
    if primary.len() < needed || correlated.len() < needed {
        return None;
    }

    // Only the tail matters, with slack for gaps in the correlated feed
    let p_tail = &primary[primary.len().saturating_sub(needed * 2)..];
    let c_tail = &correlated[correlated.len().saturating_sub(needed * 3)..];
    let pairs = align_by_timestamp(p_tail, c_tail, config.tolerance_secs);
    if pairs.len() < needed {
        return None;
    }

    let (current_p, current_c) = pairs[pairs.len() - 1];
    if primary.last().map(|b| b.timestamp) != Some(current_p.timestamp) {
        return None;
    }

    let prior = &pairs[pairs.len() - needed..pairs.len() - 1];
    let prev_p_high = prior.iter().map(|(p, _)| p.high).fold(f64::MIN, f64::max);
    let prev_p_low = prior.iter().map(|(p, _)| p.low).fold(f64::MAX, f64::min);
    let prev_c_high = prior.iter().map(|(_, c)| c.high).fold(f64::MIN, f64::max);
    let prev_c_low = prior.iter().map(|(_, c)| c.low).fold(f64::MAX, f64::min);

    let (kind, primary_price, correlated_price) = if current_p.high > prev_p_high && current_c.high <= prev_c_high {
        (Bias::Bearish, current_p.high, current_c.high)
    } else if current_p.low < prev_p_low && current_c.low >= prev_c_low {
        (Bias::Bullish, current_p.low, current_c.low)
    } else {
        return None;
    };

    Some(SmtDivergence {
        kind,
        primary_symbol: current_p.symbol.clone(),
        correlated_symbol: current_c.symbol.clone(),
        primary_price,
        correlated_price,
        index,
        timestamp: current_p.timestamp,
    })
}
