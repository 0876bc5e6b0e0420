//! Displacement candle classification

use super::bars::{to_ticks, Bar};
use super::signal::Bias;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplacementConfig {
    /// Body must be at least this multiple of the average body
    pub body_multiplier: f64,
    /// Body / range floor
    pub min_body_ratio: f64,
    /// Absolute body floor, 0 disables
    pub min_body_ticks: f64,
    /// Bars in the rolling average body
    pub average_period: usize,
}

impl Default for DisplacementConfig {
    fn default() -> Self {
        Self {
            body_multiplier: 2.0,
            min_body_ratio: 0.6,
            min_body_ticks: 0.0,
            average_period: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementEvent {
    pub direction: Bias,
    pub index: usize,
    pub body_ticks: f64,
    pub body_ratio: f64,
    /// Body divided by the average body
    pub magnitude: f64,
}

/// Classify a bar against the average body of the bars before it
pub fn classify_displacement(
    bar: &Bar,
    index: usize,
    average_body: f64,
    config: &DisplacementConfig,
    tick_size: f64,
) -> Option<DisplacementEvent> {
    if average_body <= 0.0 || !average_body.is_finite() {
        return None;
    }

    let body = bar.body();
    let body_ratio = bar.body_ratio()?;
    let magnitude = body / average_body;
    let body_ticks = to_ticks(body, tick_size);

    if magnitude < config.body_multiplier
        || body_ratio < config.min_body_ratio
        || body_ticks < config.min_body_ticks
    {
        return None;
    }

    let direction = if bar.is_bullish() {
        Bias::Bullish
    } else if bar.is_bearish() {
        Bias::Bearish
    } else {
        return None;
    };

    Some(DisplacementEvent {
        direction,
        index,
        body_ticks,
        body_ratio,
        magnitude,
    })
}
