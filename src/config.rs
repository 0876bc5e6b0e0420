//! Engine configuration
//!
//! One struct per component, all `#[serde(default)]`, so a JSON file only needs
//! the keys it changes.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::risk::RiskConfig;
use crate::trading_core::displacement::DisplacementConfig;
use crate::trading_core::fvg::FvgConfig;
use crate::trading_core::impulse::ImpulseConfig;
use crate::trading_core::mmxm::MmxmConfig;
use crate::trading_core::ote::OteConfig;
use crate::trading_core::session::SessionConfig;
use crate::trading_core::smt::SmtConfig;
use crate::trading_core::strategy::OrchestratorConfig;
use crate::trading_core::structure::StructureConfig;
use crate::trading_core::sweep::SweepConfig;
use crate::trading_core::swings::SwingConfig;

/// Contract details for the traded instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Symbol to trade (e.g., "ES")
    pub symbol: String,

    /// Minimum price increment
    pub tick_size: f64,

    /// Dollar value per tick per contract (ES = $12.50, MES = $1.25)
    pub tick_value: f64,

    /// Bars kept in memory
    pub history_capacity: usize,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self::es()
    }
}

impl InstrumentConfig {
    fn contract(symbol: &str, tick_size: f64, tick_value: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            tick_size,
            tick_value,
            history_capacity: 500,
        }
    }

    /// E-mini S&P 500
    pub fn es() -> Self {
        Self::contract("ES", 0.25, 12.5)
    }

    /// E-mini Nasdaq-100
    pub fn nq() -> Self {
        Self::contract("NQ", 0.25, 5.0)
    }

    pub fn mes() -> Self {
        Self::contract("MES", 0.25, 1.25)
    }

    pub fn mnq() -> Self {
        Self::contract("MNQ", 0.25, 0.5)
    }

    /// Preset for a known root symbol ("NQ.c.0" resolves to NQ)
    pub fn for_symbol(symbol: &str) -> Option<Self> {
        let root = symbol.split('.').next().unwrap_or(symbol).to_ascii_uppercase();
        let preset = match root.as_str() {
            "ES" => Self::es(),
            "NQ" => Self::nq(),
            "MES" => Self::mes(),
            "MNQ" => Self::mnq(),
            _ => return None,
        };
        Some(Self {
            symbol: symbol.to_string(),
            ..preset
        })
    }
}

/// Everything one engine instance needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub instrument: InstrumentConfig,
    pub swing: SwingConfig,
    pub sweep: SweepConfig,
    pub displacement: DisplacementConfig,
    pub structure: StructureConfig,
    pub fvg: FvgConfig,
    pub impulse: ImpulseConfig,
    pub ote: OteConfig,
    pub mmxm: MmxmConfig,
    pub smt: SmtConfig,
    pub session: SessionConfig,
    pub orchestrator: OrchestratorConfig,
    pub risk: RiskConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize engine config")
    }

    /// Risk settings with the instrument's tick size and value applied
    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            tick_size: self.instrument.tick_size,
            tick_value: self.instrument.tick_value,
            ..self.risk.clone()
        }
    }

    /// Reject values the engine cannot run with. The error names the key.
    pub fn validate(&self) -> Result<()> {
        let inst = &self.instrument;
        if inst.symbol.trim().is_empty() {
            bail!("instrument.symbol must not be empty");
        }
        if !(inst.tick_size.is_finite() && inst.tick_size > 0.0) {
            bail!("instrument.tick_size must be positive, got {}", inst.tick_size);
        }
        if !(inst.tick_value.is_finite() && inst.tick_value > 0.0) {
            bail!("instrument.tick_value must be positive, got {}", inst.tick_value);
        }
        if inst.history_capacity < self.swing.max_window {
            bail!(
                "instrument.history_capacity ({}) must cover swing.max_window ({})",
                inst.history_capacity,
                self.swing.max_window
            );
        }

        if self.swing.left_bars == 0 || self.swing.right_bars == 0 {
            bail!("swing.left_bars and swing.right_bars must be at least 1");
        }
        if self.sweep.min_sweep_ticks < 0.0 {
            bail!("sweep.min_sweep_ticks must not be negative");
        }
        if !(self.sweep.liquidity_cluster_ticks.is_finite() && self.sweep.liquidity_cluster_ticks >= 0.0) {
            bail!("sweep.liquidity_cluster_ticks must not be negative");
        }
        if self.sweep.opening_range_minutes > 6 * 60 {
            bail!(
                "sweep.opening_range_minutes must fit in regular hours, got {}",
                self.sweep.opening_range_minutes
            );
        }

        let disp = &self.displacement;
        if disp.average_period == 0 {
            bail!("displacement.average_period must be at least 1");
        }
        if disp.body_multiplier <= 0.0 {
            bail!("displacement.body_multiplier must be positive, got {}", disp.body_multiplier);
        }
        if !(0.0..=1.0).contains(&disp.min_body_ratio) {
            bail!("displacement.min_body_ratio must be within 0..=1, got {}", disp.min_body_ratio);
        }

        if self.fvg.min_fvg_ticks < 0.0 {
            bail!("fvg.min_fvg_ticks must not be negative");
        }
        if self.mmxm.short_atr_period >= self.mmxm.long_atr_period {
            bail!(
                "mmxm.short_atr_period ({}) must be below mmxm.long_atr_period ({})",
                self.mmxm.short_atr_period,
                self.mmxm.long_atr_period
            );
        }

        for (i, window) in self.session.killzones.iter().enumerate() {
            if !window.is_valid() {
                bail!("session.killzones[{}] ({}) has an invalid time", i, window.name);
            }
        }

        let orch = &self.orchestrator;
        if orch.rr_targets.is_empty() {
            bail!("orchestrator.rr_targets must not be empty");
        }
        if orch.rr_targets.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            bail!("orchestrator.rr_targets must all be positive");
        }
        if orch.rr_targets.windows(2).any(|w| w[1] <= w[0]) {
            bail!("orchestrator.rr_targets must be ascending");
        }
        if orch.stop_buffer_ticks < 0.0 || orch.min_stop_ticks < 0.0 {
            bail!("orchestrator.stop_buffer_ticks and orchestrator.min_stop_ticks must not be negative");
        }
        if orch.min_risk_reward < 0.0 {
            bail!("orchestrator.min_risk_reward must not be negative");
        }
        if orch.loss_cooldown_minutes < 0 {
            bail!("orchestrator.loss_cooldown_minutes must not be negative");
        }
        if !(0.0..50.0).contains(&orch.pd_buffer_pct) {
            bail!("orchestrator.pd_buffer_pct must be within 0..50, got {}", orch.pd_buffer_pct);
        }
        if orch.trend_ema_period == 0 || orch.crossover_lookback_bars == 0 {
            bail!("orchestrator.trend_ema_period and orchestrator.crossover_lookback_bars must be at least 1");
        }

        let risk = &self.risk;
        if !(risk.max_risk_per_trade_usd.is_finite() && risk.max_risk_per_trade_usd > 0.0) {
            bail!("risk.max_risk_per_trade_usd must be positive");
        }
        if !(risk.max_daily_loss_usd.is_finite() && risk.max_daily_loss_usd > 0.0) {
            bail!("risk.max_daily_loss_usd must be positive");
        }
        Ok(())
    }
}
