//! Risk manager: approval, position sizing and daily limits

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus};
use crate::trading_core::signal::{Direction, Signal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// 0 means unlimited
    pub max_trades_per_day: u32,
    pub max_daily_loss_usd: f64,
    pub max_risk_per_trade_usd: f64,
    pub max_open_positions: u32,
    pub max_consecutive_losses: u32,
    pub tick_size: f64,
    /// USD per tick per contract
    pub tick_value: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: 3,
            max_daily_loss_usd: 500.0,
            max_risk_per_trade_usd: 100.0,
            max_open_positions: 2,
            max_consecutive_losses: 3,
            tick_size: 0.25,  // ES
            tick_value: 12.5, // ES
        }
    }
}

/// Account snapshot supplied before every approval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub daily_pnl: f64,
    pub open_positions: u32,
    pub trades_today: u32,
    pub consecutive_losses: u32,
    pub last_trade_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionCode {
    CircuitBreakerOpen,
    MaxTradesReached,
    MaxDailyLossReached,
    MaxRiskExceeded,
    MaxPositionsReached,
    ConsecutiveLosses,
    ZeroRisk,
    InvalidSignal,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::CircuitBreakerOpen => "circuit_breaker_open",
            RejectionCode::MaxTradesReached => "max_trades_reached",
            RejectionCode::MaxDailyLossReached => "max_daily_loss_reached",
            RejectionCode::MaxRiskExceeded => "max_risk_exceeded",
            RejectionCode::MaxPositionsReached => "max_positions_reached",
            RejectionCode::ConsecutiveLosses => "consecutive_losses",
            RejectionCode::ZeroRisk => "zero_risk",
            RejectionCode::InvalidSignal => "invalid_signal",
        }
    }
}

impl std::fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub approved: bool,
    pub reason: String,
    pub rejection_code: Option<RejectionCode>,
    /// Signal carrying the approved quantity
    pub adjusted_signal: Option<Signal>,
    /// USD at risk for the approved size (per contract when rejected on size)
    pub risk_amount: f64,
    pub position_size: u32,
}

impl ApprovalResult {
    fn rejected(code: RejectionCode, reason: String) -> Self {
        Self {
            approved: false,
            reason,
            rejection_code: Some(code),
            adjusted_signal: None,
            risk_amount: 0.0,
            position_size: 0,
        }
    }
}

/// Headroom before each limit is hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemainingCapacity {
    /// `None` when trades are unlimited
    pub trades_remaining: Option<u32>,
    pub loss_capacity_usd: f64,
    pub positions_remaining: u32,
    pub losses_until_pause: u32,
    pub circuit_breaker: CircuitBreakerState,
}

/// Sizing outcome for one signal
enum Sizing {
    Contracts { contracts: u32, risk_usd: f64 },
    Rejected { code: RejectionCode, reason: String, risk_usd: f64 },
}

/// Per-instrument risk gatekeeper
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    breaker: CircuitBreaker,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            breaker: CircuitBreaker::default(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Approve or reject a signal. Checks short-circuit in a fixed order:
    /// breaker, trade count, daily loss, loss streak, open positions, sizing.
    pub fn approve(&mut self, signal: &Signal, account: &AccountState) -> ApprovalResult {
        let cfg = &self.config;

        if self.breaker.is_open() {
            let status = self.breaker.status();
            return ApprovalResult::rejected(
                RejectionCode::CircuitBreakerOpen,
                format!("Circuit breaker open: {}", status.reason),
            );
        }

        if cfg.max_trades_per_day > 0 && account.trades_today >= cfg.max_trades_per_day {
            return ApprovalResult::rejected(
                RejectionCode::MaxTradesReached,
                format!("Max trades reached: {}/{}", account.trades_today, cfg.max_trades_per_day),
            );
        }

        if account.daily_pnl <= -cfg.max_daily_loss_usd {
            let reason = format!(
                "Max daily loss reached: ${:.2} (limit ${:.2})",
                -account.daily_pnl, cfg.max_daily_loss_usd
            );
            self.breaker.trip(&reason, signal.created_at);
            return ApprovalResult::rejected(RejectionCode::MaxDailyLossReached, reason);
        }

        if account.consecutive_losses >= cfg.max_consecutive_losses {
            let reason = format!(
                "Consecutive losses: {} (limit {})",
                account.consecutive_losses, cfg.max_consecutive_losses
            );
            self.breaker.trip(&reason, signal.created_at);
            return ApprovalResult::rejected(RejectionCode::ConsecutiveLosses, reason);
        }

        if account.open_positions >= cfg.max_open_positions {
            return ApprovalResult::rejected(
                RejectionCode::MaxPositionsReached,
                format!("Max open positions: {}/{}", account.open_positions, cfg.max_open_positions),
            );
        }

        match self.position_size(signal) {
            Sizing::Rejected { code, reason, risk_usd } => {
                debug!("Risk rejected {}: {}", signal.symbol, reason);
                ApprovalResult {
                    risk_amount: risk_usd,
                    ..ApprovalResult::rejected(code, reason)
                }
            }
            Sizing::Contracts { contracts, risk_usd } => {
                info!(
                    "Risk approved {} x{} (risk ${:.2})",
                    signal, contracts, risk_usd
                );
                ApprovalResult {
                    approved: true,
                    reason: "Approved".to_string(),
                    rejection_code: None,
                    adjusted_signal: Some(signal.with_quantity(contracts)),
                    risk_amount: risk_usd,
                    position_size: contracts,
                }
            }
        }
    }

    fn position_size(&self, signal: &Signal) -> Sizing {
        let cfg = &self.config;
        let (entry, stop) = (signal.entry_price, signal.stop_price);

        if !entry.is_finite() || !stop.is_finite() || cfg.tick_size <= 0.0 {
            return Sizing::Rejected {
                code: RejectionCode::InvalidSignal,
                reason: "Non-finite entry or stop price".to_string(),
                risk_usd: 0.0,
            };
        }

        let distance = (entry - stop).abs();
        if distance == 0.0 {
            return Sizing::Rejected {
                code: RejectionCode::ZeroRisk,
                reason: "Zero risk: entry equals stop".to_string(),
                risk_usd: 0.0,
            };
        }

        let protective = match signal.direction {
            Direction::Long => stop < entry,
            Direction::Short => stop > entry,
        };
        if !protective {
            return Sizing::Rejected {
                code: RejectionCode::InvalidSignal,
                reason: format!("Stop {:.2} on wrong side of entry {:.2}", stop, entry),
                risk_usd: 0.0,
            };
        }

        let ticks = distance / cfg.tick_size;
        let risk_per_contract = ticks * cfg.tick_value;
        if risk_per_contract <= 0.0 {
            return Sizing::Rejected {
                code: RejectionCode::ZeroRisk,
                reason: "Zero risk per contract".to_string(),
                risk_usd: 0.0,
            };
        }

        // Epsilon keeps exact multiples from flooring one short
        let contracts = (cfg.max_risk_per_trade_usd / risk_per_contract + 1e-9).floor();
        if contracts < 1.0 {
            return Sizing::Rejected {
                code: RejectionCode::MaxRiskExceeded,
                reason: format!(
                    "Risk per contract ${:.2} exceeds max ${:.2}",
                    risk_per_contract, cfg.max_risk_per_trade_usd
                ),
                risk_usd: risk_per_contract,
            };
        }

        let contracts = contracts as u32;
        Sizing::Contracts {
            contracts,
            risk_usd: contracts as f64 * risk_per_contract,
        }
    }

    /// Close the breaker. Called once per trading day by the scheduler.
    pub fn reset_daily(&mut self) {
        if self.breaker.is_open() {
            info!("Daily reset: closing circuit breaker");
        }
        self.breaker.reset();
    }

    /// Stop trading immediately (news, manual override)
    pub fn trip(&mut self, reason: &str, at: DateTime<Utc>) {
        self.breaker.trip(&format!("Manual: {}", reason), at);
    }

    pub fn is_trading_enabled(&self) -> bool {
        !self.breaker.is_open()
    }

    pub fn circuit_breaker_status(&self) -> CircuitBreakerStatus {
        self.breaker.status()
    }

    pub fn remaining_capacity(&self, account: &AccountState) -> RemainingCapacity {
        let cfg = &self.config;
        RemainingCapacity {
            trades_remaining: (cfg.max_trades_per_day > 0)
                .then(|| cfg.max_trades_per_day.saturating_sub(account.trades_today)),
            loss_capacity_usd: (cfg.max_daily_loss_usd + account.daily_pnl).max(0.0),
            positions_remaining: cfg.max_open_positions.saturating_sub(account.open_positions),
            losses_until_pause: cfg.max_consecutive_losses.saturating_sub(account.consecutive_losses),
            circuit_breaker: self.breaker.state(),
        }
    }
}
