//! Daily circuit breaker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    /// Trading allowed
    Closed,
    /// Trading blocked until the daily reset
    Open,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "CLOSED"),
            CircuitBreakerState::Open => write!(f, "OPEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitBreakerState,
    /// Empty while closed
    pub reason: String,
    pub tripped_at: Option<DateTime<Utc>>,
}

/// Latching breaker. Only [`reset`](CircuitBreaker::reset) closes it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    reason: String,
    tripped_at: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            reason: String::new(),
            tripped_at: None,
        }
    }
}

impl CircuitBreaker {
    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitBreakerState::Open
    }

    /// Open the breaker. A breaker that is already open keeps its first reason.
    pub fn trip(&mut self, reason: &str, at: DateTime<Utc>) {
        if self.is_open() {
            return;
        }
        warn!("Circuit breaker tripped: {}", reason);
        self.state = CircuitBreakerState::Open;
        self.reason = reason.to_string();
        self.tripped_at = Some(at);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state,
            reason: self.reason.clone(),
            tripped_at: self.tripped_at,
        }
    }
}
