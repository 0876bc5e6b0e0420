//! Risk gatekeeping
//!
//! Every candidate signal passes through [`RiskManager::approve`] before it is
//! emitted. The circuit breaker latches open for the rest of the day once a
//! loss limit is hit.

pub mod circuit_breaker;
pub mod manager;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus};
pub use manager::{AccountState, ApprovalResult, RejectionCode, RemainingCapacity, RiskConfig, RiskManager};
