// Library crate - exports the signal engine, risk layer and replay driver

pub mod config;
pub mod feed;
pub mod replay;
pub mod risk;
pub mod trading_core;

// Re-export commonly used types
pub use config::{EngineConfig, InstrumentConfig};
pub use risk::{AccountState, RiskConfig, RiskManager};
pub use trading_core::{Bar, Direction, Fill, IctStrategy, Signal, SignalState, Strategy};
