//! Trading Core - market-structure detection and the signal orchestrator
//!
//! Detectors are pure functions over a bar window (swings, sweeps,
//! displacement, structure breaks, FVGs, impulse legs, SMT) plus a few
//! trackers that carry state across bars (FVG and OTE arenas, MMXM phase,
//! key levels).
//! [`strategy::IctStrategy`] chains them through the [`state_machine`] and
//! hands finished setups to the risk manager.

pub mod bars;
pub mod signal;
pub mod swings;
pub mod sweep;
pub mod levels;
pub mod displacement;
pub mod structure;
pub mod fvg;
pub mod impulse;
pub mod ote;
pub mod mmxm;
pub mod smt;
pub mod session;
pub mod filters;
pub mod state_machine;
pub mod strategy;

// Re-export commonly used types
pub use bars::{Bar, BarHistory};
pub use signal::{Bias, Direction, EntryType, Fill, Signal};
pub use swings::{SwingConfig, SwingKind, SwingPoint};
pub use sweep::{LevelSide, LiquidityZone, SessionLevels, SweepConfig, SweepDirection, SweepEvent, SweepKind};
pub use levels::KeyLevelTracker;
pub use displacement::{DisplacementConfig, DisplacementEvent};
pub use structure::{BreakKind, CisdEvent, StructureBreak, StructureConfig};
pub use fvg::{EntryMode, FvgConfig, FvgTracker, FvgZone, MitigationRule};
pub use impulse::{ImpulseConfig, ImpulseLeg};
pub use ote::{OteConfig, OteTracker, OteZone};
pub use mmxm::{MmxmConfig, MmxmModel, MmxmPhase, MmxmState, MmxmTracker};
pub use smt::{SmtConfig, SmtDivergence};
pub use session::{KillzoneWindow, SessionConfig, SessionFilter, TradingWindow};
pub use filters::{DealingRange, PriceZone, TrendFilterMode};
pub use state_machine::{InvalidationReason, PendingSetup, SignalState, SignalStateMachine, StateTransition};
pub use strategy::{IctStrategy, OrchestratorConfig, Strategy};
