//! Setup state machine
//!
//! IDLE -> SWING_FOUND -> LIQUIDITY_DEFINED -> SWEEP_CONFIRMED -> DISPLACEMENT
//!      -> MSS -> BOS -> CISD -> FVG_FORMED -> READY_FOR_ENTRY
//!
//! Only single forward steps along this chain are legal, plus a reset edge from
//! any state back to IDLE. Resetting drops the whole pending setup.

use super::displacement::DisplacementEvent;
use super::fvg::FvgId;
use super::signal::Bias;
use super::structure::{CisdEvent, StructureBreak};
use super::sweep::SweepEvent;
use crate::risk::RejectionCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalState {
    Idle,
    SwingFound,
    LiquidityDefined,
    SweepConfirmed,
    Displacement,
    Mss,
    Bos,
    Cisd,
    FvgFormed,
    ReadyForEntry,
}

impl SignalState {
    pub const ALL: [SignalState; 10] = [
        SignalState::Idle,
        SignalState::SwingFound,
        SignalState::LiquidityDefined,
        SignalState::SweepConfirmed,
        SignalState::Displacement,
        SignalState::Mss,
        SignalState::Bos,
        SignalState::Cisd,
        SignalState::FvgFormed,
        SignalState::ReadyForEntry,
    ];

    /// Forward successor in the chain
    pub fn next(self) -> Option<SignalState> {
        match self {
            SignalState::Idle => Some(SignalState::SwingFound),
            SignalState::SwingFound => Some(SignalState::LiquidityDefined),
            SignalState::LiquidityDefined => Some(SignalState::SweepConfirmed),
            SignalState::SweepConfirmed => Some(SignalState::Displacement),
            SignalState::Displacement => Some(SignalState::Mss),
            SignalState::Mss => Some(SignalState::Bos),
            SignalState::Bos => Some(SignalState::Cisd),
            SignalState::Cisd => Some(SignalState::FvgFormed),
            SignalState::FvgFormed => Some(SignalState::ReadyForEntry),
            SignalState::ReadyForEntry => None,
        }
    }

    /// The transition table
    pub fn can_transition_to(self, to: SignalState) -> bool {
        to == SignalState::Idle || self.next() == Some(to)
    }

    /// A sweep (and therefore a bias) is held in this state
    pub fn has_pending_sweep(self) -> bool {
        !matches!(
            self,
            SignalState::Idle | SignalState::SwingFound | SignalState::LiquidityDefined
        )
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalState::Idle => write!(f, "IDLE"),
            SignalState::SwingFound => write!(f, "SWING_FOUND"),
            SignalState::LiquidityDefined => write!(f, "LIQUIDITY_DEFINED"),
            SignalState::SweepConfirmed => write!(f, "SWEEP_CONFIRMED"),
            SignalState::Displacement => write!(f, "DISPLACEMENT"),
            SignalState::Mss => write!(f, "MSS"),
            SignalState::Bos => write!(f, "BOS"),
            SignalState::Cisd => write!(f, "CISD"),
            SignalState::FvgFormed => write!(f, "FVG_FORMED"),
            SignalState::ReadyForEntry => write!(f, "READY_FOR_ENTRY"),
        }
    }
}

/// Why a pending chain was dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// The stage waited in this state too long
    TimedOut(SignalState),
    /// Entry zone was traded through before entry
    ZoneInvalidated,
    RiskRejected(RejectionCode),
    RiskRewardTooLow,
    CooldownZone,
    /// Entry on the wrong side of the dealing range equilibrium
    PremiumDiscount,
    AgainstTrend,
    SessionTradeLimit,
    NewSession,
    /// Signal emitted, chain complete
    Completed,
    Manual,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::TimedOut(state) => write!(f, "timed out in {}", state),
            InvalidationReason::ZoneInvalidated => write!(f, "entry zone invalidated"),
            InvalidationReason::RiskRejected(code) => write!(f, "risk rejected: {}", code),
            InvalidationReason::RiskRewardTooLow => write!(f, "risk/reward below minimum"),
            InvalidationReason::CooldownZone => write!(f, "entry inside cooldown zone"),
            InvalidationReason::PremiumDiscount => write!(f, "entry outside premium/discount zone"),
            InvalidationReason::AgainstTrend => write!(f, "entry against trend"),
            InvalidationReason::SessionTradeLimit => write!(f, "session trade limit reached"),
            InvalidationReason::NewSession => write!(f, "new session"),
            InvalidationReason::Completed => write!(f, "completed"),
            InvalidationReason::Manual => write!(f, "manual reset"),
        }
    }
}

/// State transition events
#[derive(Debug, Clone, PartialEq)]
pub enum StateTransition {
    Advanced {
        from: SignalState,
        to: SignalState,
        index: usize,
    },
    Reset {
        from: SignalState,
        reason: InvalidationReason,
        index: usize,
    },
}

/// Attempted a transition the table forbids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: SignalState,
    pub to: SignalState,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Everything the chain has confirmed so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingSetup {
    pub bias: Option<Bias>,
    pub sweep: Option<SweepEvent>,
    pub displacement: Option<DisplacementEvent>,
    pub mss: Option<StructureBreak>,
    pub bos: Option<StructureBreak>,
    pub cisd: Option<CisdEvent>,
    pub entry_fvg: Option<FvgId>,
    /// Fixed when the entry zone is chosen
    pub entry_price: Option<f64>,
    /// Entry came from an FVG/OTE overlap
    pub ote_confluence: bool,
    /// Stage-by-stage notes for the signal's reason trail
    pub trail: Vec<String>,
}

/// Bar-count timeouts per waiting state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub sweep_bars: usize,
    pub displacement_bars: usize,
    pub mss_bars: usize,
    pub bos_bars: usize,
    pub cisd_bars: usize,
    pub fvg_bars: usize,
    pub entry_bars: usize,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            sweep_bars: 50,
            displacement_bars: 5,
            mss_bars: 10,
            bos_bars: 10,
            cisd_bars: 10,
            fvg_bars: 20,
            entry_bars: 20,
        }
    }
}

impl StageTimeouts {
    /// Budget for leaving `state`, `None` where no clock runs
    pub fn budget(&self, state: SignalState) -> Option<usize> {
        match state {
            SignalState::Idle | SignalState::SwingFound | SignalState::ReadyForEntry => None,
            SignalState::LiquidityDefined => Some(self.sweep_bars),
            SignalState::SweepConfirmed => Some(self.displacement_bars),
            SignalState::Displacement => Some(self.mss_bars),
            SignalState::Mss => Some(self.bos_bars),
            SignalState::Bos => Some(self.cisd_bars),
            SignalState::Cisd => Some(self.fvg_bars),
            SignalState::FvgFormed => Some(self.entry_bars),
        }
    }
}

/// Table-driven state holder for one instrument
#[derive(Debug, Clone)]
pub struct SignalStateMachine {
    state: SignalState,
    /// Bar index the current state was entered on
    entered_index: usize,
    setup: PendingSetup,
    timeouts: StageTimeouts,
}

impl SignalStateMachine {
    pub fn new(timeouts: StageTimeouts) -> Self {
        Self {
            state: SignalState::Idle,
            entered_index: 0,
            setup: PendingSetup::default(),
            timeouts,
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }

    pub fn setup(&self) -> &PendingSetup {
        &self.setup
    }

    pub fn setup_mut(&mut self) -> &mut PendingSetup {
        &mut self.setup
    }

    pub fn bias(&self) -> Option<Bias> {
        self.setup.bias
    }

    pub fn entered_index(&self) -> usize {
        self.entered_index
    }

    /// Take one forward step
    pub fn advance(&mut self, to: SignalState, index: usize) -> Result<StateTransition, IllegalTransition> {
        let from = self.state;
        if to == SignalState::Idle || !from.can_transition_to(to) {
            return Err(IllegalTransition { from, to });
        }
        debug!("Setup: {} -> {} at bar {}", from, to, index);
        self.state = to;
        self.entered_index = index;
        Ok(StateTransition::Advanced { from, to, index })
    }

    /// Reset edge: back to IDLE with nothing retained
    pub fn reset(&mut self, reason: InvalidationReason, index: usize) -> StateTransition {
        let from = self.state;
        if from.has_pending_sweep() {
            info!("Setup invalidated in {}: {}", from, reason);
        } else {
            debug!("Setup reset in {}: {}", from, reason);
        }
        self.state = SignalState::Idle;
        self.entered_index = index;
        self.setup = PendingSetup::default();
        StateTransition::Reset { from, reason, index }
    }

    /// Whether the current state's budget is exhausted at `index`
    pub fn timed_out(&self, index: usize) -> bool {
        match self.timeouts.budget(self.state) {
            Some(budget) => index.saturating_sub(self.entered_index) > budget,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table_is_exhaustive() {
        for (i, from) in SignalState::ALL.iter().enumerate() {
            for (j, to) in SignalState::ALL.iter().enumerate() {
                let legal = from.can_transition_to(*to);
                let expected = *to == SignalState::Idle || j == i + 1;
                assert_eq!(legal, expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_no_skipping() {
        let mut machine = SignalStateMachine::new(StageTimeouts::default());
        assert!(machine.advance(SignalState::LiquidityDefined, 1).is_err());
        assert!(machine.advance(SignalState::SwingFound, 1).is_ok());
        assert_eq!(
            machine.advance(SignalState::Bos, 2),
            Err(IllegalTransition {
                from: SignalState::SwingFound,
                to: SignalState::Bos
            })
        );
        assert_eq!(machine.state(), SignalState::SwingFound);
    }

    #[test]
    fn test_walk_full_chain_then_reset() {
        let mut machine = SignalStateMachine::new(StageTimeouts::default());
        let mut state = SignalState::Idle;
        let mut index = 0;
        while let Some(next) = state.next() {
            index += 1;
            machine.advance(next, index).expect("legal step");
            state = next;
        }
        assert_eq!(machine.state(), SignalState::ReadyForEntry);

        machine.setup_mut().bias = Some(Bias::Bullish);
        let transition = machine.reset(InvalidationReason::Completed, index);
        assert_eq!(
            transition,
            StateTransition::Reset {
                from: SignalState::ReadyForEntry,
                reason: InvalidationReason::Completed,
                index
            }
        );
        assert_eq!(machine.state(), SignalState::Idle);
        assert_eq!(machine.setup(), &PendingSetup::default());
    }

    #[test]
    fn test_reset_is_not_an_advance() {
        let mut machine = SignalStateMachine::new(StageTimeouts::default());
        machine.advance(SignalState::SwingFound, 1).expect("legal");
        assert!(machine.advance(SignalState::Idle, 2).is_err());
    }

    #[test]
    fn test_timeouts() {
        let timeouts = StageTimeouts {
            displacement_bars: 2,
            ..Default::default()
        };
        let mut machine = SignalStateMachine::new(timeouts);
        for (to, index) in [
            (SignalState::SwingFound, 1),
            (SignalState::LiquidityDefined, 1),
            (SignalState::SweepConfirmed, 10),
        ] {
            machine.advance(to, index).expect("legal");
        }
        assert!(!machine.timed_out(12));
        assert!(machine.timed_out(13));
        assert_eq!(StageTimeouts::default().budget(SignalState::Idle), None);
    }
}
