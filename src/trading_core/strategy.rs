//! ICT setup orchestrator
//!
//! Owns every detector for one instrument and walks the setup chain bar by bar:
//! swings and liquidity, a sweep, displacement in the new bias, MSS, BOS, CISD,
//! an FVG entry zone and finally a retrace into it. Completed chains become
//! limit-entry signals that only leave the engine once the risk manager has
//! approved and sized them.
//!
//! Per-bar order: validate, fold the bar into the key levels (rolling the
//! session on a date change), append to history, update the FVG arena and the
//! trend EMA, detect swings on the bars before this one and cluster them into
//! liquidity, classify displacement against the prior average body, update
//! impulse/OTE, MMXM and SMT, then advance the state machine.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bars::{round_to_tick, to_ticks, Bar, BarHistory, RollingMean};
use super::displacement::{classify_displacement, DisplacementEvent};
use super::filters::{swing_dealing_range, DealingRange, TrendFilterMode, TrendTracker};
use super::fvg::{EntryMode, FvgId, FvgTracker, FvgZone};
use super::impulse::{detect_impulse, ImpulseLeg};
use super::levels::KeyLevelTracker;
use super::mmxm::{MmxmInputs, MmxmState, MmxmTracker};
use super::ote::{fvg_overlaps_ote, OteTracker, OteZone};
use super::session::{SessionFilter, TradingWindow};
use super::signal::{Bias, Direction, Fill, Signal};
use super::smt::{detect_smt_divergence, SmtDivergence};
use super::state_machine::{
    InvalidationReason, PendingSetup, SignalState, SignalStateMachine, StageTimeouts, StateTransition,
};
use super::structure::{detect_bos, detect_cisd, detect_mss};
use super::sweep::{
    define_liquidity_zones, detect_sweeps, most_significant_sweep, LevelSide, LiquidityZone, SessionLevels, SweepEvent,
};
use super::swings::{detect_swings, SwingPoint};
use crate::config::EngineConfig;
use crate::risk::{AccountState, RejectionCode, RiskManager};

/// Bar-driven strategy interface used by the replay driver
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Feed one completed bar. Returns the approved signals it produced.
    fn on_bar(&mut self, bar: &Bar, account: &AccountState) -> Vec<Signal>;

    /// Execution report for this instrument
    fn on_fill(&mut self, fill: &Fill);

    /// Start of a new trading day. The only path that closes the breaker.
    fn reset_daily(&mut self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub timeouts: StageTimeouts,
    pub entry_mode: EntryMode,
    /// Enter inside the FVG/OTE overlap when one exists
    pub use_ote_confluence: bool,
    /// When false BOS leads straight to the entry-zone search
    pub require_cisd: bool,
    pub stop_buffer_ticks: f64,
    pub min_stop_ticks: f64,
    /// Target multiples of risk, nearest first
    pub rr_targets: Vec<f64>,
    /// Checked on the second target
    pub min_risk_reward: f64,
    /// Same-direction entries this close to a recent one are skipped, 0 disables
    pub cooldown_zone_ticks: f64,
    /// Pause after a losing fill, 0 disables
    pub loss_cooldown_minutes: i64,
    /// Longs only at or below equilibrium less the buffer, shorts the mirror
    pub enable_premium_discount_filter: bool,
    /// Buffer around equilibrium, percent of the dealing range
    pub pd_buffer_pct: f64,
    /// Swing dealing range lookback when no session range is known
    pub pd_lookback_bars: usize,
    pub enable_trend_filter: bool,
    pub trend_ema_period: usize,
    pub trend_filter_mode: TrendFilterMode,
    pub crossover_lookback_bars: usize,
    /// Signals per killzone per day, 0 disables
    pub max_trades_per_session: u32,
    /// Append the nearest opposing liquidity beyond the last target
    pub use_liquidity_runner: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeouts: StageTimeouts::default(),
            entry_mode: EntryMode::Midpoint,
            use_ote_confluence: false,
            require_cisd: true,
            stop_buffer_ticks: 2.0,
            min_stop_ticks: 10.0,
            rr_targets: vec![1.0, 2.0, 3.0],
            min_risk_reward: 2.0,
            cooldown_zone_ticks: 20.0,
            loss_cooldown_minutes: 0,
            enable_premium_discount_filter: false,
            pd_buffer_pct: 5.0,
            pd_lookback_bars: 100,
            enable_trend_filter: false,
            trend_ema_period: 20,
            trend_filter_mode: TrendFilterMode::Crossover,
            crossover_lookback_bars: 10,
            max_trades_per_session: 0,
            use_liquidity_runner: false,
        }
    }
}

/// Outcome of watching the entry zone for one bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryTrigger {
    Ready,
    Waiting,
    Invalidated,
}

/// One instrument's ICT engine
pub struct IctStrategy {
    config: EngineConfig,
    symbol: String,
    tick_size: f64,

    history: BarHistory,
    body_mean: RollingMean,
    swings: Vec<SwingPoint>,
    /// Clustered swings plus key levels, rebuilt every bar
    liquidity: Vec<LiquidityZone>,
    levels: KeyLevelTracker,
    trend: TrendTracker,
    fvgs: FvgTracker,
    otes: OteTracker,
    mmxm: MmxmTracker,
    impulse: Option<ImpulseLeg>,
    correlated: Vec<Bar>,
    smt: Option<SmtDivergence>,

    machine: SignalStateMachine,
    risk: RiskManager,
    window: Box<dyn TradingWindow>,

    recent_entries: Vec<(Direction, f64)>,
    /// Signals per killzone label on the current date
    session_trades: HashMap<String, u32>,
    entries_blocked_until: Option<DateTime<Utc>>,

    /// Transitions taken on the most recent bar
    transitions: Vec<StateTransition>,
    bars_processed: u64,
    bars_skipped: u64,
    signals_emitted: u64,
}

impl IctStrategy {
    pub fn new(config: EngineConfig) -> Self {
        let tick_size = config.instrument.tick_size;
        let window: Box<dyn TradingWindow> = Box::new(SessionFilter::new(&config.session));
        Self {
            symbol: config.instrument.symbol.clone(),
            tick_size,
            history: BarHistory::new(config.instrument.history_capacity),
            body_mean: RollingMean::new(config.displacement.average_period),
            swings: Vec::new(),
            liquidity: Vec::new(),
            levels: KeyLevelTracker::new(&config.sweep),
            trend: TrendTracker::new(
                config.orchestrator.trend_ema_period,
                config.orchestrator.crossover_lookback_bars,
            ),
            fvgs: FvgTracker::new(config.fvg.clone(), tick_size),
            otes: OteTracker::new(config.ote.clone()),
            mmxm: MmxmTracker::new(config.mmxm.clone(), tick_size),
            impulse: None,
            correlated: Vec::new(),
            smt: None,
            machine: SignalStateMachine::new(config.orchestrator.timeouts.clone()),
            risk: RiskManager::new(config.risk_config()),
            window,
            recent_entries: Vec::new(),
            session_trades: HashMap::new(),
            entries_blocked_until: None,
            transitions: Vec::new(),
            bars_processed: 0,
            bars_skipped: 0,
            signals_emitted: 0,
            config,
        }
    }

    /// Replace the killzone filter
    pub fn with_window(mut self, window: Box<dyn TradingWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> SignalState {
        self.machine.state()
    }

    pub fn setup(&self) -> &PendingSetup {
        self.machine.setup()
    }

    /// Transitions taken while processing the last bar
    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn history(&self) -> &BarHistory {
        &self.history
    }

    pub fn swings(&self) -> &[SwingPoint] {
        &self.swings
    }

    /// Liquidity the current bar was checked against
    pub fn liquidity(&self) -> &[LiquidityZone] {
        &self.liquidity
    }

    pub fn key_levels(&self) -> &KeyLevelTracker {
        &self.levels
    }

    pub fn fvg_tracker(&self) -> &FvgTracker {
        &self.fvgs
    }

    pub fn ote_tracker(&self) -> &OteTracker {
        &self.otes
    }

    pub fn last_impulse(&self) -> Option<&ImpulseLeg> {
        self.impulse.as_ref()
    }

    pub fn mmxm_state(&self) -> &MmxmState {
        self.mmxm.state()
    }

    pub fn correlated_bars(&self) -> &[Bar] {
        &self.correlated
    }

    pub fn last_smt(&self) -> Option<&SmtDivergence> {
        self.smt.as_ref()
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_manager_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    /// Levels of the last completed session
    pub fn prior_session(&self) -> Option<&SessionLevels> {
        self.levels.prior_session()
    }

    /// Supply prior-session levels from outside (e.g. a warm start)
    pub fn set_session_levels(&mut self, levels: SessionLevels) {
        info!(
            "Session levels for {}: H {:.2} L {:.2}",
            levels.date, levels.high, levels.low
        );
        self.levels.set_prior_session(levels);
    }

    pub fn entries_blocked_until(&self) -> Option<DateTime<Utc>> {
        self.entries_blocked_until
    }

    pub fn bars_skipped(&self) -> u64 {
        self.bars_skipped
    }

    /// Bar of the correlated instrument, used for SMT
    pub fn push_correlated_bar(&mut self, bar: &Bar) {
        if !bar.is_well_formed() {
            warn!("Skipping malformed correlated bar at {}", bar.timestamp);
            return;
        }
        if self.correlated.last().is_some_and(|last| bar.timestamp < last.timestamp) {
            debug!("Ignoring out-of-order correlated bar at {}", bar.timestamp);
            return;
        }
        self.correlated.push(bar.clone());

        let capacity = self.config.instrument.history_capacity.max(1);
        if self.correlated.len() > capacity + capacity / 2 {
            let excess = self.correlated.len() - capacity;
            self.correlated.drain(..excess);
        }
    }

    /// Drop the pending setup without touching history or risk state
    pub fn reset(&mut self) {
        let index = self.history.last_index().unwrap_or(0);
        self.reset_chain(InvalidationReason::Manual, index);
    }

    pub fn status(&self) -> String {
        format!(
            "{} | State: {} | Bias: {} | Bars: {} (skipped {}) | Signals: {} | Breaker: {}",
            self.symbol,
            self.machine.state(),
            self.machine
                .bias()
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.bars_processed,
            self.bars_skipped,
            self.signals_emitted,
            self.risk.circuit_breaker_status().state
        )
    }

    /// Fold the bar into the key levels. A New York date change drops the
    /// chain and retires the arena zones.
    fn check_date_change(&mut self, bar: &Bar, index: usize) {
        let Some(roll) = self.levels.update(bar) else {
            return;
        };
        if let Some(done) = roll.closed {
            info!(
                "Session {} closed: H {:.2} L {:.2}",
                done.date, done.high, done.low
            );
        }
        if self.machine.state() != SignalState::Idle {
            self.reset_chain(InvalidationReason::NewSession, index);
        }
        // Zones stay in the arenas for audit but can no longer be entered
        self.fvgs.expire_all();
        self.otes.expire_all();
        self.recent_entries.clear();
        self.session_trades.clear();
        self.smt = None;
    }

    /// Impulse/OTE, MMXM and SMT for the newest bar
    fn update_context(
        &mut self,
        index: usize,
        average_body: Option<f64>,
        sweep: Option<&SweepEvent>,
        displacement: Option<&DisplacementEvent>,
        new_fvg: Option<FvgId>,
    ) {
        let (bars, first) = self.history.window(self.config.impulse.max_bars_back * 2 + 1);
        let leg = average_body
            .and_then(|avg| detect_impulse(bars, first, avg, &self.config.impulse, self.tick_size));
        let update = self.otes.update(&self.history, leg.as_ref());
        if let Some(id) = update.created.or(update.extended) {
            if let Some(zone) = self.otes.get(id) {
                debug!(
                    "OTE {} {:.2}-{:.2} from impulse {:.0} ticks",
                    zone.direction, zone.bottom, zone.top, zone.impulse.size_ticks
                );
            }
        }
        for zone in update.rejected.iter().filter_map(|&id| self.otes.get(id)) {
            debug!("OTE {} rejection at {:.2}-{:.2}", zone.direction, zone.bottom, zone.top);
        }
        if leg.is_some() {
            self.impulse = leg;
        }

        let inputs = MmxmInputs {
            sweep,
            displacement,
            new_fvg: new_fvg.and_then(|id| self.fvgs.get(id)),
        };
        if let Some(phase) = self.mmxm.update(&self.history, inputs) {
            debug!("MMXM phase: {}", phase);
        }

        if !self.correlated.is_empty() {
            if let Some(div) = detect_smt_divergence(self.history.bars(), &self.correlated, index, &self.config.smt) {
                info!(
                    "SMT {} divergence: {} {:.2} vs {} {:.2}",
                    div.kind, div.primary_symbol, div.primary_price, div.correlated_symbol, div.correlated_price
                );
                self.smt = Some(div);
            }
        }
    }

    fn reset_chain(&mut self, reason: InvalidationReason, index: usize) {
        let transition = self.machine.reset(reason, index);
        self.transitions.push(transition);
    }

    /// Walk the chain as far as this bar allows, one legal step at a time
    fn advance(
        &mut self,
        bar: &Bar,
        index: usize,
        sweep: Option<SweepEvent>,
        displacement: Option<DisplacementEvent>,
        account: &AccountState,
    ) -> Option<Signal> {
        if self.machine.timed_out(index) {
            let state = self.machine.state();
            self.reset_chain(InvalidationReason::TimedOut(state), index);
            // Only a stale liquidity map expired: re-arm now so this bar's sweep still counts
            if state.has_pending_sweep() {
                return None;
            }
        }

        let mut sweep = sweep;
        loop {
            let state = self.machine.state();
            let ready = match state {
                SignalState::Idle => !self.swings.is_empty(),
                SignalState::SwingFound => !self.liquidity.is_empty(),
                SignalState::LiquidityDefined => match sweep.take() {
                    Some(event) => {
                        self.confirm_sweep(event);
                        true
                    }
                    None => false,
                },
                SignalState::SweepConfirmed => self.confirm_displacement(displacement.as_ref()),
                SignalState::Displacement => self.confirm_mss(bar, index),
                SignalState::Mss => self.confirm_bos(bar, index),
                SignalState::Bos => self.confirm_cisd(index, displacement.as_ref()),
                SignalState::Cisd => self.select_entry_zone(),
                SignalState::FvgFormed => match self.check_entry_trigger(bar, index) {
                    EntryTrigger::Ready => true,
                    EntryTrigger::Waiting => false,
                    EntryTrigger::Invalidated => {
                        self.reset_chain(InvalidationReason::ZoneInvalidated, index);
                        return None;
                    }
                },
                SignalState::ReadyForEntry => return self.finalize(bar, index, account),
            };
            if !ready {
                return None;
            }

            let to = state.next()?;
            match self.machine.advance(to, index) {
                Ok(transition) => self.transitions.push(transition),
                Err(err) => {
                    warn!("{}", err);
                    return None;
                }
            }
        }
    }

    fn confirm_sweep(&mut self, event: SweepEvent) {
        let bias = event.bias();
        info!(
            "SWEEP {} of {} level {:.2} ({:.0} ticks, {} swings) | Bias: {}",
            event.direction, event.kind, event.swept_level, event.excursion_ticks, event.liquidity_strength, bias
        );
        let mut note = format!("Sweep {} of {} level {:.2}", event.direction, event.kind, event.swept_level);
        if event.liquidity_strength > 1 {
            note.push_str(&format!(" (x{})", event.liquidity_strength));
        }
        let setup = self.machine.setup_mut();
        setup.trail.push(note);
        setup.bias = Some(bias);
        setup.sweep = Some(event);
    }

    fn confirm_displacement(&mut self, displacement: Option<&DisplacementEvent>) -> bool {
        let Some(event) = displacement else {
            return false;
        };
        let setup = self.machine.setup();
        let (Some(bias), Some(sweep_index)) = (setup.bias, setup.sweep.as_ref().map(|s| s.index)) else {
            return false;
        };
        if event.direction != bias || event.index < sweep_index {
            return false;
        }

        debug!("Displacement {} {:.1}x average body", event.direction, event.magnitude);
        let setup = self.machine.setup_mut();
        setup
            .trail
            .push(format!("Displacement {:.1}x average body", event.magnitude));
        setup.displacement = Some(event.clone());
        true
    }

    fn confirm_mss(&mut self, bar: &Bar, index: usize) -> bool {
        let Some(bias) = self.machine.bias() else {
            return false;
        };
        let Some(mss) = detect_mss(bar, index, &self.swings, bias, &self.config.structure, self.tick_size) else {
            return false;
        };

        debug!("MSS {} through {:.2}", mss.direction, mss.broken_level);
        let setup = self.machine.setup_mut();
        setup.trail.push(format!("MSS through {:.2}", mss.broken_level));
        setup.mss = Some(mss);
        true
    }

    fn confirm_bos(&mut self, bar: &Bar, index: usize) -> bool {
        let setup = self.machine.setup();
        let Some(sweep) = setup.sweep.as_ref() else {
            return false;
        };
        let Some(bos) = detect_bos(
            bar,
            index,
            &self.swings,
            sweep,
            setup.displacement.as_ref(),
            &self.config.structure,
            self.tick_size,
        ) else {
            return false;
        };

        debug!(
            "BOS {} through {:.2} (quality {:.2})",
            bos.direction, bos.broken_level, bos.quality
        );
        let setup = self.machine.setup_mut();
        setup.trail.push(format!("BOS through {:.2}", bos.broken_level));
        setup.bos = Some(bos);
        true
    }

    fn confirm_cisd(&mut self, index: usize, displacement: Option<&DisplacementEvent>) -> bool {
        if !self.config.orchestrator.require_cisd {
            self.machine.setup_mut().trail.push("CISD waived".to_string());
            return true;
        }
        let Some(event) = displacement else {
            return false;
        };
        let setup = self.machine.setup();
        let Some(sweep) = setup.sweep.as_ref() else {
            return false;
        };
        let Some(cisd) = detect_cisd(
            &self.history,
            index,
            &self.swings,
            sweep,
            event,
            &self.config.structure,
            self.tick_size,
        ) else {
            return false;
        };

        info!("CISD {} through {:.2}", cisd.direction, cisd.broken_level);
        let setup = self.machine.setup_mut();
        setup.trail.push(format!("CISD through {:.2}", cisd.broken_level));
        setup.cisd = Some(cisd);
        true
    }

    /// Newest active FVG in the bias direction formed at or after the confirmation
    fn select_entry_zone(&mut self) -> bool {
        let setup = self.machine.setup();
        let Some(bias) = setup.bias else {
            return false;
        };
        let since = setup
            .cisd
            .as_ref()
            .map(|c| c.index)
            .or_else(|| setup.bos.as_ref().map(|b| b.index))
            .unwrap_or(0);
        let Some(zone) = self.fvgs.newest_active(bias, since) else {
            return false;
        };

        let (entry, ote_confluence) = self.entry_for(zone, bias);
        let id = zone.id;
        let note = format!("{} FVG {:.2}-{:.2}", bias, zone.low, zone.high);
        info!("{} | Entry {:.2}{}", note, entry, if ote_confluence { " (OTE)" } else { "" });

        let setup = self.machine.setup_mut();
        setup.trail.push(note);
        setup.entry_fvg = Some(id);
        setup.entry_price = Some(entry);
        setup.ote_confluence = ote_confluence;
        true
    }

    /// Newest active OTE setup in `bias` whose band intersects `zone`
    fn overlapping_ote(&self, zone: &FvgZone, bias: Bias) -> Option<&OteZone> {
        self.otes.newest_active(bias).filter(|o| fvg_overlaps_ote(zone, o))
    }

    /// Entry price inside `zone`, narrowed to the OTE overlap when enabled
    fn entry_for(&self, zone: &FvgZone, bias: Bias) -> (f64, bool) {
        let mode = self.config.orchestrator.entry_mode;
        if self.config.orchestrator.use_ote_confluence {
            if let Some(ote) = self.overlapping_ote(zone, bias) {
                let low = zone.low.max(ote.bottom);
                let high = zone.high.min(ote.top);
                let band = FvgZone {
                    low,
                    high,
                    midpoint: (low + high) / 2.0,
                    ..zone.clone()
                };
                return (round_to_tick(band.entry_price(mode), self.tick_size), true);
            }
        }
        (round_to_tick(zone.entry_price(mode), self.tick_size), false)
    }

    fn check_entry_trigger(&self, bar: &Bar, index: usize) -> EntryTrigger {
        let setup = self.machine.setup();
        let (Some(id), Some(entry), Some(bias)) = (setup.entry_fvg, setup.entry_price, setup.bias) else {
            return EntryTrigger::Invalidated;
        };
        let Some(zone) = self.fvgs.get(id) else {
            return EntryTrigger::Invalidated;
        };
        if index <= zone.created_index {
            return EntryTrigger::Waiting;
        }
        if zone.age > self.fvgs.config().max_age_bars {
            return EntryTrigger::Invalidated;
        }

        let (reached, closed_through) = match bias {
            Bias::Bullish => (bar.low <= entry, bar.close < zone.low),
            Bias::Bearish => (bar.high >= entry, bar.close > zone.high),
        };
        if reached {
            if !self.window.is_open(bar.timestamp) {
                debug!("Entry {:.2} reached outside killzone", entry);
            } else if self.in_loss_cooldown(bar.timestamp) {
                debug!("Entry {:.2} reached during loss cooldown", entry);
            } else {
                return EntryTrigger::Ready;
            }
        }
        if closed_through {
            EntryTrigger::Invalidated
        } else {
            EntryTrigger::Waiting
        }
    }

    fn in_loss_cooldown(&self, timestamp: DateTime<Utc>) -> bool {
        self.entries_blocked_until.is_some_and(|until| timestamp < until)
    }

    fn in_cooldown_zone(&self, direction: Direction, price: f64) -> bool {
        let zone_ticks = self.config.orchestrator.cooldown_zone_ticks;
        if zone_ticks <= 0.0 {
            return false;
        }
        self.recent_entries
            .iter()
            .any(|(d, p)| *d == direction && to_ticks((p - price).abs(), self.tick_size) <= zone_ticks)
    }

    fn build_candidate(&self, bar: &Bar, index: usize) -> Option<Signal> {
        let setup = self.machine.setup();
        let bias = setup.bias?;
        let entry = setup.entry_price?;
        let sweep = setup.sweep.as_ref()?;
        let zone = self.fvgs.get(setup.entry_fvg?)?;
        let cfg = &self.config.orchestrator;
        let tick = self.tick_size;

        let buffer = cfg.stop_buffer_ticks * tick;
        let min_stop = cfg.min_stop_ticks * tick;
        let stop = match bias {
            Bias::Bullish => (sweep.swept_level - buffer)
                .min(zone.low - buffer)
                .min(entry - min_stop),
            Bias::Bearish => (sweep.swept_level + buffer)
                .max(zone.high + buffer)
                .max(entry + min_stop),
        };
        let stop = round_to_tick(stop, tick);
        let risk = (entry - stop).abs();

        let mut targets: Vec<f64> = cfg
            .rr_targets
            .iter()
            .map(|r| {
                let target = match bias {
                    Bias::Bullish => entry + r * risk,
                    Bias::Bearish => entry - r * risk,
                };
                round_to_tick(target, tick)
            })
            .collect();

        let mut reason = setup.trail.clone();
        reason.push(format!(
            "Entry {:.2} stop {:.2} ({:.0} ticks)",
            entry,
            stop,
            to_ticks(risk, tick)
        ));
        if let Some(index) = self.overlapping_ote(zone, bias).and_then(|o| o.rejection_index) {
            reason.push(format!("OTE rejection candle at bar {}", index));
        }

        if cfg.use_liquidity_runner {
            if let Some(runner) = targets.last().and_then(|&last| self.runner_target(bias, last)) {
                reason.push(format!("Runner at {} {:.2}", runner.kind, runner.price));
                targets.push(round_to_tick(runner.price, tick));
            }
        }

        Some(
            Signal::new(&self.symbol, bias.trade_direction(), entry, stop, targets, bar.timestamp)
                .with_reason(reason)
                .with_tags(self.tags_for(bias, bar, index, zone, setup.ote_confluence)),
        )
    }

    /// Nearest opposing liquidity beyond `last_target`: buy-side above for
    /// longs, sell-side below for shorts
    fn runner_target(&self, bias: Bias, last_target: f64) -> Option<&LiquidityZone> {
        let zones = self.liquidity.iter();
        match bias {
            Bias::Bullish => zones
                .filter(|z| z.side == LevelSide::High && z.price > last_target)
                .min_by(|a, b| a.price.total_cmp(&b.price)),
            Bias::Bearish => zones
                .filter(|z| z.side == LevelSide::Low && z.price < last_target)
                .max_by(|a, b| a.price.total_cmp(&b.price)),
        }
    }

    fn tags_for(&self, bias: Bias, bar: &Bar, index: usize, zone: &FvgZone, ote_confluence: bool) -> Vec<String> {
        let mut tags = vec!["ICT".to_string(), self.window.label(bar.timestamp)];

        let ote = self.overlapping_ote(zone, bias);
        if ote_confluence || ote.is_some() {
            tags.push("OTE".to_string());
        }
        if ote.is_some_and(|o| o.rejected) {
            tags.push("OTE_REJECTION".to_string());
        }

        let smt_age = self.config.smt.max_age_bars;
        if self
            .smt
            .as_ref()
            .is_some_and(|s| s.kind == bias && index.saturating_sub(s.index) <= smt_age)
        {
            tags.push("SMT".to_string());
        }

        let mmxm = self.mmxm.state();
        if self.mmxm.is_valid_for_entry() && mmxm.model.map(|m| m.bias()) == Some(bias) {
            tags.push("MMXM".to_string());
        }
        tags
    }

    /// Prior session, else the overnight range, else the swing range over
    /// the lookback
    fn dealing_range(&self, index: usize) -> Option<DealingRange> {
        let session = self.levels.prior_session().or(self.levels.overnight());
        match session {
            Some(levels) => Some(DealingRange {
                high: levels.high,
                low: levels.low,
            }),
            None => {
                let since = index.saturating_sub(self.config.orchestrator.pd_lookback_bars);
                swing_dealing_range(&self.swings, since)
            }
        }
    }

    /// READY_FOR_ENTRY: price the trade, apply entry filters and ask risk
    fn finalize(&mut self, bar: &Bar, index: usize, account: &AccountState) -> Option<Signal> {
        let Some(candidate) = self.build_candidate(bar, index) else {
            self.reset_chain(InvalidationReason::ZoneInvalidated, index);
            return None;
        };

        let check = candidate.targets.len().min(2).saturating_sub(1);
        let rr = candidate.risk_reward(check).unwrap_or(0.0);
        if rr + 1e-9 < self.config.orchestrator.min_risk_reward {
            info!("SKIPPED: {} | R:R {:.2} below minimum", candidate, rr);
            self.reset_chain(InvalidationReason::RiskRewardTooLow, index);
            return None;
        }
        if self.in_cooldown_zone(candidate.direction, candidate.entry_price) {
            info!("SKIPPED: {} | inside cooldown zone", candidate);
            self.reset_chain(InvalidationReason::CooldownZone, index);
            return None;
        }
        let bias = candidate.direction.bias();
        let cfg = &self.config.orchestrator;
        if cfg.enable_premium_discount_filter {
            if let Some(range) = self.dealing_range(index) {
                if !range.allows(bias, candidate.entry_price, cfg.pd_buffer_pct, self.tick_size) {
                    info!(
                        "SKIPPED: {} | entry in {} of {:.2}-{:.2}",
                        candidate,
                        range.zone_of(candidate.entry_price, cfg.pd_buffer_pct),
                        range.low,
                        range.high
                    );
                    self.reset_chain(InvalidationReason::PremiumDiscount, index);
                    return None;
                }
            }
        }
        if cfg.enable_trend_filter && !self.trend.allows(bias, candidate.entry_price, cfg.trend_filter_mode) {
            info!(
                "SKIPPED: {} | against trend (EMA {:.2})",
                candidate,
                self.trend.ema().unwrap_or(f64::NAN)
            );
            self.reset_chain(InvalidationReason::AgainstTrend, index);
            return None;
        }
        let label = self.window.label(bar.timestamp);
        let max_trades = cfg.max_trades_per_session;
        let taken = self.session_trades.get(&label).copied().unwrap_or(0);
        if max_trades > 0 && taken >= max_trades {
            info!("SKIPPED: {} | {} trades already taken in {}", candidate, taken, label);
            self.reset_chain(InvalidationReason::SessionTradeLimit, index);
            return None;
        }

        let result = self.risk.approve(&candidate, account);
        match result.adjusted_signal {
            Some(signal) if result.approved => {
                info!(
                    "SIGNAL: {} x{} | Risk ${:.2} | {}",
                    signal,
                    result.position_size,
                    result.risk_amount,
                    signal.tags.join(",")
                );
                self.recent_entries.push((signal.direction, signal.entry_price));
                *self.session_trades.entry(label).or_insert(0) += 1;
                self.signals_emitted += 1;
                self.reset_chain(InvalidationReason::Completed, index);
                Some(signal)
            }
            _ => {
                let code = result.rejection_code.unwrap_or(RejectionCode::InvalidSignal);
                info!("REJECTED: {} | {}", candidate, result.reason);
                self.reset_chain(InvalidationReason::RiskRejected(code), index);
                None
            }
        }
    }
}

impl Strategy for IctStrategy {
    fn name(&self) -> &str {
        "ICT"
    }

    fn on_bar(&mut self, bar: &Bar, account: &AccountState) -> Vec<Signal> {
        self.transitions.clear();

        if !bar.is_well_formed() {
            warn!(
                "Skipping malformed bar at {}: O {} H {} L {} C {}",
                bar.timestamp, bar.open, bar.high, bar.low, bar.close
            );
            self.bars_skipped += 1;
            return Vec::new();
        }
        if self.history.last().is_some_and(|last| bar.timestamp < last.timestamp) {
            warn!("Skipping out-of-order bar at {}", bar.timestamp);
            self.bars_skipped += 1;
            return Vec::new();
        }

        let next_index = self.history.last_index().map_or(self.history.first_index(), |i| i + 1);
        self.check_date_change(bar, next_index);
        let index = self.history.push(bar.clone());
        self.bars_processed += 1;

        let new_fvg = self.fvgs.update(&self.history);
        self.trend.push(bar.close);
        let (window, first) = self.history.window_before_last(self.config.swing.max_window);
        self.swings = detect_swings(window, first, &self.config.swing);
        self.liquidity = define_liquidity_zones(&self.swings, index, &self.config.sweep, self.tick_size);
        self.liquidity.extend(self.levels.liquidity(&self.config.sweep));

        let average_body = if self.body_mean.is_ready() {
            self.body_mean.mean()
        } else {
            None
        };
        let displacement = average_body
            .and_then(|avg| classify_displacement(bar, index, avg, &self.config.displacement, self.tick_size));
        self.body_mean.push(bar.body());

        let sweep = most_significant_sweep(detect_sweeps(
            bar,
            index,
            &self.liquidity,
            &self.config.sweep,
            self.tick_size,
        ));

        self.update_context(index, average_body, sweep.as_ref(), displacement.as_ref(), new_fvg);

        match self.advance(bar, index, sweep, displacement, account) {
            Some(signal) => vec![signal],
            None => Vec::new(),
        }
    }

    fn on_fill(&mut self, fill: &Fill) {
        if fill.symbol != self.symbol {
            warn!("Fill for {} routed to {} engine", fill.symbol, self.symbol);
            return;
        }
        let minutes = self.config.orchestrator.loss_cooldown_minutes;
        if let Some(pnl) = fill.realized_pnl {
            if pnl < 0.0 && minutes > 0 {
                let until = fill.timestamp + Duration::minutes(minutes);
                info!("Loss of ${:.2}: entries paused until {}", -pnl, until);
                self.entries_blocked_until = Some(until);
            }
        }
    }

    fn reset_daily(&mut self) {
        self.risk.reset_daily();
        self.entries_blocked_until = None;
        info!("{} daily reset | {}", self.symbol, self.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::test_support::*;
    use crate::trading_core::mmxm::MmxmModel;
    use crate::trading_core::sweep::{SweepDirection, SweepKind};
    use chrono::{NaiveDate, TimeZone};

    /// Flat range, a stepped decline into a 7000 swing low, a sweep of it,
    /// a bullish displacement and a close back above the 7005 swing high.
    fn bos_scenario() -> Vec<Bar> {
        let mut ohlc = vec![(7004.0, 7005.0, 7003.75, 7004.5); 20];
        for i in 0..8 {
            let x = 7003.75 - 0.5 * i as f64;
            ohlc.push((x + 0.5, x + 0.75, x - 0.25, x));
        }
        ohlc.push((7000.25, 7000.75, 7000.25, 7000.5));
        ohlc.push((7000.5, 7000.75, 6999.0, 7000.25)); // 29: sweeps 7000
        ohlc.push((7000.25, 7003.0, 7000.0, 7002.75)); // 30: displacement
        ohlc.push((7005.0, 7005.5, 7004.75, 7005.25)); // 31: through 7005
        bars_from(&ohlc)
    }

    /// Scenario plus a CISD candle and a retrace into its FVG
    fn full_chain() -> Vec<Bar> {
        let mut bars = bos_scenario();
        bars.push(bar_at(32, 7005.25, 7008.0, 7005.0, 7007.75));
        bars.push(bar_at(33, 7007.5, 7007.75, 7003.75, 7004.5));
        bars
    }

    fn generous_risk() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.risk.max_risk_per_trade_usd = 500.0;
        config
    }

    fn feed(engine: &mut IctStrategy, bars: &[Bar], account: &AccountState) -> Vec<Signal> {
        bars.iter().flat_map(|bar| engine.on_bar(bar, account)).collect()
    }

    fn last_reset_reason(engine: &IctStrategy) -> Option<InvalidationReason> {
        match engine.transitions().last() {
            Some(StateTransition::Reset { reason, .. }) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Bullish 100 -> 110 leg: OTE band 102.14 - 103.82
    fn seed_bullish_ote(engine: &mut IctStrategy) {
        for i in 0..5 {
            engine.history.push(bar_at(i, 105.0, 110.0, 104.0, 109.0));
        }
        let ts = bar_at(0, 0.0, 0.0, 0.0, 0.0).timestamp;
        let leg = ImpulseLeg {
            direction: Bias::Bullish,
            start_price: 100.0,
            end_price: 110.0,
            start_index: 0,
            end_index: 4,
            start_time: ts,
            end_time: ts,
            displacement_index: 2,
            size_ticks: 40.0,
            displacement_ratio: 3.0,
        };
        let update = engine.otes.update(&engine.history, Some(&leg));
        assert_eq!(update.created, Some(0));
    }

    fn bullish_fvg(low: f64, high: f64) -> FvgZone {
        FvgZone {
            id: 0,
            direction: Bias::Bullish,
            low,
            high,
            midpoint: (low + high) / 2.0,
            created_index: 3,
            timestamp: bar_at(3, 0.0, 0.0, 0.0, 0.0).timestamp,
            mitigated: false,
            mitigated_index: None,
            age: 1,
            expired: false,
        }
    }

    #[test]
    fn test_sweep_displacement_then_bos() {
        let bars = bos_scenario();
        let account = AccountState::default();
        let mut engine = IctStrategy::new(EngineConfig::default());

        feed(&mut engine, &bars[..29], &account);
        assert_eq!(engine.state(), SignalState::LiquidityDefined);

        engine.on_bar(&bars[29], &account);
        assert_eq!(engine.state(), SignalState::SweepConfirmed);
        let sweep = engine.setup().sweep.clone().expect("sweep");
        assert_eq!(sweep.direction, SweepDirection::Down);
        assert_eq!(sweep.swept_level, 7000.0);
        assert_eq!(engine.setup().bias, Some(Bias::Bullish));

        engine.on_bar(&bars[30], &account);
        assert_eq!(engine.state(), SignalState::Displacement);

        engine.on_bar(&bars[31], &account);
        assert_eq!(engine.state(), SignalState::Bos);
        assert_eq!(
            engine.transitions(),
            &[
                StateTransition::Advanced {
                    from: SignalState::Displacement,
                    to: SignalState::Mss,
                    index: 31
                },
                StateTransition::Advanced {
                    from: SignalState::Mss,
                    to: SignalState::Bos,
                    index: 31
                },
            ]
        );
        let bos = engine.setup().bos.clone().expect("bos");
        assert_eq!(bos.broken_level, 7005.0);
        assert!(bos.confirms_sweep);
    }

    #[test]
    fn test_cisd_timeout_invalidates_chain() {
        let account = AccountState::default();
        let mut engine = IctStrategy::new(EngineConfig::default());
        feed(&mut engine, &bos_scenario(), &account);
        assert_eq!(engine.state(), SignalState::Bos);

        for minute in 32..=41 {
            engine.on_bar(&bar_at(minute, 7005.25, 7005.5, 7005.0, 7005.5), &account);
        }
        assert_eq!(engine.state(), SignalState::Bos);

        engine.on_bar(&bar_at(42, 7005.25, 7005.5, 7005.0, 7005.5), &account);
        assert_eq!(engine.state(), SignalState::Idle);
        assert_eq!(
            engine.transitions(),
            &[StateTransition::Reset {
                from: SignalState::Bos,
                reason: InvalidationReason::TimedOut(SignalState::Bos),
                index: 42
            }]
        );
        assert_eq!(engine.setup(), &PendingSetup::default());
    }

    #[test]
    fn test_sweep_on_liquidity_expiry_bar_is_taken() {
        let account = AccountState::default();
        let mut config = EngineConfig::default();
        config.orchestrator.timeouts.sweep_bars = 3;
        let mut engine = IctStrategy::new(config);

        // Liquidity is defined on bar 5, its budget runs out on bar 9
        let flat = bars_from(&[(7004.0, 7005.0, 7003.75, 7004.5); 9]);
        feed(&mut engine, &flat, &account);
        assert_eq!(engine.state(), SignalState::LiquidityDefined);

        engine.on_bar(&bar_at(9, 7004.0, 7005.0, 7003.0, 7004.25), &account);
        assert_eq!(engine.state(), SignalState::SweepConfirmed);
        assert_eq!(
            engine.transitions().first(),
            Some(&StateTransition::Reset {
                from: SignalState::LiquidityDefined,
                reason: InvalidationReason::TimedOut(SignalState::LiquidityDefined),
                index: 9
            })
        );
        let sweep = engine.setup().sweep.clone().expect("sweep");
        assert_eq!(sweep.direction, SweepDirection::Down);
        assert_eq!(sweep.swept_level, 7003.75);
        assert_eq!(sweep.index, 9);
    }

    #[test]
    fn test_full_chain_emits_sized_signal() {
        let bars = full_chain();
        let account = AccountState::default();
        let mut engine = IctStrategy::new(generous_risk());

        let early = feed(&mut engine, &bars[..33], &account);
        assert!(early.is_empty());
        assert_eq!(engine.state(), SignalState::FvgFormed);
        assert_eq!(engine.setup().entry_price, Some(7004.0));

        let signals = engine.on_bar(&bars[33], &account);
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry_price, 7004.0);
        assert_eq!(signal.stop_price, 6999.5);
        assert_eq!(signal.targets, vec![7008.5, 7013.0, 7017.5]);
        assert_eq!(signal.quantity, Some(2));
        assert_eq!(&signal.tags[..2], &["ICT".to_string(), "NY_OPEN".to_string()]);
        assert!(signal.reason[0].starts_with("Sweep DOWN"));
        assert!(signal.reason.iter().any(|r| r.starts_with("CISD")));

        assert_eq!(engine.state(), SignalState::Idle);
        assert!(matches!(
            engine.transitions().last(),
            Some(StateTransition::Reset {
                reason: InvalidationReason::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_cisd_without_entry_zone_times_out_to_idle() {
        let account = AccountState::default();
        let mut config = generous_risk();
        // No gap qualifies as an entry zone
        config.fvg.min_fvg_ticks = 100.0;
        config.orchestrator.timeouts.fvg_bars = 3;
        let mut engine = IctStrategy::new(config);

        let bars = full_chain();
        feed(&mut engine, &bars[..33], &account);
        assert_eq!(engine.state(), SignalState::Cisd);
        assert!(engine.setup().cisd.is_some());
        assert!(engine.fvg_tracker().zones().is_empty());

        for minute in 33..36 {
            engine.on_bar(&bar_at(minute, 7007.5, 7007.75, 7007.25, 7007.5), &account);
            assert_eq!(engine.state(), SignalState::Cisd);
        }
        let signals = engine.on_bar(&bar_at(36, 7007.5, 7007.75, 7007.25, 7007.5), &account);
        assert!(signals.is_empty());
        assert_eq!(engine.state(), SignalState::Idle);
        assert_eq!(
            engine.transitions(),
            &[StateTransition::Reset {
                from: SignalState::Cisd,
                reason: InvalidationReason::TimedOut(SignalState::Cisd),
                index: 36
            }]
        );
    }

    #[test]
    fn test_ote_confluence_narrows_entry() {
        let mut config = EngineConfig::default();
        config.orchestrator.use_ote_confluence = true;
        let mut engine = IctStrategy::new(config);
        seed_bullish_ote(&mut engine);

        // Overlap 102.14 - 103.0, midpoint 102.57 rounds to 102.5
        let zone = bullish_fvg(101.0, 103.0);
        assert_eq!(engine.entry_for(&zone, Bias::Bullish), (102.5, true));
        assert_eq!(engine.entry_for(&zone, Bias::Bearish), (102.0, false));

        let clear_of_ote = bullish_fvg(106.0, 108.0);
        assert_eq!(engine.entry_for(&clear_of_ote, Bias::Bullish), (107.0, false));

        engine.config.orchestrator.use_ote_confluence = false;
        assert_eq!(engine.entry_for(&zone, Bias::Bullish), (102.0, false));
    }

    #[test]
    fn test_confluence_tags() {
        let mut engine = IctStrategy::new(EngineConfig::default());
        seed_bullish_ote(&mut engine);
        let zone = bullish_fvg(101.0, 103.0);
        let bar = bar_at(4, 105.0, 110.0, 104.0, 109.0);

        let tags = engine.tags_for(Bias::Bullish, &bar, 4, &zone, false);
        assert_eq!(tags, vec!["ICT", "NY_OPEN", "OTE"]);
        assert!(!engine.tags_for(Bias::Bullish, &bar, 4, &bullish_fvg(106.0, 108.0), false).contains(&"OTE".to_string()));

        // Hammer inside the OTE band
        engine.history.push(bar_at(5, 103.5, 104.0, 102.5, 103.9));
        let update = engine.otes.update(&engine.history, None);
        assert_eq!(update.rejected, vec![0]);

        engine.smt = Some(SmtDivergence {
            kind: Bias::Bullish,
            primary_symbol: "ES".to_string(),
            correlated_symbol: "NQ".to_string(),
            primary_price: 101.0,
            correlated_price: 205.0,
            index: 3,
            timestamp: bar.timestamp,
        });
        let state = engine.mmxm.state_mut();
        state.model = Some(MmxmModel::Buy);
        state.is_valid_sequence = true;

        let tags = engine.tags_for(Bias::Bullish, &bar, 5, &zone, false);
        assert_eq!(tags, vec!["ICT", "NY_OPEN", "OTE", "OTE_REJECTION", "SMT", "MMXM"]);

        // Old SMT and an opposite model do not tag
        let tags = engine.tags_for(Bias::Bullish, &bar, 20, &zone, false);
        assert!(!tags.contains(&"SMT".to_string()));
        engine.mmxm.state_mut().model = Some(MmxmModel::Sell);
        let tags = engine.tags_for(Bias::Bullish, &bar, 5, &zone, false);
        assert!(!tags.contains(&"MMXM".to_string()));
    }

    #[test]
    fn test_premium_discount_filter() {
        let bars = full_chain();
        let mut config = generous_risk();
        config.orchestrator.enable_premium_discount_filter = true;

        // Swing range 6999 - 7005: a 7004 long buys in premium
        let mut engine = IctStrategy::new(config.clone());
        let signals = feed(&mut engine, &bars, &AccountState::default());
        assert!(signals.is_empty());
        assert_eq!(last_reset_reason(&engine), Some(InvalidationReason::PremiumDiscount));

        // Equilibrium 7010 of the prior session leaves 7004 in discount
        let mut engine = IctStrategy::new(config);
        engine.set_session_levels(SessionLevels {
            date: NaiveDate::from_ymd_opt(2025, 1, 3).expect("date"),
            high: 7040.0,
            low: 6980.0,
        });
        let signals = feed(&mut engine, &bars, &AccountState::default());
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn test_trend_filter_needs_recent_crossover() {
        let bars = full_chain();
        let mut config = generous_risk();
        config.orchestrator.enable_trend_filter = true;

        // Close crossed the 20 EMA on bar 30, inside the 10 bar lookback
        let mut engine = IctStrategy::new(config.clone());
        let signals = feed(&mut engine, &bars, &AccountState::default());
        assert_eq!(signals.len(), 1);
        assert!(engine.trend.ema().is_some_and(|ema| ema < 7004.0));

        config.orchestrator.crossover_lookback_bars = 2;
        let mut engine = IctStrategy::new(config);
        let signals = feed(&mut engine, &bars, &AccountState::default());
        assert!(signals.is_empty());
        assert_eq!(last_reset_reason(&engine), Some(InvalidationReason::AgainstTrend));
    }

    #[test]
    fn test_session_trade_limit() {
        let bars = full_chain();
        let mut config = generous_risk();
        config.orchestrator.max_trades_per_session = 1;

        let mut engine = IctStrategy::new(config.clone());
        assert_eq!(feed(&mut engine, &bars, &AccountState::default()).len(), 1);
        assert_eq!(engine.session_trades.get("NY_OPEN"), Some(&1));

        let mut engine = IctStrategy::new(config);
        engine.session_trades.insert("NY_OPEN".to_string(), 1);
        assert!(feed(&mut engine, &bars, &AccountState::default()).is_empty());
        assert_eq!(last_reset_reason(&engine), Some(InvalidationReason::SessionTradeLimit));
    }

    #[test]
    fn test_liquidity_runner_target() {
        let bars = full_chain();
        let mut config = generous_risk();
        config.orchestrator.use_liquidity_runner = true;
        let mut engine = IctStrategy::new(config);
        engine.set_session_levels(SessionLevels {
            date: NaiveDate::from_ymd_opt(2025, 1, 3).expect("date"),
            high: 7040.0,
            low: 6980.0,
        });

        let signals = feed(&mut engine, &bars, &AccountState::default());
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].targets, vec![7008.5, 7013.0, 7017.5, 7040.0]);
        assert!(signals[0].reason.iter().any(|r| r == "Runner at PRIOR_SESSION 7040.00"));
    }

    #[test]
    fn test_liquidity_clusters_and_key_levels() {
        let bars = bos_scenario();
        let mut engine = IctStrategy::new(EngineConfig::default());
        feed(&mut engine, &bars[..29], &AccountState::default());

        // The flat open leaves one clustered buy-side zone at 7005
        let bsl = engine
            .liquidity()
            .iter()
            .find(|z| z.kind == SweepKind::Swing && z.side == LevelSide::High)
            .copied()
            .expect("buy-side");
        assert_eq!(bsl.price, 7005.0);
        assert!(bsl.strength > 1);

        let range = engine.key_levels().opening_range().copied().expect("opening range");
        assert_eq!((range.high, range.low), (7005.0, 7003.75));
        assert!(engine.liquidity().iter().any(|z| z.kind == SweepKind::OpeningRange));
    }

    #[test]
    fn test_new_date_retires_arena_zones() {
        let bars = full_chain();
        let account = AccountState::default();
        let mut engine = IctStrategy::new(generous_risk());
        feed(&mut engine, &bars[..33], &account);
        assert_eq!(engine.state(), SignalState::FvgFormed);
        let zones = engine.fvg_tracker().zones().len();
        assert!(zones > 0);

        engine.on_bar(&bar_at(24 * 60, 7004.0, 7005.0, 7003.0, 7004.5), &account);
        assert!(matches!(
            engine.transitions().first(),
            Some(StateTransition::Reset {
                from: SignalState::FvgFormed,
                reason: InvalidationReason::NewSession,
                ..
            })
        ));
        assert!(engine.setup().entry_fvg.is_none());
        assert_eq!(engine.fvg_tracker().zones().len(), zones);
        assert_eq!(engine.fvg_tracker().active().count(), 0);
        assert!(engine.fvg_tracker().zones().iter().all(|z| z.expired));
        assert!(engine.ote_tracker().active().next().is_none());
    }

    #[test]
    fn test_daily_loss_rejects_and_trips_breaker() {
        let bars = full_chain();
        let mut engine = IctStrategy::new(generous_risk());
        feed(&mut engine, &bars[..33], &AccountState::default());

        let losing = AccountState {
            daily_pnl: -500.0,
            ..Default::default()
        };
        let signals = engine.on_bar(&bars[33], &losing);
        assert!(signals.is_empty());
        assert_eq!(engine.state(), SignalState::Idle);
        assert!(matches!(
            engine.transitions().last(),
            Some(StateTransition::Reset {
                reason: InvalidationReason::RiskRejected(RejectionCode::MaxDailyLossReached),
                ..
            })
        ));
        assert!(!engine.risk_manager().is_trading_enabled());

        engine.reset_daily();
        assert!(engine.risk_manager().is_trading_enabled());
    }

    #[test]
    fn test_killzone_holds_entry() {
        let bars = full_chain();
        let account = AccountState::default();
        let mut config = generous_risk();
        config.session.killzones = vec![crate::trading_core::session::KillzoneWindow::new(
            "LONDON",
            (2, 0),
            (5, 0),
        )];
        let mut engine = IctStrategy::new(config);

        let signals = feed(&mut engine, &bars, &account);
        assert!(signals.is_empty());
        assert_eq!(engine.state(), SignalState::FvgFormed);
    }

    #[test]
    fn test_risk_reward_floor() {
        let bars = full_chain();
        let mut config = generous_risk();
        config.orchestrator.min_risk_reward = 2.5;
        let mut engine = IctStrategy::new(config);

        let signals = feed(&mut engine, &bars, &AccountState::default());
        assert!(signals.is_empty());
        assert!(matches!(
            engine.transitions().last(),
            Some(StateTransition::Reset {
                reason: InvalidationReason::RiskRewardTooLow,
                ..
            })
        ));
    }

    #[test]
    fn test_cooldown_zone() {
        let mut engine = IctStrategy::new(EngineConfig::default());
        engine.recent_entries.push((Direction::Long, 7004.0));
        assert!(engine.in_cooldown_zone(Direction::Long, 7008.0)); // 16 ticks
        assert!(!engine.in_cooldown_zone(Direction::Long, 7010.0)); // 24 ticks
        assert!(!engine.in_cooldown_zone(Direction::Short, 7004.0));
    }

    #[test]
    fn test_malformed_bar_skipped() {
        let mut engine = IctStrategy::new(EngineConfig::default());
        let account = AccountState::default();

        let signals = engine.on_bar(&bar_at(0, 100.0, 99.0, 101.0, 100.0), &account);
        assert!(signals.is_empty());
        assert_eq!(engine.bars_skipped(), 1);
        assert!(engine.history().is_empty());

        let mut nan = bar_at(1, 100.0, 101.0, 99.0, 100.0);
        nan.close = f64::NAN;
        engine.on_bar(&nan, &account);
        assert_eq!(engine.bars_skipped(), 2);

        // Equal timestamps are in order, an earlier one is not
        engine.on_bar(&bar_at(2, 100.0, 101.0, 99.0, 100.5), &account);
        engine.on_bar(&bar_at(2, 100.0, 101.0, 99.0, 100.5), &account);
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.bars_skipped(), 2);

        engine.on_bar(&bar_at(1, 100.0, 101.0, 99.0, 100.5), &account);
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.bars_skipped(), 3);
    }

    #[test]
    fn test_correlated_bars_accept_equal_timestamps() {
        let mut engine = IctStrategy::new(EngineConfig::default());
        let bar = bar_at(0, 200.0, 201.0, 199.0, 200.5).with_symbol("NQ");
        engine.push_correlated_bar(&bar);
        engine.push_correlated_bar(&bar);
        assert_eq!(engine.correlated_bars().len(), 2);

        engine.push_correlated_bar(&bar_at(-1, 200.0, 201.0, 199.0, 200.5).with_symbol("NQ"));
        assert_eq!(engine.correlated_bars().len(), 2);
    }

    #[test]
    fn test_new_session_rolls_levels_and_drops_chain() {
        let account = AccountState::default();
        let mut engine = IctStrategy::new(EngineConfig::default());
        let day_one = bars_from(&[(100.0, 101.0, 99.0, 100.5); 6]);
        feed(&mut engine, &day_one, &account);
        assert_eq!(engine.state(), SignalState::LiquidityDefined);
        assert!(engine.prior_session().is_none());

        engine.on_bar(&bar_at(24 * 60, 100.0, 102.0, 98.0, 101.0), &account);
        let levels = engine.prior_session().copied().expect("levels");
        assert_eq!(levels.date, NaiveDate::from_ymd_opt(2025, 1, 6).expect("date"));
        assert_eq!((levels.high, levels.low), (101.0, 99.0));
        assert_eq!(
            engine.transitions().first(),
            Some(&StateTransition::Reset {
                from: SignalState::LiquidityDefined,
                reason: InvalidationReason::NewSession,
                index: 6
            })
        );
    }

    #[test]
    fn test_losing_fill_pauses_entries() {
        let mut config = EngineConfig::default();
        config.orchestrator.loss_cooldown_minutes = 30;
        let mut engine = IctStrategy::new(config);
        let at = Utc.with_ymd_and_hms(2025, 1, 6, 15, 0, 0).unwrap();

        let mut fill = Fill {
            symbol: "ES".to_string(),
            direction: Direction::Long,
            price: 7000.0,
            quantity: 1,
            timestamp: at,
            realized_pnl: Some(125.0),
        };
        engine.on_fill(&fill);
        assert_eq!(engine.entries_blocked_until(), None);

        fill.realized_pnl = Some(-125.0);
        engine.on_fill(&fill);
        assert_eq!(engine.entries_blocked_until(), Some(at + Duration::minutes(30)));
        assert!(engine.in_loss_cooldown(at + Duration::minutes(29)));
        assert!(!engine.in_loss_cooldown(at + Duration::minutes(30)));

        engine.reset_daily();
        assert_eq!(engine.entries_blocked_until(), None);
    }
}
