//! Historical replay: drive one engine from a bar feed
//!
//! The driver stands in for the execution side. It keeps a minimal account
//! snapshot (each emitted signal counts as a trade) and starts a new risk day
//! whenever the New York date changes.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::feed::BarFeed;
use crate::risk::AccountState;
use crate::trading_core::bars::Bar;
use crate::trading_core::session::trading_date;
use crate::trading_core::signal::Signal;
use crate::trading_core::strategy::{IctStrategy, Strategy};

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub symbol: String,
    pub bars: u64,
    pub skipped: u64,
    pub days: u32,
    pub signals: Vec<Signal>,
    pub status: String,
}

impl ReplayReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} bars ({} skipped) over {} days | {} signals",
            self.symbol,
            self.bars,
            self.skipped,
            self.days,
            self.signals.len()
        )
    }
}

/// Replay `feed` through `engine`.
///
/// `correlated` must be in timestamp order; each correlated bar is delivered
/// before the first primary bar at or after its timestamp.
pub fn run_replay(
    engine: &mut IctStrategy,
    feed: &mut dyn BarFeed,
    correlated: &[Bar],
    starting_balance: f64,
) -> Result<ReplayReport> {
    let mut account = AccountState {
        balance: starting_balance,
        ..Default::default()
    };
    let mut report = ReplayReport {
        symbol: engine.symbol().to_string(),
        bars: 0,
        skipped: 0,
        days: 0,
        signals: Vec::new(),
        status: String::new(),
    };

    let mut current_date = None;
    let mut next_correlated = 0;
    while let Some(bar) = feed.next_bar()? {
        let date = trading_date(bar.timestamp);
        if current_date != Some(date) {
            if current_date.is_some() {
                engine.reset_daily();
                account = AccountState {
                    balance: account.balance,
                    ..Default::default()
                };
            }
            debug!("{} trading day {}", report.symbol, date);
            current_date = Some(date);
            report.days += 1;
        }

        while next_correlated < correlated.len() && correlated[next_correlated].timestamp <= bar.timestamp {
            engine.push_correlated_bar(&correlated[next_correlated]);
            next_correlated += 1;
        }

        let signals = engine.on_bar(&bar, &account);
        for signal in &signals {
            account.trades_today += 1;
            account.last_trade_time = Some(signal.created_at);
        }
        report.signals.extend(signals);
        report.bars += 1;
    }

    report.skipped = engine.bars_skipped();
    report.status = engine.status();
    info!("{}", report.summary());
    Ok(report)
}
