//! Killzone windows and New York session dates

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

/// Predicate consulted before a bar may produce an entry
pub trait TradingWindow: Send {
    fn is_open(&self, timestamp: DateTime<Utc>) -> bool;

    /// Short label for tagging signals
    fn label(&self, timestamp: DateTime<Utc>) -> String;
}

/// Time-of-day window in New York time. `start > end` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillzoneWindow {
    pub name: String,
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl KillzoneWindow {
    pub fn new(name: &str, start: (u32, u32), end: (u32, u32)) -> Self {
        Self {
            name: name.to_string(),
            start_hour: start.0,
            start_minute: start.1,
            end_hour: end.0,
            end_minute: end.1,
            enabled: true,
        }
    }

    fn start(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    fn end(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }

    /// Minute-of-day check, start inclusive and end exclusive
    pub fn contains(&self, hour: u32, minute: u32) -> bool {
        let current = hour * 60 + minute;
        let (start, end) = (self.start(), self.end());
        if start <= end {
            current >= start && current < end
        } else {
            current >= start || current < end
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start_hour < 24 && self.end_hour < 24 && self.start_minute < 60 && self.end_minute < 60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub killzones: Vec<KillzoneWindow>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            killzones: vec![
                KillzoneWindow::new("NY_OPEN", (9, 30), (11, 0)),
                KillzoneWindow::new("LONDON", (2, 0), (5, 0)),
            ],
        }
    }
}

/// Killzone filter. With no enabled windows every bar is inside.
#[derive(Debug, Clone)]
pub struct SessionFilter {
    killzones: Vec<KillzoneWindow>,
}

impl SessionFilter {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            killzones: config.killzones.clone(),
        }
    }

    /// Filter that never blocks
    pub fn always_open() -> Self {
        Self { killzones: Vec::new() }
    }

    fn enabled(&self) -> impl Iterator<Item = &KillzoneWindow> {
        self.killzones.iter().filter(|k| k.enabled)
    }

    pub fn active_killzone(&self, timestamp: DateTime<Utc>) -> Option<&KillzoneWindow> {
        let et = timestamp.with_timezone(&New_York);
        self.enabled().find(|k| k.contains(et.hour(), et.minute()))
    }

    pub fn is_in_killzone(&self, timestamp: DateTime<Utc>) -> bool {
        self.enabled().next().is_none() || self.active_killzone(timestamp).is_some()
    }

    /// Name of the active window or "OFF"
    pub fn current_session_label(&self, timestamp: DateTime<Utc>) -> String {
        self.active_killzone(timestamp)
            .map(|k| k.name.clone())
            .unwrap_or_else(|| "OFF".to_string())
    }

    /// Next window to open and the minutes until it does
    pub fn next_killzone(&self, timestamp: DateTime<Utc>) -> Option<(&KillzoneWindow, u32)> {
        let et = timestamp.with_timezone(&New_York);
        let now = et.hour() * 60 + et.minute();
        self.enabled()
            .map(|k| {
                let wait = (k.start() + 24 * 60 - now) % (24 * 60);
                (k, wait)
            })
            .filter(|(_, wait)| *wait > 0)
            .min_by_key(|(_, wait)| *wait)
    }
}

impl TradingWindow for SessionFilter {
    fn is_open(&self, timestamp: DateTime<Utc>) -> bool {
        self.is_in_killzone(timestamp)
    }

    fn label(&self, timestamp: DateTime<Utc>) -> String {
        self.current_session_label(timestamp)
    }
}

/// Calendar date of the bar in New York
pub fn trading_date(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&New_York).date_naive()
}
