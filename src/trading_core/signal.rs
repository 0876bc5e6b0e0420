//! Directional bias, trade signals and fills

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expected direction of the next move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
}

impl Bias {
    pub fn opposite(self) -> Self {
        match self {
            Bias::Bullish => Bias::Bearish,
            Bias::Bearish => Bias::Bullish,
        }
    }

    pub fn trade_direction(self) -> Direction {
        match self {
            Bias::Bullish => Direction::Long,
            Bias::Bearish => Direction::Short,
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Bullish => write!(f, "BULLISH"),
            Bias::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn bias(self) -> Bias {
        match self {
            Direction::Long => Bias::Bullish,
            Direction::Short => Bias::Bearish,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Orders rest at the entry price; market entries are not produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Limit,
}

/// Candidate trade handed to the execution collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: f64,
    pub stop_price: f64,
    /// Ordered nearest first
    pub targets: Vec<f64>,
    pub time_in_force: String,
    pub reason: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Contracts approved by the risk manager
    pub quantity: Option<u32>,
}

impl Signal {
    pub fn new(
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        stop_price: f64,
        targets: Vec<f64>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            direction,
            entry_type: EntryType::Limit,
            entry_price,
            stop_price,
            targets,
            time_in_force: "DAY".to_string(),
            reason: Vec::new(),
            tags: Vec::new(),
            created_at,
            quantity: None,
        }
    }

    pub fn with_reason(mut self, reason: Vec<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Adjusted copy carrying an approved size
    pub fn with_quantity(&self, quantity: u32) -> Self {
        let mut adjusted = self.clone();
        adjusted.quantity = Some(quantity);
        adjusted
    }

    /// Entry to stop distance in price
    pub fn risk_distance(&self) -> f64 {
        (self.entry_price - self.stop_price).abs()
    }

    /// Reward to risk of the given target, `None` when risk is zero
    pub fn risk_reward(&self, target_idx: usize) -> Option<f64> {
        let risk = self.risk_distance();
        let target = self.targets.get(target_idx)?;
        if risk > 0.0 {
            Some((target - self.entry_price).abs() / risk)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} @ {:.2} stop {:.2} targets {:?}",
            self.direction, self.symbol, self.entry_price, self.stop_price, self.targets
        )
    }
}

/// Fill report from the execution collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub direction: Direction,
    pub price: f64,
    pub quantity: u32,
    pub timestamp: DateTime<Utc>,
    /// Realized P&L in USD when the fill closes a position
    pub realized_pnl: Option<f64>,
}
