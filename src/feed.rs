//! Bar sources for the replay driver
//!
//! The engine never does I/O itself; a [`BarFeed`] is pulled one bar at a time.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::trading_core::bars::Bar;

/// Pull-based bar source. `Ok(None)` marks the end of the feed.
pub trait BarFeed {
    fn next_bar(&mut self) -> Result<Option<Bar>>;
}

/// In-memory feed, mostly for tests
#[derive(Debug, Clone, Default)]
pub struct VecBarFeed {
    bars: VecDeque<Bar>,
}

impl VecBarFeed {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars: bars.into() }
    }

    pub fn remaining(&self) -> usize {
        self.bars.len()
    }
}

impl BarFeed for VecBarFeed {
    fn next_bar(&mut self) -> Result<Option<Bar>> {
        Ok(self.bars.pop_front())
    }
}

/// One CSV row. `symbol` and `timeframe` columns are optional.
#[derive(Debug, Deserialize)]
struct CsvBarRow {
    #[serde(alias = "ts_event", alias = "time")]
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    timeframe: Option<String>,
}

/// Parse RFC 3339 or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("Failed to parse timestamp: {}", raw))
}

/// CSV bars with header `timestamp,open,high,low,close,volume[,symbol][,timeframe]`
pub struct CsvBarFeed<R: Read> {
    records: csv::DeserializeRecordsIntoIter<R, CsvBarRow>,
    symbol: String,
    row: u64,
}

impl<R: Read> CsvBarFeed<R> {
    /// `symbol` fills rows that have no symbol column
    pub fn from_reader(reader: R, symbol: &str) -> Self {
        Self {
            records: csv::Reader::from_reader(reader).into_deserialize(),
            symbol: symbol.to_string(),
            row: 0,
        }
    }
}

impl CsvBarFeed<Box<dyn Read + Send>> {
    /// Open a `.csv` file, or a zstd-compressed `.zst` one
    pub fn open(path: &Path, symbol: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

        let reader: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "zst") {
            let decoder = zstd::stream::Decoder::new(file)
                .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
            Box::new(BufReader::new(decoder))
        } else {
            Box::new(BufReader::new(file))
        };

        Ok(Self::from_reader(reader, symbol))
    }
}

impl<R: Read> BarFeed for CsvBarFeed<R> {
    fn next_bar(&mut self) -> Result<Option<Bar>> {
        let Some(record) = self.records.next() else {
            return Ok(None);
        };
        self.row += 1;
        let row = record.with_context(|| format!("Failed to parse CSV row {}", self.row))?;
        let timestamp =
            parse_timestamp(&row.timestamp).with_context(|| format!("Bad timestamp in CSV row {}", self.row))?;

        let mut bar = Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume);
        bar.symbol = row
            .symbol
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.symbol.clone());
        if let Some(timeframe) = row.timeframe.filter(|t| !t.is_empty()) {
            bar.timeframe = timeframe;
        }
        Ok(Some(bar))
    }
}

/// Drain a feed into memory
pub fn collect_bars(feed: &mut dyn BarFeed) -> Result<Vec<Bar>> {
    let mut bars = Vec::new();
    while let Some(bar) = feed.next_bar()? {
        bars.push(bar);
    }
    Ok(bars)
}
