//! Core data types shared across the engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked financial symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A single observation from a price source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// A persisted observation, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub instrument: Instrument,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// RSI reading against the 70/30 thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Overbought,
    Oversold,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Overbought => "overbought",
            Sentiment::Oversold => "oversold",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-stage RSI output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiReading {
    pub rsi_step_one: f64,
    pub rsi_step_two: f64,
    /// Last raw price of the window
    pub current: f64,
    pub sentiment: Sentiment,
}

/// Per-pass analysis output. Ephemeral: only the EMA state and reports persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub instrument: Instrument,
    pub simple_moving_average: f64,
    pub exponential_moving_average: f64,
    /// `None` while the history is shorter than the RSI minimum
    pub relative_strength_index: Option<RsiReading>,
    pub analyzed_at: DateTime<Utc>,
}

/// Daily snapshot of one instrument, keyed by (instrument, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub moving_average: f64,
    pub relative_strength_index: f64,
    pub sentiment: Sentiment,
    pub bottoms: u32,
    pub tops: u32,
    pub initial_hour_movement: f64,
    pub power_hour_movement: f64,
}

/// One mined mention of a candidate instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Target date, `None` when the text carried no parseable date
    pub date: Option<DateTime<Utc>>,
    /// Target price named in the mention
    pub magnitude: f64,
}
