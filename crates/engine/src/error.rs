//! Error types for the engine

use persistence::DbError;
use thiserror::Error;

/// Indicator computation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("Incorrect data. Expected: {expected}. Got: {received:?} ({count} elements)")]
    DataInsufficient {
        received: Vec<f64>,
        count: usize,
        expected: String,
    },

    #[error("Empty price window")]
    EmptyWindow,
}

/// Startup configuration failures, fatal to the process
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("No tickers defined for the cycle. Set TICKERS, provide a ticker file, or enable wild mode")]
    NoInstruments,

    #[error("Rumour must be a float and less than 1. Attempted to pass {0} as the rumour")]
    InvalidRumourRatio(String),

    #[error("Report window must look like HH:MM-HH:MM, got {0}")]
    InvalidReportWindow(String),

    #[error("History window must hold at least one price")]
    EmptyHistoryWindow,
}

/// Transient failures talking to a collaborator (network, store, parsing)
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Could not parse response: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] DbError),

    #[error("No {0} configured")]
    NotConfigured(&'static str),
}

/// Everything that can end a single scheduler iteration early
#[derive(Error, Debug)]
pub enum PassError {
    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl From<DbError> for PassError {
    fn from(e: DbError) -> Self {
        PassError::Source(SourceError::Store(e))
    }
}
