//! Trend Sentinel engine
//!
//! Samples prices for a set of instruments on a fixed interval, keeps the
//! history in SQLite and computes SMA, EMA and a two-stage RSI after every
//! observation. Provides:
//! - Indicator engine and the guard serializing its persisted EMA state
//! - Daily reporting gate with batch notification
//! - Rumor-feed discovery of untracked instruments
//! - Bounded worker-pool scheduler tying the above together
//! - Binance price and Reddit rumor adapters

pub mod api;
pub mod config;
pub mod discovery;
pub mod error;
pub mod guard;
pub mod indicators;
pub mod reporting;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use api::{BinanceClient, RedditFeed, RiskLevel};
pub use config::{Deadline, RunConfig};
pub use discovery::{CandidateScore, DiscoveryTask};
pub use error::{ConfigError, IndicatorError, PassError, SourceError};
pub use guard::HistoryGuard;
pub use indicators::{analyze, Analysis};
pub use reporting::{GateState, ReportWindow, ReportingGate};
pub use scheduler::{
    AnalysisBoard, Clock, ProgressSnapshot, Scheduler, SchedulerProgress, SchedulerStatus,
    WorkItem,
};
pub use sources::{LogNotifier, NotificationBatch, Notifier, PriceSource, RumorFeed, WebhookNotifier};
pub use store::{HistoryStore, SqliteHistoryStore};
pub use types::*;
