//! HTTP adapters for the collaborator traits

pub mod binance;
pub mod reddit;

pub use binance::BinanceClient;
pub use reddit::{RedditFeed, RiskLevel};
