//! In-process fakes for the collaborator traits

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::SourceError;
use crate::sources::{MinedMentions, NotificationBatch, Notifier, PriceSource, RumorFeed};
use crate::types::{Instrument, PriceQuote};

/// Fixed prices; unknown instruments fail like an unreachable exchange
pub struct FakePrices {
    prices: HashMap<Instrument, f64>,
    calls: Mutex<Vec<Instrument>>,
}

impl FakePrices {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices
                .iter()
                .map(|(s, v)| (Instrument::new(*s), *v))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Instrument> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceSource for FakePrices {
    async fn fetch(&self, instrument: &Instrument) -> Result<PriceQuote, SourceError> {
        self.calls.lock().unwrap().push(instrument.clone());
        match self.prices.get(instrument) {
            Some(value) => Ok(PriceQuote {
                value: *value,
                observed_at: Utc::now(),
            }),
            None => Err(SourceError::Status {
                service: "fake",
                status: 404,
                body: format!("unknown symbol {instrument}"),
            }),
        }
    }
}

pub struct FakeFeed {
    mined: Option<MinedMentions>,
}

impl FakeFeed {
    pub fn new(mined: MinedMentions) -> Self {
        Self { mined: Some(mined) }
    }

    pub fn failing() -> Self {
        Self { mined: None }
    }
}

#[async_trait]
impl RumorFeed for FakeFeed {
    async fn mine(&self) -> Result<MinedMentions, SourceError> {
        self.mined
            .clone()
            .ok_or_else(|| SourceError::Parse("feed offline".to_string()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotificationBatch>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<NotificationBatch> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, batch: &NotificationBatch) -> Result<(), SourceError> {
        self.sent.lock().unwrap().push(batch.clone());
        Ok(())
    }
}
