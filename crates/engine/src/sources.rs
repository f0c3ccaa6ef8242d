//! External collaborator seams: price source, rumor feed, notifier

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::types::{Instrument, Mention, PriceQuote, ReportRecord};

/// Mined mentions grouped per candidate, in first-seen order
pub type MinedMentions = Vec<(Instrument, Vec<Mention>)>;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest price of `instrument`. Transient failures are not retried.
    async fn fetch(&self, instrument: &Instrument) -> Result<PriceQuote, SourceError>;
}

#[async_trait]
pub trait RumorFeed: Send + Sync {
    async fn mine(&self) -> Result<MinedMentions, SourceError>;
}

/// One day's batch of reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationBatch {
    pub date: NaiveDate,
    pub subject: String,
    pub body: String,
    pub records: Vec<ReportRecord>,
}

/// Best-effort delivery; callers log failures and move on
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, batch: &NotificationBatch) -> Result<(), SourceError>;
}

/// Writes the batch to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, batch: &NotificationBatch) -> Result<(), SourceError> {
        info!(
            date = %batch.date,
            reports = batch.records.len(),
            subject = %batch.subject,
            "{}",
            batch.body
        );
        Ok(())
    }
}

/// POSTs the batch as JSON to a webhook URL
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, batch: &NotificationBatch) -> Result<(), SourceError> {
        debug!(url = %self.url, date = %batch.date, "Posting report batch");

        let response = self.client.post(&self.url).json(batch).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                service: "webhook",
                status,
                body,
            });
        }
        Ok(())
    }
}
