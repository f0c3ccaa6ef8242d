//! History store seam and its SQLite implementation

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use persistence::repository::{
    IndicatorStateRepository, PriceRepository, ReportRepository, ReportRow,
};
use persistence::SqlitePool;

use crate::error::SourceError;
use crate::types::{Instrument, PricePoint, ReportRecord, Sentiment};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Minimal query contract the scheduler needs from persistence.
///
/// History is append-only. The previous-EMA scalar is the one mutable value and
/// must only be written through [`crate::guard::HistoryGuard`].
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, point: &PricePoint) -> Result<(), SourceError>;

    /// The `limit` most recent points, most recent last
    async fn read_recent(
        &self,
        instrument: &Instrument,
        limit: usize,
    ) -> Result<Vec<PricePoint>, SourceError>;

    async fn previous_ema(&self, instrument: &Instrument) -> Result<Option<f64>, SourceError>;

    async fn set_previous_ema(&self, instrument: &Instrument, value: f64)
        -> Result<(), SourceError>;

    async fn save_report(&self, record: &ReportRecord) -> Result<(), SourceError>;

    async fn reports_on(&self, date: NaiveDate) -> Result<Vec<ReportRecord>, SourceError>;

    /// Remember that the batch for `date` went out
    async fn mark_batch_sent(&self, date: NaiveDate, records: usize) -> Result<(), SourceError>;

    /// Most recent day whose batch went out, survives restarts
    async fn last_batch_date(&self) -> Result<Option<NaiveDate>, SourceError>;
}

/// [`HistoryStore`] backed by the `persistence` crate
#[derive(Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, point: &PricePoint) -> Result<(), SourceError> {
        PriceRepository::new(&self.pool)
            .append(
                point.instrument.as_str(),
                point.value,
                point.observed_at.timestamp_millis(),
            )
            .await?;
        Ok(())
    }

    async fn read_recent(
        &self,
        instrument: &Instrument,
        limit: usize,
    ) -> Result<Vec<PricePoint>, SourceError> {
        let records = PriceRepository::new(&self.pool)
            .recent(instrument.as_str(), limit)
            .await?;

        records
            .into_iter()
            .map(|r| {
                let observed_at = DateTime::<Utc>::from_timestamp_millis(r.observed_at)
                    .ok_or_else(|| {
                        SourceError::Parse(format!("bad timestamp {} in history", r.observed_at))
                    })?;
                Ok(PricePoint {
                    instrument: Instrument::new(r.instrument),
                    value: r.value,
                    observed_at,
                })
            })
            .collect()
    }

    async fn previous_ema(&self, instrument: &Instrument) -> Result<Option<f64>, SourceError> {
        Ok(IndicatorStateRepository::new(&self.pool)
            .previous_ema(instrument.as_str())
            .await?)
    }

    async fn set_previous_ema(
        &self,
        instrument: &Instrument,
        value: f64,
    ) -> Result<(), SourceError> {
        IndicatorStateRepository::new(&self.pool)
            .set_previous_ema(instrument.as_str(), value)
            .await?;
        Ok(())
    }

    async fn save_report(&self, record: &ReportRecord) -> Result<(), SourceError> {
        ReportRepository::new(&self.pool)
            .save(&record_to_row(record))
            .await?;
        Ok(())
    }

    async fn reports_on(&self, date: NaiveDate) -> Result<Vec<ReportRecord>, SourceError> {
        let rows = ReportRepository::new(&self.pool)
            .by_date(&date.format(DATE_FORMAT).to_string())
            .await?;
        rows.into_iter().map(row_to_record).collect()
    }

    async fn mark_batch_sent(&self, date: NaiveDate, records: usize) -> Result<(), SourceError> {
        let records = i64::try_from(records)
            .map_err(|_| SourceError::Parse(format!("batch size {records} out of range")))?;
        ReportRepository::new(&self.pool)
            .mark_batch_sent(&date.format(DATE_FORMAT).to_string(), records)
            .await?;
        Ok(())
    }

    async fn last_batch_date(&self) -> Result<Option<NaiveDate>, SourceError> {
        ReportRepository::new(&self.pool)
            .last_batch_date()
            .await?
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                    .map_err(|e| SourceError::Parse(format!("batch date {raw}: {e}")))
            })
            .transpose()
    }
}

fn record_to_row(record: &ReportRecord) -> ReportRow {
    ReportRow {
        instrument: record.instrument.to_string(),
        report_date: record.date.format(DATE_FORMAT).to_string(),
        open: record.open,
        high: record.high,
        low: record.low,
        moving_average: record.moving_average,
        relative_strength_index: record.relative_strength_index,
        sentiment: record.sentiment.as_str().to_string(),
        bottoms: i64::from(record.bottoms),
        tops: i64::from(record.tops),
        initial_hour_movement: record.initial_hour_movement,
        power_hour_movement: record.power_hour_movement,
    }
}

fn row_to_record(row: ReportRow) -> Result<ReportRecord, SourceError> {
    let date = NaiveDate::parse_from_str(&row.report_date, DATE_FORMAT)
        .map_err(|e| SourceError::Parse(format!("report date {}: {e}", row.report_date)))?;
    let sentiment = match row.sentiment.as_str() {
        "overbought" => Sentiment::Overbought,
        "oversold" => Sentiment::Oversold,
        "neutral" => Sentiment::Neutral,
        other => return Err(SourceError::Parse(format!("unknown sentiment {other}"))),
    };
    let count = |v: i64| {
        u32::try_from(v).map_err(|_| SourceError::Parse(format!("negative count {v} in report")))
    };

    Ok(ReportRecord {
        instrument: Instrument::new(row.instrument),
        date,
        open: row.open,
        high: row.high,
        low: row.low,
        moving_average: row.moving_average,
        relative_strength_index: row.relative_strength_index,
        sentiment,
        bottoms: count(row.bottoms)?,
        tops: count(row.tops)?,
        initial_hour_movement: row.initial_hour_movement,
        power_hour_movement: row.power_hour_movement,
    })
}
