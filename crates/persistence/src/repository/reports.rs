//! Reports repository: daily snapshots keyed by (instrument, date)

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A persisted daily report row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReportRow {
    pub instrument: String,
    /// `YYYY-MM-DD`
    pub report_date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub moving_average: f64,
    pub relative_strength_index: f64,
    pub sentiment: String,
    pub bottoms: i64,
    pub tops: i64,
    pub initial_hour_movement: f64,
    pub power_hour_movement: f64,
}

pub struct ReportRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReportRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh the snapshot for (instrument, date)
    pub async fn save(&self, row: &ReportRow) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO reports
                (instrument, report_date, open, high, low, moving_average,
                 relative_strength_index, sentiment, bottoms, tops,
                 initial_hour_movement, power_hour_movement)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
               ON CONFLICT(instrument, report_date) DO UPDATE SET
                 open = excluded.open,
                 high = excluded.high,
                 low = excluded.low,
                 moving_average = excluded.moving_average,
                 relative_strength_index = excluded.relative_strength_index,
                 sentiment = excluded.sentiment,
                 bottoms = excluded.bottoms,
                 tops = excluded.tops,
                 initial_hour_movement = excluded.initial_hour_movement,
                 power_hour_movement = excluded.power_hour_movement
            "#,
        )
        .bind(&row.instrument)
        .bind(&row.report_date)
        .bind(row.open)
        .bind(row.high)
        .bind(row.low)
        .bind(row.moving_average)
        .bind(row.relative_strength_index)
        .bind(&row.sentiment)
        .bind(row.bottoms)
        .bind(row.tops)
        .bind(row.initial_hour_movement)
        .bind(row.power_hour_movement)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// All snapshots for a day, ordered by instrument
    pub async fn by_date(&self, report_date: &str) -> DbResult<Vec<ReportRow>> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"SELECT instrument, report_date, open, high, low, moving_average,
                      relative_strength_index, sentiment, bottoms, tops,
                      initial_hour_movement, power_hour_movement
               FROM reports
               WHERE report_date = ?1
               ORDER BY instrument"#,
        )
        .bind(report_date)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Record that the batch for `report_date` went out. Idempotent.
    pub async fn mark_batch_sent(&self, report_date: &str, records: i64) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO report_batches (report_date, records, sent_at)
               VALUES (?1, ?2, strftime('%s', 'now'))
               ON CONFLICT(report_date) DO NOTHING"#,
        )
        .bind(report_date)
        .bind(records)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Most recent day whose batch went out
    pub async fn last_batch_date(&self) -> DbResult<Option<String>> {
        let row: (Option<String>,) = sqlx::query_as("SELECT MAX(report_date) FROM report_batches")
            .fetch_one(self.pool)
            .await?;

        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn row(instrument: &str, date: &str, rsi: f64) -> ReportRow {
        ReportRow {
            instrument: instrument.to_string(),
            report_date: date.to_string(),
            open: 5.0,
            high: 10.0,
            low: 5.0,
            moving_average: 2.0,
            relative_strength_index: rsi,
            sentiment: "neutral".to_string(),
            bottoms: 1,
            tops: 1,
            initial_hour_movement: 5.0,
            power_hour_movement: 5.0,
        }
    }

    #[tokio::test]
    async fn test_save_is_keyed_by_instrument_and_date() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());

        repo.save(&row("PLTR", "2021-01-01", 40.0)).await.unwrap();
        repo.save(&row("PLTR", "2021-01-01", 45.0)).await.unwrap();
        repo.save(&row("NIO", "2021-01-01", 50.0)).await.unwrap();
        repo.save(&row("PLTR", "2021-01-02", 60.0)).await.unwrap();

        let day = repo.by_date("2021-01-01").await.unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].instrument, "NIO");
        assert_eq!(day[1].relative_strength_index, 45.0);
    }

    #[tokio::test]
    async fn test_last_batch_date() {
        let db = Database::in_memory().await.unwrap();
        let repo = ReportRepository::new(db.pool());

        assert_eq!(repo.last_batch_date().await.unwrap(), None);

        repo.mark_batch_sent("2021-01-04", 2).await.unwrap();
        repo.mark_batch_sent("2021-01-05", 3).await.unwrap();
        repo.mark_batch_sent("2021-01-04", 9).await.unwrap();

        assert_eq!(
            repo.last_batch_date().await.unwrap().as_deref(),
            Some("2021-01-05")
        );
    }
}
