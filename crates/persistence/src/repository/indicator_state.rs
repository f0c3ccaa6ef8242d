//! Indicator state repository, the "previous EMA" scalar per instrument

use crate::DbResult;
use sqlx::SqlitePool;

pub struct IndicatorStateRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> IndicatorStateRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Stored previous EMA, `None` when the instrument was never analyzed
    pub async fn previous_ema(&self, instrument: &str) -> DbResult<Option<f64>> {
        let row: Option<(f64,)> =
            sqlx::query_as("SELECT previous_ema FROM indicator_state WHERE instrument = ?")
                .bind(instrument)
                .fetch_optional(self.pool)
                .await?;

        Ok(row.map(|(v,)| v))
    }

    /// Overwrite the previous EMA (upsert by instrument)
    pub async fn set_previous_ema(&self, instrument: &str, value: f64) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO indicator_state (instrument, previous_ema, updated_at)
               VALUES (?1, ?2, strftime('%s', 'now'))
               ON CONFLICT(instrument) DO UPDATE SET
                 previous_ema = excluded.previous_ema,
                 updated_at = strftime('%s', 'now')
            "#,
        )
        .bind(instrument)
        .bind(value)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
