//! Append-only price history repository, observations per instrument

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A single persisted price observation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricePointRecord {
    pub id: Option<i64>,
    pub instrument: String,
    pub value: f64,
    /// Unix milliseconds
    pub observed_at: i64,
}

/// Repository for the price history
pub struct PriceRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PriceRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an observation. History is never updated in place.
    pub async fn append(&self, instrument: &str, value: f64, observed_at: i64) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO price_points (instrument, value, observed_at) VALUES (?1, ?2, ?3)",
        )
        .bind(instrument)
        .bind(value)
        .bind(observed_at)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The `limit` most recent observations, oldest first
    pub async fn recent(&self, instrument: &str, limit: usize) -> DbResult<Vec<PricePointRecord>> {
        let limit = i64::try_from(limit)
            .map_err(|_| DbError::Query(format!("history limit {limit} out of range")))?;

        let mut records = sqlx::query_as::<_, PricePointRecord>(
            r#"SELECT id, instrument, value, observed_at FROM price_points
               WHERE instrument = ?1
               ORDER BY observed_at DESC, id DESC
               LIMIT ?2"#,
        )
        .bind(instrument)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        records.reverse();
        Ok(records)
    }
}
