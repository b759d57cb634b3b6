use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::StoreError;
use crate::db::models::{NewReading, Reading};

/// Number of rows the viewer shows.
pub const LATEST_READINGS_LIMIT: i64 = 5;

// Casts let tables declared with `timestamp`, `real` or `numeric` columns
// decode into `Reading` as well.
const LATEST_READINGS_SQL: &str = r#"
    SELECT timestamp::timestamptz AS timestamp,
           temperature::float8 AS temperature,
           humidity::float8 AS humidity,
           pressure::float8 AS pressure
    FROM data
    ORDER BY timestamp DESC
    LIMIT $1
"#;

/// Persistence for readings. The ingester only inserts and the viewer only
/// reads; neither keeps rows beyond one call.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Inserts one row. A missing timestamp is filled in by the store.
    async fn insert_reading(&self, reading: &NewReading) -> Result<(), StoreError>;

    /// Returns at most `limit` readings, newest first.
    async fn latest_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError>;
}

pub struct PgReadingStore {
    db_pool: PgPool,
}

impl PgReadingStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert_reading(&self, reading: &NewReading) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO data (timestamp, temperature, humidity, pressure)
            VALUES (COALESCE($1, now()), $2, $3, $4)
            "#,
        )
        .bind(reading.timestamp)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.pressure)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn latest_readings(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let readings = sqlx::query_as::<_, Reading>(LATEST_READINGS_SQL)
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await?;
        Ok(readings)
    }
}
