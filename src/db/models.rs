use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One persisted sensor observation.
/// Corresponds to a row of the `data` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

/// A validated reading waiting to be inserted. `timestamp` is `None` when the
/// message did not carry one; the store then assigns the insertion time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub timestamp: Option<DateTime<Utc>>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}
