use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::StoreError;
use crate::db::models::NewReading;
use crate::db::services::ReadingStore;

pub const TEMPERATURE_KEY: &str = "temperature";
pub const HUMIDITY_KEY: &str = "humidity";
pub const PRESSURE_KEY: &str = "pressure";
pub const TIMESTAMP_KEY: &str = "timestamp";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Payload is not a JSON object: {0}")]
    Decode(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl IngestError {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "decode",
            IngestError::MissingField(_) => "missing_field",
            IngestError::InvalidValue { .. } => "invalid_value",
            IngestError::Storage(_) => "storage",
        }
    }
}

/// Decodes a broker payload into a reading. Only presence of the three
/// measurement keys is required; extra keys are ignored.
pub fn parse_payload(payload: &[u8]) -> Result<NewReading, IngestError> {
    let text = std::str::from_utf8(payload).map_err(|e| IngestError::Decode(e.to_string()))?;
    let value: Value = serde_json::from_str(text).map_err(|e| IngestError::Decode(e.to_string()))?;
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(IngestError::Decode(format!(
                "expected an object, found {}",
                json_type_name(&other)
            )));
        }
    };

    for key in [TEMPERATURE_KEY, HUMIDITY_KEY, PRESSURE_KEY] {
        if !object.contains_key(key) {
            return Err(IngestError::MissingField(key));
        }
    }

    Ok(NewReading {
        timestamp: timestamp_field(&object)?,
        temperature: numeric_field(&object, TEMPERATURE_KEY)?,
        humidity: numeric_field(&object, HUMIDITY_KEY)?,
        pressure: numeric_field(&object, PRESSURE_KEY)?,
    })
}

fn numeric_field(object: &Map<String, Value>, field: &'static str) -> Result<f64, IngestError> {
    let parsed = match object.get(field) {
        Some(Value::Number(n)) => n.as_f64(),
        // Numeric text is accepted the way a numeric column would coerce it.
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(other) => {
            return Err(IngestError::InvalidValue {
                field,
                reason: format!("expected a number, found {}", json_type_name(other)),
            });
        }
        None => return Err(IngestError::MissingField(field)),
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(IngestError::InvalidValue {
            field,
            reason: "not a finite number".to_string(),
        }),
    }
}

fn timestamp_field(object: &Map<String, Value>) -> Result<Option<DateTime<Utc>>, IngestError> {
    match object.get(TIMESTAMP_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| IngestError::InvalidValue {
                field: TIMESTAMP_KEY,
                reason: e.to_string(),
            }),
        Some(other) => Err(IngestError::InvalidValue {
            field: TIMESTAMP_KEY,
            reason: format!("expected an RFC 3339 string, found {}", json_type_name(other)),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decodes, validates and stores one message.
pub async fn handle_message(
    store: &dyn ReadingStore,
    payload: &[u8],
) -> Result<NewReading, IngestError> {
    let reading = parse_payload(payload)?;
    info!(
        temperature = reading.temperature,
        humidity = reading.humidity,
        pressure = reading.pressure,
        "received sensor data"
    );
    store.insert_reading(&reading).await?;
    Ok(reading)
}

/// Handles one message and logs the outcome. Never fails: a bad message or a
/// storage error only drops that message.
pub async fn process_message(store: &dyn ReadingStore, topic: &str, payload: &[u8]) -> bool {
    match handle_message(store, payload).await {
        Ok(_) => true,
        Err(e @ IngestError::Storage(_)) => {
            error!(topic = %topic, kind = e.kind(), error = %e, "invalid data received");
            false
        }
        Err(e) => {
            warn!(topic = %topic, kind = e.kind(), error = %e, "invalid data received");
            false
        }
    }
}
