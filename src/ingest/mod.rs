//! Broker-side half of the system: turns topic messages into stored readings.

pub mod message_handler;
pub mod mqtt;

pub use message_handler::{IngestError, handle_message, parse_payload, process_message};
pub use mqtt::{MqttError, MqttSession, run_ingester};
