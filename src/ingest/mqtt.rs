use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Packet, QoS, SubscribeReasonCode,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::services::ReadingStore;
use crate::ingest::message_handler::process_message;

/// Pause after a transport error once a session has existed. The next poll
/// makes rumqttc reconnect.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Broker connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Broker refused connection: rc={0:?}")]
    Refused(ConnectReturnCode),
    #[error("Failed to subscribe: {0}")]
    Subscribe(#[from] ClientError),
}

pub fn mqtt_options(config: &AppConfig) -> MqttOptions {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(config.mqtt_keep_alive());
    options.set_clean_session(true);
    options
}

/// Client side of one broker session: owns the subscription and hands every
/// publish on the topic to the message handler, one at a time.
pub struct MqttSession {
    client: AsyncClient,
    topic: String,
    store: Arc<dyn ReadingStore>,
    connected_once: bool,
    messages_stored: u64,
    messages_rejected: u64,
}

impl MqttSession {
    pub fn new(config: &AppConfig, store: Arc<dyn ReadingStore>) -> (Self, EventLoop) {
        let (client, eventloop) =
            AsyncClient::new(mqtt_options(config), config.mqtt_channel_capacity);
        let session = Self {
            client,
            topic: config.mqtt_topic.clone(),
            store,
            connected_once: false,
            messages_stored: 0,
            messages_rejected: 0,
        };
        (session, eventloop)
    }

    pub fn connected_once(&self) -> bool {
        self.connected_once
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.messages_stored, self.messages_rejected)
    }

    pub async fn handle_event(&mut self, event: Event) -> Result<(), MqttError> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    error!(rc = ?ack.code, "mqtt: connection failed");
                    if !self.connected_once {
                        return Err(MqttError::Refused(ack.code));
                    }
                    return Ok(());
                }
                info!(session_present = ack.session_present, "mqtt: connected");
                self.connected_once = true;
                // Re-issued on every CONNACK since a clean session drops subscriptions.
                self.client.try_subscribe(self.topic.clone(), QoS::AtMostOnce)?;
                info!(topic = %self.topic, "mqtt: subscribing");
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    warn!(topic = %self.topic, "mqtt: broker rejected subscription");
                } else {
                    info!(topic = %self.topic, "mqtt: subscribed");
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                if process_message(self.store.as_ref(), &publish.topic, &publish.payload).await {
                    self.messages_stored += 1;
                } else {
                    self.messages_rejected += 1;
                }
            }
            other => debug!(event = ?other, "mqtt: event"),
        }
        Ok(())
    }

    /// Transport errors are fatal until the first successful CONNACK, then
    /// only logged.
    pub fn handle_connection_error(&self, err: ConnectionError) -> Result<(), MqttError> {
        if let ConnectionError::ConnectionRefused(code) = &err {
            error!(rc = ?code, "mqtt: connection failed");
            if !self.connected_once {
                return Err(MqttError::Refused(*code));
            }
        }
        if !self.connected_once {
            error!(error = %err, "mqtt: connection failed");
            return Err(MqttError::Connection(err));
        }
        warn!(error = %err, "mqtt: connection lost, polling again");
        Ok(())
    }

    async fn disconnect(&self, eventloop: &mut EventLoop) {
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "mqtt: failed to queue disconnect");
            return;
        }
        // Drive the event loop just long enough to flush the DISCONNECT.
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(1), flush).await.is_err() {
            warn!("mqtt: timed out sending disconnect");
        }
    }
}

/// Runs the ingester until `shutdown` resolves or the first connection fails.
pub async fn run_ingester(
    config: &AppConfig,
    store: Arc<dyn ReadingStore>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), MqttError> {
    let (mut session, mut eventloop) = MqttSession::new(config, store);
    info!(host = %config.mqtt_host, port = config.mqtt_port, client_id = %config.mqtt_client_id, "mqtt: connecting...");

    tokio::pin!(shutdown);
    loop {
        let polled = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, leaving receive loop.");
                break;
            }
            polled = eventloop.poll() => polled,
        };

        match polled {
            Ok(event) => session.handle_event(event).await?,
            Err(e) => {
                session.handle_connection_error(e)?;
                tokio::time::sleep(POLL_ERROR_PAUSE).await;
            }
        }
    }

    session.disconnect(&mut eventloop).await;
    let (stored, rejected) = session.counts();
    info!(stored, rejected, "Ingester stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::reading_service::memory::MemoryReadingStore;
    use rumqttc::{ConnAck, Publish};

    fn test_config() -> AppConfig {
        AppConfig {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "arm/edx/lab4".to_string(),
            mqtt_client_id: "edx-mqtt".to_string(),
            mqtt_keep_alive_secs: 60,
            mqtt_channel_capacity: 10,
            database_url: None,
            database_name: "cloud-3".to_string(),
            db_max_connections: 1,
            http_addr: "127.0.0.1:5000".parse().unwrap(),
            log_dir: "logs".to_string(),
            viewer_utc_timestamps: true,
        }
    }

    fn publish(payload: &str) -> Event {
        Event::Incoming(Packet::Publish(Publish::new(
            "arm/edx/lab4",
            QoS::AtMostOnce,
            payload.as_bytes().to_vec(),
        )))
    }

    #[test]
    fn test_options_follow_config() {
        let options = mqtt_options(&test_config());
        assert_eq!(options.client_id(), "edx-mqtt");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_connack_marks_session_connected() {
        let store = Arc::new(MemoryReadingStore::new());
        let (mut session, _eventloop) = MqttSession::new(&test_config(), store);
        assert!(!session.connected_once());

        session
            .handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::Success,
                false,
            ))))
            .await
            .unwrap();
        assert!(session.connected_once());
    }

    #[tokio::test]
    async fn test_refused_connack_is_fatal() {
        let store = Arc::new(MemoryReadingStore::new());
        let (mut session, _eventloop) = MqttSession::new(&test_config(), store);

        let result = session
            .handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::NotAuthorized,
                false,
            ))))
            .await;
        assert!(matches!(result, Err(MqttError::Refused(ConnectReturnCode::NotAuthorized))));
    }

    #[tokio::test]
    async fn test_refused_connack_after_session_is_not_fatal() {
        let store = Arc::new(MemoryReadingStore::new());
        let (mut session, _eventloop) = MqttSession::new(&test_config(), store);

        session
            .handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::Success,
                false,
            ))))
            .await
            .unwrap();
        let result = session
            .handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::ServiceUnavailable,
                false,
            ))))
            .await;
        assert!(result.is_ok());
        assert!(session.connected_once());

        assert!(
            session
                .handle_connection_error(ConnectionError::ConnectionRefused(
                    ConnectReturnCode::ServiceUnavailable
                ))
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_transport_error_fatal_only_before_first_connack() {
        let store = Arc::new(MemoryReadingStore::new());
        let (mut session, _eventloop) = MqttSession::new(&test_config(), store);

        let io = || std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(session.handle_connection_error(ConnectionError::Io(io())).is_err());

        session
            .handle_event(Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::Success,
                false,
            ))))
            .await
            .unwrap();
        assert!(session.handle_connection_error(ConnectionError::Io(io())).is_ok());
    }

    #[tokio::test]
    async fn test_publishes_are_stored_in_arrival_order() {
        let store = Arc::new(MemoryReadingStore::new());
        let (mut session, _eventloop) = MqttSession::new(&test_config(), store.clone());

        for payload in [
            r#"{"temperature": 20, "humidity": 40, "pressure": 1000}"#,
            "not valid json",
            r#"{"temperature": 21, "humidity": 41}"#,
            r#"{"temperature": 22, "humidity": 42, "pressure": 1002}"#,
        ] {
            session.handle_event(publish(payload)).await.unwrap();
        }

        assert_eq!(session.counts(), (2, 2));
        let temps: Vec<f64> = store.rows().iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![20.0, 22.0]);
    }
}
