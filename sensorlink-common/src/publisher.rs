//! Message bus publishing.
//!
//! [`BusPublisher`] is the seam between a bridge and its message bus. The
//! MQTT and Zenoh implementations live in [`crate::mqtt`] and
//! [`crate::session`]; [`ReadingPublisher`] layers the measurement topic
//! scheme on top of any of them.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BusBackend, BusConfig, PayloadFormat};
use crate::mqtt::MqttPublisher;
use crate::reading::{Measurement, SensorReading, measurement_topic, render_value};
use crate::session::ZenohPublisher;

/// Errors reported by a bus publisher.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not be reached or rejected the session.
    #[error("Bus unavailable at {endpoint}: {message}")]
    Unavailable { endpoint: String, message: String },

    /// A single publish failed.
    #[error("Failed to publish to {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Publish attempted without a session.
    #[error("Not connected to the bus")]
    NotConnected,
}

impl BusError {
    /// Create a publish error.
    pub fn publish(topic: impl Into<String>, message: impl ToString) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.to_string(),
        }
    }
}

/// A connection to a publish/subscribe bus.
///
/// Implementations must tolerate `publish` being called from several tasks at
/// once. `disconnect` is always safe to call, including before `connect` or
/// twice in a row.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Establish the session. Fails with [`BusError::Unavailable`].
    async fn connect(&self) -> Result<(), BusError>;

    /// Tear the session down. A no-op when not connected.
    async fn disconnect(&self) -> Result<(), BusError>;

    /// Best-effort publish of one payload; broker acknowledgment is not awaited.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Whether a session is currently held.
    fn is_connected(&self) -> bool;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Create the publisher selected by `config.backend`. Does not connect.
pub fn build_publisher(config: &BusConfig) -> Arc<dyn BusPublisher> {
    match config.backend {
        BusBackend::Mqtt => Arc::new(MqttPublisher::new(config.clone())),
        BusBackend::Zenoh => Arc::new(ZenohPublisher::new(config.clone())),
    }
}

/// Result of publishing one measurement of a reading.
#[derive(Debug)]
pub struct PublishOutcome {
    pub measurement: Measurement,
    pub topic: String,
    pub value: f32,
    pub result: Result<(), BusError>,
}

/// Publishes readings as one topic per measurement.
///
/// Each measurement is a separate publish, so a subscriber may see a
/// temperature update without the matching humidity update when one of the
/// two calls fails.
#[derive(Clone)]
pub struct ReadingPublisher {
    bus: Arc<dyn BusPublisher>,
    topic_prefix: String,
    format: PayloadFormat,
}

impl ReadingPublisher {
    /// Create a new reading publisher.
    pub fn new(
        bus: Arc<dyn BusPublisher>,
        topic_prefix: impl Into<String>,
        format: PayloadFormat,
    ) -> Self {
        Self {
            bus,
            topic_prefix: topic_prefix.into(),
            format,
        }
    }

    /// Get the topic prefix.
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    /// Get the underlying bus.
    pub fn bus(&self) -> &Arc<dyn BusPublisher> {
        &self.bus
    }

    /// Topic for one measurement.
    pub fn topic(&self, measurement: Measurement) -> String {
        measurement_topic(&self.topic_prefix, measurement)
    }

    /// Publish temperature then humidity. Never fails as a whole; each
    /// measurement's outcome is returned in publish order.
    pub async fn publish_reading(
        &self,
        reading: &SensorReading,
        source: &str,
    ) -> Vec<PublishOutcome> {
        let mut outcomes = Vec::with_capacity(2);

        for (measurement, value) in reading.measurements() {
            let topic = self.topic(measurement);
            let result = match render_value(self.format, value, source) {
                Ok(payload) => self.bus.publish(&topic, payload).await,
                Err(e) => Err(BusError::publish(topic.as_str(), e)),
            };

            outcomes.push(PublishOutcome {
                measurement,
                topic,
                value,
                result,
            });
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeBus {
        connected: AtomicBool,
        fail_topic: Option<String>,
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl BusPublisher for FakeBus {
        async fn connect(&self) -> Result<(), BusError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), BusError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
            if self.fail_topic.as_deref() == Some(topic) {
                return Err(BusError::publish(topic, "broker said no"));
            }
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn endpoint(&self) -> String {
            "fake".to_string()
        }
    }

    #[tokio::test]
    async fn test_publish_reading_order_and_payload() {
        let bus = Arc::new(FakeBus::default());
        let publisher = ReadingPublisher::new(bus.clone(), "xbee/data", PayloadFormat::Text);

        let outcomes = publisher
            .publish_reading(&SensorReading::new(22.5, 55.0), "0013A20041527421")
            .await;

        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        let sent = bus.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "xbee/data/temperature");
        assert_eq!(sent[0].1, b"22.5");
        assert_eq!(sent[1].0, "xbee/data/humidity");
        assert_eq!(sent[1].1, b"55.0");
    }

    #[tokio::test]
    async fn test_one_failed_publish_does_not_stop_the_other() {
        let bus = Arc::new(FakeBus {
            fail_topic: Some("xbee/data/temperature".to_string()),
            ..Default::default()
        });
        let publisher = ReadingPublisher::new(bus.clone(), "xbee/data", PayloadFormat::Text);

        let outcomes = publisher
            .publish_reading(&SensorReading::new(22.5, 55.0), "0013A20041527421")
            .await;

        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
        assert_eq!(outcomes[0].measurement, Measurement::Temperature);
        assert_eq!(outcomes[0].value, 22.5);
        assert_eq!(bus.sent.lock().unwrap()[0].0, "xbee/data/humidity");
    }

    #[test]
    fn test_build_publisher_selects_backend() {
        let mqtt = BusConfig::new(BusBackend::Mqtt, "localhost", 1883, "xbee").unwrap();
        let publisher = build_publisher(&mqtt);
        assert_eq!(publisher.endpoint(), "mqtt://localhost:1883");
        assert!(!publisher.is_connected());

        let zenoh = BusConfig::new(BusBackend::Zenoh, "localhost", 7447, "xbee").unwrap();
        assert_eq!(build_publisher(&zenoh).endpoint(), "tcp/localhost:7447");
    }
}
