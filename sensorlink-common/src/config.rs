use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reading::{Measurement, measurement_topic};

/// Which message bus the publisher talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// MQTT broker (default).
    #[default]
    Mqtt,
    /// Zenoh router, reached in client mode.
    Zenoh,
}

impl BusBackend {
    /// Return the string name for this backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            BusBackend::Mqtt => "mqtt",
            BusBackend::Zenoh => "zenoh",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            BusBackend::Mqtt => 1883,
            BusBackend::Zenoh => 7447,
        }
    }
}

/// Delivery guarantee requested from the bus for each publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    /// Fire and forget (default).
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Four-way handshake delivery.
    ExactlyOnce,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Encoding of the value published on each measurement topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Decimal text, e.g. `25.0` (default).
    #[default]
    Text,
    /// JSON object with value, timestamp and source address.
    Json,
}

/// Message bus connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus implementation to use.
    #[serde(default)]
    pub backend: BusBackend,

    /// Broker (or Zenoh router) host name or IP address.
    pub host: String,

    /// Broker port (1-65535). Defaults to 1883 for MQTT, 7447 for Zenoh.
    #[serde(default)]
    pub port: Option<u16>,

    /// Prefix for measurement topics, e.g. "xbee/data".
    pub topic_prefix: String,

    /// Delivery guarantee (MQTT only).
    #[serde(default)]
    pub qos: Qos,

    /// Payload encoding for published values.
    #[serde(default)]
    pub payload_format: PayloadFormat,

    /// MQTT client identifier.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// MQTT keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// How long `connect` waits for the broker before giving up.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Optional MQTT user name.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional MQTT password.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_client_id() -> String {
    "sensorlink-xbee".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl BusConfig {
    /// Create a validated bus configuration with default tuning.
    pub fn new(
        backend: BusBackend,
        host: impl Into<String>,
        port: u16,
        topic_prefix: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            backend,
            host: host.into(),
            port: Some(port),
            topic_prefix: topic_prefix.into(),
            qos: Qos::default(),
            payload_format: PayloadFormat::default(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            username: None,
            password: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Effective broker port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.backend.default_port())
    }

    /// Validate the bus settings.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("Bus host cannot be empty".to_string()));
        }

        if self.port == Some(0) {
            return Err(Error::Config("Bus port must be 1-65535".to_string()));
        }

        if self.topic_prefix.is_empty() {
            return Err(Error::Config("Topic prefix cannot be empty".to_string()));
        }

        if self.topic_prefix.contains(['#', '+', '*']) {
            return Err(Error::Topic(format!(
                "'{}' contains wildcard characters",
                self.topic_prefix
            )));
        }

        if self.backend == BusBackend::Zenoh {
            for measurement in [Measurement::Temperature, Measurement::Humidity] {
                let topic = measurement_topic(&self.topic_prefix, measurement);
                zenoh::key_expr::KeyExpr::try_from(topic.as_str()).map_err(|e| {
                    Error::Topic(format!("'{}' is not a valid key expression: {}", topic, e))
                })?;
            }
        }

        if self.keep_alive_secs == 0 && self.backend == BusBackend::Mqtt {
            return Err(Error::Config(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "username and password must be set together".to_string(),
            ));
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Common logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_config_defaults() {
        let json5 = r#"
        {
            host: "localhost",
            topic_prefix: "xbee/data",
        }
        "#;

        let config: BusConfig = json5::from_str(json5).unwrap();

        assert_eq!(config.backend, BusBackend::Mqtt);
        assert_eq!(config.port(), 1883);
        assert_eq!(config.qos, Qos::AtMostOnce);
        assert_eq!(config.payload_format, PayloadFormat::Text);
        assert_eq!(config.client_id, "sensorlink-xbee");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_zenoh_backend() {
        let json5 = r#"
        {
            backend: "zenoh",
            host: "10.0.0.2",
            topic_prefix: "greenhouse/node1",
            payload_format: "json",
        }
        "#;

        let config: BusConfig = json5::from_str(json5).unwrap();

        assert_eq!(config.backend, BusBackend::Zenoh);
        assert_eq!(config.port(), 7447);
        assert_eq!(config.payload_format, PayloadFormat::Json);
    }

    #[test]
    fn test_parse_qos() {
        let json5 = r#"{ host: "h", topic_prefix: "p", qos: "at_least_once" }"#;
        let config: BusConfig = json5::from_str(json5).unwrap();
        assert_eq!(config.qos, Qos::AtLeastOnce);
        assert_eq!(rumqttc::QoS::from(config.qos), rumqttc::QoS::AtLeastOnce);
    }

    #[test]
    fn test_bus_config_new_validates() {
        assert!(BusConfig::new(BusBackend::Mqtt, "localhost", 1883, "xbee/data").is_ok());
        assert!(BusConfig::new(BusBackend::Mqtt, "localhost", 0, "xbee/data").is_err());
        assert!(BusConfig::new(BusBackend::Mqtt, "localhost", 1883, "").is_err());
        assert!(BusConfig::new(BusBackend::Mqtt, "", 1883, "xbee").is_err());
        assert!(matches!(
            BusConfig::new(BusBackend::Mqtt, "localhost", 1883, "xbee/#"),
            Err(Error::Topic(_))
        ));
    }

    #[test]
    fn test_zenoh_prefix_must_form_key_expressions() {
        for prefix in ["/xbee", "a//b", "xbee/$*"] {
            assert!(
                matches!(
                    BusConfig::new(BusBackend::Zenoh, "localhost", 7447, prefix),
                    Err(Error::Topic(_))
                ),
                "prefix {prefix}"
            );
        }

        assert!(BusConfig::new(BusBackend::Zenoh, "localhost", 7447, "xbee/data/").is_ok());
        assert!(BusConfig::new(BusBackend::Mqtt, "localhost", 1883, "/xbee").is_ok());
    }

    #[test]
    fn test_credentials_must_be_paired() {
        let json5 = r#"{ host: "h", topic_prefix: "p", username: "gw" }"#;
        let config: BusConfig = json5::from_str(json5).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_logging_config() {
        let config: LoggingConfig = json5::from_str("{}").unwrap();

        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_json_logging_format() {
        let json5 = r#"
        {
            level: "debug",
            format: "json",
        }
        "#;

        let config: LoggingConfig = json5::from_str(json5).unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }
}
