//! Configuration for the XBee bridge.

use crate::frame::{MAX_TRANSMIT_DATA, XBeeAddress};
use sensorlink_common::{BusConfig, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XBeeBridgeConfig {
    /// Serial radio settings
    pub xbee: XBeeConfig,

    /// Message bus settings
    pub bus: BusConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial radio and polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XBeeConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3")
    pub serial_port: String,

    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Node to address requests to; broadcast when absent
    #[serde(default)]
    pub target_address: Option<XBeeAddress>,

    /// Seconds between reading requests (default: 10)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// ASCII command that asks the node for a reading
    #[serde(default = "default_request_command")]
    pub request_command: String,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_poll_interval() -> u64 {
    10
}

fn default_request_command() -> String {
    "GET_TEMP".to_string()
}

impl XBeeConfig {
    /// Create a validated serial radio configuration with default polling.
    ///
    /// `target_address` must be a 64-bit hex address when given.
    pub fn new(
        serial_port: impl Into<String>,
        baud_rate: u32,
        target_address: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let target_address = target_address
            .map(|addr| {
                addr.parse::<XBeeAddress>()
                    .map_err(|e| ConfigError::Validation(e.to_string()))
            })
            .transpose()?;

        let config = Self {
            serial_port: serial_port.into(),
            baud_rate,
            target_address,
            poll_interval_secs: default_poll_interval(),
            request_command: default_request_command(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Interval between reading requests.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Address the request command is sent to.
    pub fn destination(&self) -> XBeeAddress {
        self.target_address.unwrap_or(XBeeAddress::BROADCAST)
    }

    /// Validate the radio settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial_port.trim().is_empty() {
            return Err(ConfigError::Validation(
                "serial_port cannot be empty".to_string(),
            ));
        }

        if self.baud_rate == 0 {
            return Err(ConfigError::Validation(
                "baud_rate must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.request_command.is_empty() || !self.request_command.is_ascii() {
            return Err(ConfigError::Validation(format!(
                "request_command '{}' must be non-empty ASCII",
                self.request_command
            )));
        }

        if self.request_command.len() > MAX_TRANSMIT_DATA {
            return Err(ConfigError::Validation(format!(
                "request_command is {} bytes, at most {} fit in one frame",
                self.request_command.len(),
                MAX_TRANSMIT_DATA
            )));
        }

        Ok(())
    }
}

impl XBeeBridgeConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: XBeeBridgeConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.xbee.validate()?;
        self.bus
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_common::{BusBackend, LogFormat, Qos};

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{
            xbee: { serial_port: "/dev/ttyS0" },
            bus: { host: "localhost", topic_prefix: "xbee/data" }
        }"#;

        let config: XBeeBridgeConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.xbee.baud_rate, 9600);
        assert_eq!(config.xbee.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.xbee.request_command, "GET_TEMP");
        assert_eq!(config.xbee.target_address, None);
        assert_eq!(config.xbee.destination(), XBeeAddress::BROADCAST);
        assert_eq!(config.bus.backend, BusBackend::Mqtt);
        assert_eq!(config.bus.port(), 1883);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            xbee: {
                serial_port: "/dev/ttyUSB0",
                baud_rate: 115200,
                target_address: "00:13:A2:00:41:52:74:21",
                poll_interval_secs: 30,
                request_command: "GET_DATA",
            },
            bus: {
                backend: "mqtt",
                host: "broker.local",
                port: 8883,
                topic_prefix: "greenhouse/node1",
                qos: "at_least_once",
                username: "gw",
                password: "secret",
            },
            logging: { level: "debug", format: "json" },
        }"#;

        let config: XBeeBridgeConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.xbee.destination(),
            XBeeAddress::new(0x0013_A200_4152_7421)
        );
        assert_eq!(config.xbee.poll_interval_secs, 30);
        assert_eq!(config.bus.port(), 8883);
        assert_eq!(config.bus.qos, Qos::AtLeastOnce);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_target_address_fails_parse() {
        let json = r#"{
            xbee: { serial_port: "/dev/ttyS0", target_address: "xyz" },
            bus: { host: "localhost", topic_prefix: "xbee/data" }
        }"#;

        assert!(json5::from_str::<XBeeBridgeConfig>(json).is_err());
    }

    #[test]
    fn test_xbee_config_new() {
        let config = XBeeConfig::new("/dev/ttyS0", 9600, None).unwrap();
        assert_eq!(config.destination(), XBeeAddress::BROADCAST);

        let config = XBeeConfig::new("/dev/ttyS0", 9600, Some("0013A20041527421")).unwrap();
        assert_eq!(config.destination().to_string(), "0013A20041527421");

        assert!(XBeeConfig::new("/dev/ttyS0", 9600, Some("nope")).is_err());
        assert!(XBeeConfig::new("/dev/ttyS0", 0, None).is_err());
        assert!(XBeeConfig::new("", 9600, None).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bus() {
        let json = r#"{
            xbee: { serial_port: "/dev/ttyS0" },
            bus: { host: "localhost", port: 0, topic_prefix: "xbee/data" }
        }"#;

        let config: XBeeBridgeConfig = json5::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_zero_interval() {
        let json = r#"{
            xbee: { serial_port: "/dev/ttyS0", poll_interval_secs: 0 },
            bus: { host: "localhost", topic_prefix: "xbee/data" }
        }"#;

        let config: XBeeBridgeConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_request_command_length() {
        let mut config = XBeeConfig::new("/dev/ttyS0", 9600, None).unwrap();

        config.request_command = "A".repeat(MAX_TRANSMIT_DATA);
        config.validate().unwrap();

        config.request_command = "A".repeat(MAX_TRANSMIT_DATA + 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));

        config.request_command = "A".repeat(70_000);
        assert!(config.validate().is_err());

        config.request_command = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config: XBeeBridgeConfig = json5::from_str(include_str!("../xbee.json5")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.xbee.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.bus.topic_prefix, "xbee/data");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            XBeeBridgeConfig::load_from_file("/nonexistent/xbee.json5"),
            Err(ConfigError::Io(_))
        ));
    }
}
