//! SensorLink Common Library
//!
//! Shared types and utilities for SensorLink bridges:
//!
//! - [`reading`] - Sensor reading model and measurement topic scheme
//! - [`publisher`] - The [`BusPublisher`] seam and [`ReadingPublisher`]
//! - [`mqtt`] - MQTT implementation of [`BusPublisher`]
//! - [`session`] - Zenoh implementation of [`BusPublisher`]
//! - [`config`] - Bus and logging configuration (JSON5 format)
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod mqtt;
pub mod publisher;
pub mod reading;
pub mod session;

// Re-export commonly used types at the crate root
pub use config::{BusBackend, BusConfig, LogFormat, LoggingConfig, PayloadFormat, Qos};
pub use error::{Error, Result};
pub use mqtt::MqttPublisher;
pub use publisher::{
    BusError, BusPublisher, PublishOutcome, ReadingPublisher, build_publisher,
};
pub use reading::{Measurement, SensorReading, current_timestamp_millis, measurement_topic};
pub use session::ZenohPublisher;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Example
///
/// ```ignore
/// use sensorlink_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
