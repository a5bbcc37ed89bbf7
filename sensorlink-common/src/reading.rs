use serde::{Deserialize, Serialize};

use crate::config::PayloadFormat;
use crate::error::Result;

/// One temperature/humidity sample reported by a remote sensor node.
///
/// Values are passed through exactly as the node sent them; NaN and
/// infinities are not filtered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Temperature as reported by the node.
    pub temperature: f32,
    /// Relative humidity as reported by the node.
    pub humidity: f32,
}

impl SensorReading {
    /// Create a new reading.
    pub fn new(temperature: f32, humidity: f32) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// The measurements of this reading, in publish order.
    pub fn measurements(&self) -> [(Measurement, f32); 2] {
        [
            (Measurement::Temperature, self.temperature),
            (Measurement::Humidity, self.humidity),
        ]
    }
}

/// A physical quantity carried by a [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    Temperature,
    Humidity,
}

impl Measurement {
    /// Topic suffix for this measurement.
    pub fn as_str(&self) -> &'static str {
        match self {
            Measurement::Temperature => "temperature",
            Measurement::Humidity => "humidity",
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the bus topic for a measurement: `<prefix>/<measurement>`.
pub fn measurement_topic(prefix: &str, measurement: Measurement) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), measurement.as_str())
}

/// JSON body used with [`PayloadFormat::Json`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementPayload {
    pub value: f32,
    /// Unix epoch milliseconds when the gateway received the reading.
    pub timestamp: i64,
    /// 64-bit address of the reporting node, as 16 hex digits.
    pub source: String,
}

/// Render a single measurement value for publishing.
pub fn render_value(format: PayloadFormat, value: f32, source: &str) -> Result<Vec<u8>> {
    match format {
        PayloadFormat::Text => Ok(format_decimal(value).into_bytes()),
        PayloadFormat::Json => {
            let payload = MeasurementPayload {
                value,
                timestamp: current_timestamp_millis(),
                source: source.to_string(),
            };
            Ok(serde_json::to_vec(&payload)?)
        }
    }
}

/// Shortest round-trip decimal text, keeping a trailing `.0` on integral values.
pub fn format_decimal(value: f32) -> String {
    format!("{:?}", value)
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
