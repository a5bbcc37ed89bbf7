//! Bridge from an XBee serial sensor node to MQTT or Zenoh.
//!
//! The gateway broadcasts a request command to the radio network every poll
//! interval. The node answers with an 8-byte reading, which is decoded and
//! republished as one message per measurement.
//!
//! # Topics
//!
//! ```text
//! <topic_prefix>/temperature
//! <topic_prefix>/humidity
//! ```

pub mod codec;
pub mod config;
pub mod events;
pub mod frame;
pub mod gateway;
pub mod transport;

pub use events::{EventSink, GatewayEvent, StatsSnapshot, TracingSink};
pub use gateway::{Gateway, GatewayError, GatewayOptions, GatewayState, ShutdownReason};
pub use transport::{ReceivedFrame, Transport, TransportError, XBeeTransport};
