//! Gateway events.
//!
//! Every noteworthy thing the gateway does is reported as a [`GatewayEvent`]
//! to an injected [`EventSink`]. The binaries use [`TracingSink`]; tests use
//! a recording sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sensorlink_common::SensorReading;
use tracing::{debug, error, info};

use crate::frame::XBeeAddress;
use crate::gateway::GatewayState;

/// Something the gateway did or observed.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    StateChanged {
        from: GatewayState,
        to: GatewayState,
    },
    RequestSent {
        destination: XBeeAddress,
    },
    RequestFailed {
        error: String,
    },
    FrameReceived {
        source: XBeeAddress,
        len: usize,
    },
    FrameRejected {
        source: XBeeAddress,
        len: usize,
        error: String,
    },
    ReadingPublished {
        source: XBeeAddress,
        reading: SensorReading,
        published: usize,
    },
    PublishFailed {
        topic: String,
        value: f32,
        error: String,
    },
    HandlerPanicked {
        source: XBeeAddress,
        message: String,
    },
}

/// Destination for gateway events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: GatewayEvent);
}

/// Writes events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::StateChanged { from, to } => {
                debug!(?from, ?to, "Gateway state changed");
            }
            GatewayEvent::RequestSent { destination } => {
                debug!(destination = %destination, "Sent reading request");
            }
            GatewayEvent::RequestFailed { error } => {
                error!(error = %error, "Failed to send reading request");
            }
            GatewayEvent::FrameReceived { source, len } => {
                debug!(source = %source, len, "Received frame");
            }
            GatewayEvent::FrameRejected { source, len, error } => {
                error!(source = %source, len, error = %error, "Rejected frame");
            }
            GatewayEvent::ReadingPublished {
                source,
                reading,
                published,
            } => {
                info!(
                    source = %source,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    published,
                    "Published reading"
                );
            }
            GatewayEvent::PublishFailed {
                topic,
                value,
                error,
            } => {
                error!(topic = %topic, value, error = %error, "Failed to publish value");
            }
            GatewayEvent::HandlerPanicked { source, message } => {
                error!(source = %source, message = %message, "Frame handler panicked");
            }
        }
    }
}

/// Running counters for a gateway.
#[derive(Debug, Default)]
pub struct GatewayStats {
    requests_sent: AtomicU64,
    request_failures: AtomicU64,
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
    values_published: AtomicU64,
    publish_failures: AtomicU64,
    handler_panics: AtomicU64,
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests_sent: u64,
    pub request_failures: u64,
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub values_published: u64,
    pub publish_failures: u64,
    pub handler_panics: u64,
}

impl GatewayStats {
    fn count(&self, event: &GatewayEvent) {
        let counter = match event {
            GatewayEvent::StateChanged { .. } => return,
            GatewayEvent::RequestSent { .. } => &self.requests_sent,
            GatewayEvent::RequestFailed { .. } => &self.request_failures,
            GatewayEvent::FrameReceived { .. } => &self.frames_received,
            GatewayEvent::FrameRejected { .. } => &self.frames_rejected,
            GatewayEvent::ReadingPublished { published, .. } => {
                self.values_published
                    .fetch_add(*published as u64, Ordering::Relaxed);
                return;
            }
            GatewayEvent::PublishFailed { .. } => &self.publish_failures,
            GatewayEvent::HandlerPanicked { .. } => &self.handler_panics,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            request_failures: self.request_failures.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            values_published: self.values_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
        }
    }
}

/// Counts each event, then forwards it to the sink.
#[derive(Clone)]
pub(crate) struct Reporter {
    sink: Arc<dyn EventSink>,
    stats: Arc<GatewayStats>,
}

impl Reporter {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            stats: Arc::new(GatewayStats::default()),
        }
    }

    pub(crate) fn emit(&self, event: GatewayEvent) {
        self.stats.count(&event);
        self.sink.record(event);
    }

    pub(crate) fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<GatewayEvent>>);

    impl EventSink for Recorder {
        fn record(&self, event: GatewayEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_reporter_counts_and_forwards() {
        let recorder = Arc::new(Recorder::default());
        let reporter = Reporter::new(recorder.clone());
        let node = XBeeAddress::new(0x0013_A200_4152_7421);

        reporter.emit(GatewayEvent::RequestSent {
            destination: XBeeAddress::BROADCAST,
        });
        reporter.emit(GatewayEvent::FrameReceived { source: node, len: 8 });
        reporter.emit(GatewayEvent::ReadingPublished {
            source: node,
            reading: SensorReading::new(22.5, 55.0),
            published: 2,
        });
        reporter.emit(GatewayEvent::FrameRejected {
            source: node,
            len: 3,
            error: "malformed".to_string(),
        });
        reporter.emit(GatewayEvent::StateChanged {
            from: GatewayState::Created,
            to: GatewayState::TransportOpen,
        });

        let stats = reporter.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.values_published, 2);
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.publish_failures, 0);
        assert_eq!(recorder.0.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let node = XBeeAddress::new(1);
        let sink = TracingSink;
        sink.record(GatewayEvent::RequestFailed {
            error: "busy".to_string(),
        });
        sink.record(GatewayEvent::PublishFailed {
            topic: "xbee/data/temperature".to_string(),
            value: 1.0,
            error: "down".to_string(),
        });
        sink.record(GatewayEvent::HandlerPanicked {
            source: node,
            message: "boom".to_string(),
        });
    }
}
