//! Gateway controller.
//!
//! Owns the transport and the bus publisher for one run:
//!
//! ```text
//! Created -> TransportOpen -> Running -> Stopping -> Closed
//! ```
//!
//! `start` opens the transport, connects the bus and spawns the receive
//! task. `run` sends the request command every poll interval until the
//! shutdown future resolves or the transport dies. `stop` releases
//! everything that was acquired and may be called from any state.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use sensorlink_common::{BusError, ReadingPublisher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::codec;
use crate::config::XBeeConfig;
use crate::events::{EventSink, GatewayEvent, Reporter, StatsSnapshot};
use crate::transport::{ReceivedFrame, Transport, TransportError};

/// How long `stop` waits for in-flight frames to finish publishing.
const RECEIVE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a [`Gateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Created,
    TransportOpen,
    Running,
    Stopping,
    Closed,
}

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: GatewayState,
    },

    #[error("fatal: {0}")]
    Fatal(String),
}

/// Why [`Gateway::run`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shutdown future resolved.
    Interrupted,
    /// The loop could not continue.
    Fatal(String),
}

impl ShutdownReason {
    /// Process exit code for this reason.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Interrupted => 0,
            ShutdownReason::Fatal(_) => 1,
        }
    }
}

/// Polling behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    pub poll_interval: Duration,
    pub request_command: Vec<u8>,
}

impl GatewayOptions {
    pub fn from_config(config: &XBeeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            request_command: config.request_command.as_bytes().to_vec(),
        }
    }
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            request_command: b"GET_TEMP".to_vec(),
        }
    }
}

/// Polls a sensor node over a [`Transport`] and republishes its readings.
pub struct Gateway<T: Transport> {
    transport: T,
    publisher: ReadingPublisher,
    options: GatewayOptions,
    reporter: Reporter,
    state: GatewayState,
    bus_connected: bool,
    receive_task: Option<JoinHandle<()>>,
}

impl<T: Transport> Gateway<T> {
    pub fn new(
        transport: T,
        publisher: ReadingPublisher,
        options: GatewayOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            transport,
            publisher,
            options,
            reporter: Reporter::new(sink),
            state: GatewayState::Created,
            bus_connected: false,
            receive_task: None,
        }
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.reporter.stats()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_state(&mut self, to: GatewayState) {
        let from = self.state;
        if from != to {
            self.state = to;
            self.reporter.emit(GatewayEvent::StateChanged { from, to });
        }
    }

    /// Open the transport, connect the bus and start handling inbound frames.
    ///
    /// On failure everything acquired so far is released and the gateway is
    /// left `Closed`. Nothing touches the bus unless the transport opened.
    pub async fn start(&mut self) -> Result<(), GatewayError> {
        if self.state != GatewayState::Created {
            return Err(GatewayError::InvalidState {
                action: "start",
                state: self.state,
            });
        }

        if let Err(e) = self.transport.open().await {
            error!(error = %e, "Failed to open transport");
            self.set_state(GatewayState::Closed);
            return Err(e.into());
        }
        self.set_state(GatewayState::TransportOpen);

        let bus = self.publisher.bus().clone();
        if let Err(e) = bus.connect().await {
            error!(endpoint = %bus.endpoint(), error = %e, "Failed to connect to bus");
            self.stop().await;
            return Err(e.into());
        }
        self.bus_connected = true;
        info!(endpoint = %bus.endpoint(), "Connected to bus");

        let Some(frames) = self.transport.take_frames() else {
            self.stop().await;
            return Err(GatewayError::Fatal(
                "transport did not provide a frame channel".to_string(),
            ));
        };

        self.receive_task = Some(tokio::spawn(receive_frames(
            frames,
            self.publisher.clone(),
            self.reporter.clone(),
        )));
        self.set_state(GatewayState::Running);
        Ok(())
    }

    /// Send the request command once.
    ///
    /// A failed send is reported and swallowed; only a transport that can no
    /// longer be used is an error.
    pub async fn request_reading(&mut self) -> Result<(), GatewayError> {
        match self
            .transport
            .send_broadcast(&self.options.request_command)
            .await
        {
            Ok(()) => {
                self.reporter.emit(GatewayEvent::RequestSent {
                    destination: self.transport.destination(),
                });
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(GatewayError::Fatal(e.to_string())),
            Err(e) => {
                self.reporter.emit(GatewayEvent::RequestFailed {
                    error: e.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Poll until `shutdown` resolves or a fatal error occurs.
    ///
    /// Requests are sent immediately, then once per poll interval. The
    /// shutdown future is only watched between requests, so shutdown latency
    /// is bounded by the poll interval. The gateway is `Stopping` once this
    /// returns a reason; call `stop` to release it.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<ShutdownReason, GatewayError>
    where
        F: Future<Output = ()>,
    {
        if self.state != GatewayState::Running {
            return Err(GatewayError::InvalidState {
                action: "run",
                state: self.state,
            });
        }

        let reason = self.poll(shutdown).await;
        self.set_state(GatewayState::Stopping);
        Ok(reason)
    }

    async fn poll<F>(&mut self, shutdown: F) -> ShutdownReason
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            if self
                .receive_task
                .as_ref()
                .is_some_and(|task| task.is_finished())
            {
                error!("Receive path terminated");
                return ShutdownReason::Fatal("receive path terminated".to_string());
            }

            if let Err(e) = self.request_reading().await {
                error!(error = %e, "Polling loop failed");
                return ShutdownReason::Fatal(e.to_string());
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return ShutdownReason::Interrupted;
                }
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    /// Release the transport and the bus. Safe in any state and idempotent.
    ///
    /// Each release is attempted even if an earlier one fails.
    pub async fn stop(&mut self) {
        if self.state == GatewayState::Closed {
            return;
        }
        self.set_state(GatewayState::Stopping);

        if self.transport.is_open() {
            if let Err(e) = self.transport.close().await {
                error!(error = %e, "Failed to close transport");
            }
        }

        if let Some(mut task) = self.receive_task.take() {
            if tokio::time::timeout(RECEIVE_DRAIN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("Receive task did not drain in time; aborting");
                task.abort();
                let _ = task.await;
            }
        }

        if self.bus_connected {
            if let Err(e) = self.publisher.bus().disconnect().await {
                error!(error = %e, "Failed to disconnect from bus");
            }
            self.bus_connected = false;
        }

        self.set_state(GatewayState::Closed);

        let stats = self.stats();
        info!(
            requests_sent = stats.requests_sent,
            request_failures = stats.request_failures,
            frames_received = stats.frames_received,
            frames_rejected = stats.frames_rejected,
            values_published = stats.values_published,
            publish_failures = stats.publish_failures,
            handler_panics = stats.handler_panics,
            "Gateway stopped"
        );
    }

    /// `start`, `run` and `stop` in sequence.
    ///
    /// Startup failures are returned as errors; anything after a successful
    /// start, a panic in the polling loop included, is reported as a
    /// [`ShutdownReason`] once cleanup has run.
    pub async fn serve<F>(&mut self, shutdown: F) -> Result<ShutdownReason, GatewayError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        let reason = match AssertUnwindSafe(self.run(shutdown)).catch_unwind().await {
            Ok(Ok(reason)) => reason,
            Ok(Err(e)) => ShutdownReason::Fatal(e.to_string()),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(message = %message, "Polling loop panicked");
                ShutdownReason::Fatal(message)
            }
        };

        self.stop().await;
        Ok(reason)
    }
}

impl<T: Transport> Drop for Gateway<T> {
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
    }
}

async fn receive_frames(
    mut frames: mpsc::Receiver<ReceivedFrame>,
    publisher: ReadingPublisher,
    reporter: Reporter,
) {
    while let Some(frame) = frames.recv().await {
        let source = frame.source;
        let handled = AssertUnwindSafe(handle_frame(frame, &publisher, &reporter))
            .catch_unwind()
            .await;

        if let Err(panic) = handled {
            reporter.emit(GatewayEvent::HandlerPanicked {
                source,
                message: panic_message(panic.as_ref()),
            });
        }
    }
}

/// Decode one frame and publish its reading. Never fails: problems become
/// events.
async fn handle_frame(frame: ReceivedFrame, publisher: &ReadingPublisher, reporter: &Reporter) {
    let ReceivedFrame { source, data } = frame;
    reporter.emit(GatewayEvent::FrameReceived {
        source,
        len: data.len(),
    });

    let reading = match codec::decode(&data) {
        Ok(reading) => reading,
        Err(e) => {
            reporter.emit(GatewayEvent::FrameRejected {
                source,
                len: data.len(),
                error: e.to_string(),
            });
            return;
        }
    };

    let outcomes = publisher
        .publish_reading(&reading, &source.to_string())
        .await;

    let mut published = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(()) => published += 1,
            Err(e) => reporter.emit(GatewayEvent::PublishFailed {
                topic: outcome.topic,
                value: outcome.value,
                error: e.to_string(),
            }),
        }
    }

    if published > 0 {
        reporter.emit(GatewayEvent::ReadingPublished {
            source,
            reading,
            published,
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownReason::Interrupted.exit_code(), 0);
        assert_eq!(ShutdownReason::Fatal("x".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_options_from_config() {
        let config = XBeeConfig::new("/dev/ttyS0", 9600, None).unwrap();
        let options = GatewayOptions::from_config(&config);
        assert_eq!(options, GatewayOptions::default());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
