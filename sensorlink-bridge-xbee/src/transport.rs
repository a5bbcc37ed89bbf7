//! Serial radio transport.
//!
//! Inbound RF data is delivered through an mpsc channel rather than a
//! callback: the reader task decodes API frames and pushes
//! [`ReceivedFrame`]s, and whoever called [`Transport::take_frames`] consumes
//! them on their own task.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::XBeeConfig;
use crate::frame::{ApiFrame, FrameDecoder, XBeeAddress};

/// Depth of the inbound frame channel.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;

/// RF data received from a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    /// 64-bit address of the sender.
    pub source: XBeeAddress,
    /// RF payload.
    pub data: Vec<u8>,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be acquired.
    #[error("Transport unavailable on {port}: {message}")]
    Unavailable { port: String, message: String },

    /// One outbound frame could not be written.
    #[error("Send failed: {0}")]
    Send(String),

    /// Operation requires an open transport.
    #[error("Transport is not open")]
    NotOpen,

    /// The device went away after it was opened.
    #[error("Transport closed: {0}")]
    Closed(String),
}

impl TransportError {
    /// Whether the transport can no longer be used at all.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::NotOpen | TransportError::Closed(_))
    }
}

/// A duplex channel to the remote sensor node.
///
/// Callers track open/closed state; `open` on an already open transport is
/// not supported.
#[async_trait]
pub trait Transport: Send {
    /// Acquire the device. Fails with [`TransportError::Unavailable`].
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Release the device. Check [`is_open`](Self::is_open) first.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Address [`send_broadcast`](Self::send_broadcast) delivers to.
    fn destination(&self) -> XBeeAddress;

    /// Fire-and-forget send to every node, or to the configured target
    /// address when one is set. Not retried.
    async fn send_broadcast(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Take the inbound frame channel. There is one channel per open; later
    /// calls return `None`.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<ReceivedFrame>>;
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// XBee radio attached to a serial port, in API mode 1.
pub struct XBeeTransport {
    config: XBeeConfig,
    writer: Option<BoxedWriter>,
    reader: Option<JoinHandle<()>>,
    frames: Option<mpsc::Receiver<ReceivedFrame>>,
    failure: Arc<OnceLock<String>>,
    next_frame_id: u8,
}

impl XBeeTransport {
    /// Create a transport for the configured port. Nothing is opened yet.
    pub fn new(config: XBeeConfig) -> Self {
        Self {
            config,
            writer: None,
            reader: None,
            frames: None,
            failure: Arc::new(OnceLock::new()),
            next_frame_id: 1,
        }
    }

    /// Start I/O over an already open byte stream.
    fn attach<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        self.failure = Arc::new(OnceLock::new());
        self.reader = Some(tokio::spawn(read_frames(
            read_half,
            tx,
            self.failure.clone(),
        )));
        self.writer = Some(Box::new(write_half));
        self.frames = Some(rx);
    }

    /// Frame ids run 1..=255; 0 would suppress the transmit status.
    fn take_frame_id(&mut self) -> u8 {
        let id = self.next_frame_id;
        self.next_frame_id = if id == u8::MAX { 1 } else { id + 1 };
        id
    }
}

#[async_trait]
impl Transport for XBeeTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let builder = tokio_serial::new(&self.config.serial_port, self.config.baud_rate);
        let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            TransportError::Unavailable {
                port: self.config.serial_port.clone(),
                message: e.to_string(),
            }
        })?;

        self.attach(serial);

        info!(
            port = %self.config.serial_port,
            baud_rate = self.config.baud_rate,
            destination = %self.destination(),
            "XBee connection established (API mode 1)"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.frames = None;

        if let Some(mut writer) = self.writer.take() {
            writer
                .shutdown()
                .await
                .map_err(|e| TransportError::Closed(e.to_string()))?;
        }

        info!(port = %self.config.serial_port, "XBee connection closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn destination(&self) -> XBeeAddress {
        self.config.destination()
    }

    async fn send_broadcast(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if let Some(reason) = self.failure.get() {
            return Err(TransportError::Closed(reason.clone()));
        }

        let frame_id = self.take_frame_id();
        let destination = self.destination();
        let writer = self.writer.as_mut().ok_or(TransportError::NotOpen)?;

        let bytes = ApiFrame::transmit_request(frame_id, destination, payload)
            .encode()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        debug!(
            frame_id,
            destination = %destination,
            len = payload.len(),
            "Transmit request written"
        );
        Ok(())
    }

    fn take_frames(&mut self) -> Option<mpsc::Receiver<ReceivedFrame>> {
        self.frames.take()
    }
}

/// Read the serial stream, decode API frames and forward received RF data.
///
/// Stops when the stream ends or fails (recording why in `failure`), or when
/// nobody is listening on `tx` any more.
async fn read_frames<R>(
    mut reader: R,
    tx: mpsc::Sender<ReceivedFrame>,
    failure: Arc<OnceLock<String>>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = failure.set("serial stream ended".to_string());
                warn!("XBee serial stream ended");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "XBee serial read failed");
                let _ = failure.set(e.to_string());
                return;
            }
        };

        decoder.extend(&buf[..n]);

        while let Some(result) = decoder.next_frame() {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Discarding invalid XBee frame");
                    continue;
                }
            };

            if let Some((source, data)) = frame.received_data() {
                let received = ReceivedFrame {
                    source,
                    data: data.to_vec(),
                };
                if tx.send(received).await.is_err() {
                    debug!("Frame receiver dropped; reader exiting");
                    return;
                }
                continue;
            }

            match frame {
                ApiFrame::TransmitStatus {
                    frame_id,
                    delivery_status,
                    retry_count,
                    ..
                } => {
                    if delivery_status == 0 {
                        debug!(frame_id, retry_count, "Transmit delivered");
                    } else {
                        warn!(
                            frame_id,
                            retry_count,
                            delivery_status = format_args!("{:#04x}", delivery_status),
                            "Transmit not delivered"
                        );
                    }
                }
                other => {
                    debug!(
                        frame_type = format_args!("{:#04x}", other.frame_type()),
                        "Ignoring XBee frame"
                    );
                }
            }
        }
    }
}
