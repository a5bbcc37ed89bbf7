//! Receive-only XBee monitor.
//!
//! Opens the radio and logs every inbound RF payload until Ctrl+C. Useful
//! for checking what a sensor node actually sends.

use anyhow::{Context, Result, bail};
use clap::Parser;
use sensorlink_bridge_xbee::codec;
use sensorlink_bridge_xbee::config::{XBeeBridgeConfig, XBeeConfig};
use sensorlink_bridge_xbee::{Transport, XBeeTransport};
use sensorlink_common::LoggingConfig;
use std::fmt::Write;
use std::path::PathBuf;
use tracing::info;

/// Receive-only XBee monitor.
#[derive(Parser, Debug)]
#[command(name = "xbee-listen")]
#[command(about = "Logs every payload received by an XBee radio")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format); only the `xbee` section is used
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overriding the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overriding the config file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn resolve_xbee(args: &Args) -> Result<(XBeeConfig, LoggingConfig)> {
    let (mut xbee, logging) = match &args.config {
        Some(path) => {
            let config = XBeeBridgeConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?;
            (config.xbee, config.logging)
        }
        None => {
            let Some(port) = &args.port else {
                bail!("either --config or --port is required");
            };
            (XBeeConfig::new(port.clone(), 9600, None)?, LoggingConfig::default())
        }
    };

    if let Some(port) = &args.port {
        xbee.serial_port = port.clone();
    }
    if let Some(baud) = args.baud {
        xbee.baud_rate = baud;
    }
    xbee.validate()?;

    Ok((xbee, logging))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (xbee, mut logging) = resolve_xbee(&args)?;

    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    sensorlink_common::init_tracing(&logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    let mut transport = XBeeTransport::new(xbee.clone());
    transport
        .open()
        .await
        .with_context(|| format!("Failed to open {}", xbee.serial_port))?;

    let Some(mut frames) = transport.take_frames() else {
        bail!("transport did not provide a frame channel");
    };

    info!(port = %xbee.serial_port, baud_rate = xbee.baud_rate, "Listening; press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    info!("Serial stream ended");
                    break;
                };

                info!(
                    source = %frame.source,
                    len = frame.data.len(),
                    text = %String::from_utf8_lossy(&frame.data),
                    hex = %hex(&frame.data),
                    "Received payload"
                );

                if let Ok(reading) = codec::decode(&frame.data) {
                    info!(
                        temperature = reading.temperature,
                        humidity = reading.humidity,
                        "Payload decodes as a reading"
                    );
                }
            }
        }
    }

    if transport.is_open() {
        transport.close().await?;
    }
    Ok(())
}
