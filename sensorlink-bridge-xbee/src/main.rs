//! XBee sensor gateway.
//!
//! Polls an XBee sensor node over serial and publishes its readings to MQTT
//! or Zenoh.

use anyhow::{Context, Result};
use clap::Parser;
use sensorlink_bridge_xbee::config::XBeeBridgeConfig;
use sensorlink_bridge_xbee::{Gateway, GatewayOptions, ShutdownReason, TracingSink, XBeeTransport};
use sensorlink_common::{LoggingConfig, ReadingPublisher, build_publisher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// XBee sensor gateway.
#[derive(Parser, Debug)]
#[command(name = "sensorlink-bridge-xbee")]
#[command(about = "Polls an XBee sensor node and publishes readings to MQTT or Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "xbee.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = XBeeBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    sensorlink_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting sensorlink-bridge-xbee");
    info!("Loaded configuration from {:?}", args.config);

    let bus = build_publisher(&config.bus);
    let publisher = ReadingPublisher::new(
        bus,
        config.bus.topic_prefix.clone(),
        config.bus.payload_format,
    );

    let mut gateway = Gateway::new(
        XBeeTransport::new(config.xbee.clone()),
        publisher,
        GatewayOptions::from_config(&config.xbee),
        Arc::new(TracingSink),
    );

    info!(
        port = %config.xbee.serial_port,
        bus = config.bus.backend.as_str(),
        interval_secs = config.xbee.poll_interval_secs,
        "Gateway running; press Ctrl+C to stop"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let reason = gateway
        .serve(shutdown)
        .await
        .context("Gateway failed to start")?;

    match &reason {
        ShutdownReason::Interrupted => info!("XBee bridge stopped"),
        ShutdownReason::Fatal(message) => error!("XBee bridge stopped: {}", message),
    }

    std::process::exit(reason.exit_code());
}
