//! Zenoh bus publisher.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use zenoh::Session;

use crate::config::BusConfig;
use crate::error::{Error, Result};
use crate::publisher::{BusError, BusPublisher};

/// Build a client-mode Zenoh configuration pointing at the configured router.
pub fn zenoh_config(config: &BusConfig) -> Result<zenoh::Config> {
    let mut zenoh_config = zenoh::Config::default();

    zenoh_config.insert_json5("mode", "\"client\"")?;

    let endpoints = vec![router_endpoint(config)];
    let endpoints_json = serde_json::to_string(&endpoints)?;
    zenoh_config
        .insert_json5("connect/endpoints", &endpoints_json)
        .map_err(|e| Error::Config(format!("Failed to set connect endpoints: {}", e)))?;

    Ok(zenoh_config)
}

fn router_endpoint(config: &BusConfig) -> String {
    format!("tcp/{}:{}", config.host, config.port())
}

/// Publisher backed by a Zenoh session in client mode.
///
/// Zenoh reconnects to the router on its own once the session is open.
pub struct ZenohPublisher {
    config: BusConfig,
    session: RwLock<Option<Session>>,
}

impl ZenohPublisher {
    /// Create a new, unconnected publisher.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
        }
    }

    fn unavailable(&self, message: impl ToString) -> BusError {
        BusError::Unavailable {
            endpoint: self.endpoint(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl BusPublisher for ZenohPublisher {
    async fn connect(&self) -> std::result::Result<(), BusError> {
        let mut slot = self.session.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let zenoh_config = zenoh_config(&self.config).map_err(|e| self.unavailable(e))?;

        tracing::info!(endpoint = %self.endpoint(), "Connecting to Zenoh");

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let session = tokio::time::timeout(timeout, zenoh::open(zenoh_config))
            .await
            .map_err(|_| {
                self.unavailable(format!(
                    "no session within {}s",
                    self.config.connect_timeout_secs
                ))
            })?
            .map_err(|e| self.unavailable(e))?;

        tracing::info!(zid = %session.zid(), "Connected to Zenoh");

        *slot = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> std::result::Result<(), BusError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };

        session
            .close()
            .await
            .map_err(|e| self.unavailable(format!("close failed: {}", e)))?;

        tracing::info!(endpoint = %self.endpoint(), "Zenoh session closed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), BusError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or(BusError::NotConnected)?;

        session
            .put(topic, payload)
            .await
            .map_err(|e| BusError::publish(topic, e))
    }

    fn is_connected(&self) -> bool {
        self.session
            .try_read()
            .map(|s| s.as_ref().is_some_and(|s| !s.is_closed()))
            .unwrap_or(false)
    }

    fn endpoint(&self) -> String {
        router_endpoint(&self.config)
    }
}
