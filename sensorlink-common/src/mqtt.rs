//! MQTT bus publisher using rumqttc.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::publisher::{BusError, BusPublisher};

/// Request queue depth between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

/// Pause between reconnection attempts after the session drops.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How long `disconnect` lets the event loop flush the DISCONNECT packet.
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Publisher backed by an MQTT broker.
///
/// Reconnection after the initial CONNACK is left to the rumqttc event loop,
/// which is driven by a background task for the lifetime of the session.
pub struct MqttPublisher {
    config: BusConfig,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Create a new, unconnected publisher.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options =
            MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port());
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        options
    }

    fn unavailable(&self, message: impl Into<String>) -> BusError {
        BusError::Unavailable {
            endpoint: self.endpoint(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl BusPublisher for MqttPublisher {
    async fn connect(&self) -> Result<(), BusError> {
        let mut client_slot = self.client.lock().await;
        if client_slot.is_some() {
            return Ok(());
        }

        let (client, event_loop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        info!(
            endpoint = %self.endpoint(),
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );

        let mut handle = tokio::spawn(drive_event_loop(
            event_loop,
            self.connected.clone(),
            ready_tx,
            self.endpoint(),
        ));

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(self.unavailable(message)),
            Ok(Err(_)) => Err(self.unavailable("event loop stopped before CONNACK")),
            Err(_) => Err(self.unavailable(format!(
                "no CONNACK within {}s",
                self.config.connect_timeout_secs
            ))),
        };

        match outcome {
            Ok(()) => {
                *client_slot = Some(client);
                *self.event_loop.lock().await = Some(handle);
                Ok(())
            }
            Err(e) => {
                handle.abort();
                let _ = (&mut handle).await;
                self.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };

        let result = client
            .disconnect()
            .await
            .map_err(|e| self.unavailable(format!("disconnect failed: {}", e)));

        if let Some(mut handle) = self.event_loop.lock().await.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!(endpoint = %self.endpoint(), "MQTT connection closed");
        result
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or(BusError::NotConnected)?;

        // try_publish never waits on a full request queue, so a stalled
        // broker cannot block the caller.
        client
            .try_publish(topic, self.config.qos.into(), false, payload)
            .map_err(|e| BusError::publish(topic, e))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> String {
        format!("mqtt://{}:{}", self.config.host, self.config.port())
    }
}

/// Poll the rumqttc event loop until the session is closed.
///
/// The first CONNACK (or the first error) is reported through `ready`.
/// Errors after that are logged and retried.
async fn drive_event_loop(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), String>>,
    endpoint: String,
) {
    let mut ready = Some(ready);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.store(true, Ordering::SeqCst);
                info!(endpoint = %endpoint, code = ?ack.code, "Connected to MQTT broker");
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                warn!(endpoint = %endpoint, "Broker closed the MQTT session");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                debug!(endpoint = %endpoint, "MQTT DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e.to_string()));
                    return;
                }

                if connected.swap(false, Ordering::SeqCst) {
                    warn!(endpoint = %endpoint, error = %e, "Disconnected from MQTT broker");
                } else {
                    debug!(endpoint = %endpoint, error = %e, "MQTT reconnect attempt failed");
                }

                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusBackend;

    fn config(port: u16) -> BusConfig {
        let mut config = BusConfig::new(BusBackend::Mqtt, "127.0.0.1", port, "xbee/data").unwrap();
        config.connect_timeout_secs = 2;
        config
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_is_noop() {
        let publisher = MqttPublisher::new(config(1883));
        assert!(publisher.disconnect().await.is_ok());
        assert!(publisher.disconnect().await.is_ok());
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn test_publish_without_session() {
        let publisher = MqttPublisher::new(config(1883));
        let result = publisher.publish("xbee/data/temperature", b"1.0".to_vec()).await;
        assert!(matches!(result, Err(BusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_unavailable() {
        // Bind then drop a listener to get a port nobody is serving.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let publisher = MqttPublisher::new(config(port));
        let result = publisher.connect().await;

        assert!(matches!(result, Err(BusError::Unavailable { .. })));
        assert!(!publisher.is_connected());
        assert!(publisher.disconnect().await.is_ok());
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            MqttPublisher::new(config(1884)).endpoint(),
            "mqtt://127.0.0.1:1884"
        );
    }
}
