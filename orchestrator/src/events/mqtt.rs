//! MQTT progress publisher

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::StackError;
use crate::events::{ProgressEvent, ProgressPublisher};

/// Progress topic of a deployment
pub fn progress_topic(deployment_id: &str) -> String {
    format!("stackpilot/deployment/{}/progress", deployment_id)
}

/// MQTT broker address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub client_id: String,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<SecretString>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 8883,
            use_tls: true,
            ca_cert_path: None,
            client_id: "stackpilot".to_string(),
            username: None,
            password: None,
        }
    }
}

/// Publishes progress events to the broker
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Build the client. The returned event loop must be driven by
    /// [`run_event_loop`] for anything to reach the broker.
    pub fn connect(address: &MqttAddress, capacity: usize) -> Result<(Self, EventLoop), StackError> {
        if address.host.is_empty() {
            return Err(StackError::MqttError("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(&address.client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &address.username {
            let password = address
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;
            use std::sync::Arc;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path)
                    .map_err(|e| StackError::MqttError(format!("Failed to read CA cert {ca_path}: {e}")))?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, capacity.max(1));
        Ok((Self { client }, eventloop))
    }

    pub async fn disconnect(&self) -> Result<(), StackError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| StackError::MqttError(e.to_string()))?;
        info!("MQTT disconnected");
        Ok(())
    }
}

impl ProgressPublisher for MqttPublisher {
    fn publish(&self, event: &ProgressEvent) {
        let topic = progress_topic(event.deployment_id());
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode progress event: {}", e);
                return;
            }
        };

        // Never wait on the broker, a full queue drops the event
        match self.client.try_publish(&topic, QoS::AtLeastOnce, false, payload) {
            Ok(()) => debug!("Published progress to: {}", topic),
            Err(e) => warn!("Dropping progress event for {}: {}", topic, e),
        }
    }
}

/// Drive the MQTT event loop until shutdown
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    reconnect_delay: Duration,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("MQTT event loop starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT event loop shutting down...");
                return;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}, retrying in {:?}", e, reconnect_delay);
                    tokio::select! {
                        _ = &mut shutdown_signal => return,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }
}
