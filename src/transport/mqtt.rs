//! MQTT detection sink.
//!
//! Topics, under a configurable prefix:
//! - `<prefix>/detections`: detection batches (QoS 1)
//! - `<prefix>/status`: camera status snapshots (QoS 1)
//! - `<prefix>/availability`: `online` / `offline` (retained, last will)
//!
//! The rumqttc event loop runs on its own thread. Sends use `try_publish`
//! and never block the pipeline; a full request queue is a send failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rumqttc::v5::mqttbytes::v5::{LastWill, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, MqttOptions};

use super::endpoint::{build_transport, parse_mqtt_endpoint, validate_loopback_addr, TlsMaterials};
use crate::publish::{DetectionSink, MessageKind};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

const REQUEST_QUEUE_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq)]
pub struct MqttSettings {
    pub addr: String,
    pub topic_prefix: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub allow_remote: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:1883".to_string(),
            topic_prefix: "blindspot".to_string(),
            client_id: "blindspotd".to_string(),
            username: None,
            password: None,
            use_tls: false,
            allow_remote: false,
            tls_ca_path: None,
            tls_client_cert_path: None,
            tls_client_key_path: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl MqttSettings {
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), suffix)
    }
}

struct MqttRuntime {
    closing: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MqttRuntime {
    fn spawn(client: Client, mut connection: Connection, availability_topic: String) -> Self {
        let closing = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closing);
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        log::info!("MQTT connected");
                        if let Err(err) = client.try_publish(
                            availability_topic.as_str(),
                            QoS::AtLeastOnce,
                            true,
                            PAYLOAD_ONLINE.as_bytes().to_vec(),
                        ) {
                            log::warn!("failed to publish MQTT availability: {}", err);
                        }
                    }
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error: {}", err);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
            log::debug!("MQTT event loop finished");
        });

        Self {
            closing,
            handle: Some(handle),
        }
    }

    fn shutdown(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + CLOSE_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            log::warn!("MQTT event loop did not stop within {:?}", CLOSE_TIMEOUT);
        }
    }
}

pub struct MqttSink {
    client: Client,
    detections_topic: String,
    status_topic: String,
    availability_topic: String,
    runtime: MqttRuntime,
}

impl MqttSink {
    /// Validate the endpoint, load TLS material and start the event loop.
    ///
    /// The broker connection itself is established asynchronously; an
    /// unreachable broker shows up as logged connection errors and failed
    /// sends, not as an error here.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.addr, settings.use_tls)?;
        if !settings.allow_remote {
            validate_loopback_addr(&endpoint, &settings.addr)?;
        }
        let tls = TlsMaterials::load(
            settings.tls_ca_path.as_deref(),
            settings.tls_client_cert_path.as_deref(),
            settings.tls_client_key_path.as_deref(),
        )?;
        let availability_topic = settings.topic("availability");

        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            availability_topic.as_str(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        options.set_transport(build_transport(&endpoint, &tls).context("build MQTT transport")?);

        let (client, connection) = Client::new(options, REQUEST_QUEUE_CAPACITY);
        let runtime = MqttRuntime::spawn(client.clone(), connection, availability_topic.clone());
        log::info!(
            "MQTT sink targeting {}:{} (TLS: {}, auth: {}, prefix: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some(),
            settings.topic_prefix
        );

        Ok(Self {
            client,
            detections_topic: settings.topic("detections"),
            status_topic: settings.topic("status"),
            availability_topic,
            runtime,
        })
    }
}

impl DetectionSink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        let topic = match kind {
            MessageKind::Detections => &self.detections_topic,
            MessageKind::Status => &self.status_topic,
        };
        self.client
            .try_publish(topic.as_str(), QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("enqueue MQTT publish to {}", topic))
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.client.try_publish(
            self.availability_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        let result = self
            .client
            .try_disconnect()
            .context("enqueue MQTT disconnect");
        self.runtime.shutdown();
        result
    }
}
