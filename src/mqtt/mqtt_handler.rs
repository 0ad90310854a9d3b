use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::MqttConfig;
use super::message_manager::MsgManager;
use super::topics::{TopicScheme, PAYLOAD_OFF, PAYLOAD_OFFLINE, PAYLOAD_ON, PAYLOAD_ONLINE};
use crate::bridge::publisher::StateSink;
use crate::zense::DeviceId;

const REQUEST_CAPACITY: usize = 100;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(2);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub connects: usize,
    pub messages_received: usize,
    pub last_error: Option<String>,
}

pub struct MqttHandler {
    status: MqttStatus,
    client: AsyncClient,
    eventloop: EventLoop,
    topics: TopicScheme,
}

impl MqttHandler {
    pub fn new(config: &MqttConfig, topics: TopicScheme) -> Self {
        let client_id = config.client_id();
        info!("MQTT client {} targets {}:{}", client_id, config.host, config.port);

        let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);
        mqtt_options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                topics.availability(),
                PAYLOAD_OFFLINE,
                QoS::AtLeastOnce,
                true,
            ));
        if let Some((user, password)) = config.credentials() {
            mqtt_options.set_credentials(user, password);
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        MqttHandler {
            status: MqttStatus::default(),
            client,
            eventloop,
            topics,
        }
    }

    /// Publishing side for the scheduler, sharing this handler's connection.
    pub fn state_sink(&self) -> MqttStateSink {
        MqttStateSink {
            client: self.client.clone(),
            topics: self.topics.clone(),
        }
    }

    pub fn status(&self) -> &MqttStatus {
        &self.status
    }

    /// Drives the event loop until shutdown, then announces `offline`.
    ///
    /// Inbound messages are handed to `msg_manager`.
    pub async fn run(mut self, mut msg_manager: MsgManager, shutdown: CancellationToken) {
        self.status.connection_state = ConnectionState::Connecting;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("MQTT connected ({:?})", ack.code);
                    self.on_connected(&msg_manager);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.status.messages_received += 1;
                    msg_manager.handle(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    self.status.connection_state = ConnectionState::Reconnecting;
                    self.status.last_error = Some(e.to_string());
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }
        self.disconnect().await;
    }

    fn on_connected(&mut self, msg_manager: &MsgManager) {
        self.status.connection_state = ConnectionState::Connected;
        self.status.connects += 1;
        self.status.last_error = None;

        for filter in self.topics.subscriptions() {
            if let Err(e) = self.client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                warn!("Subscribe to {} failed: {}", filter, e);
            }
        }
        if let Err(e) = self
            .client
            .try_publish(self.topics.availability(), QoS::AtLeastOnce, true, PAYLOAD_ONLINE)
        {
            warn!("Availability publish failed: {}", e);
        }
        msg_manager.request_discovery();
    }

    async fn disconnect(&mut self) {
        info!("MQTT shutting down after {} connects", self.status.connects);
        let availability = self.topics.availability();
        if let Err(e) = self
            .client
            .try_publish(availability, QoS::AtLeastOnce, true, PAYLOAD_OFFLINE)
        {
            warn!("Offline publish failed: {}", e);
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("MQTT disconnect request failed: {}", e);
        }

        let eventloop = &mut self.eventloop;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if timeout(SHUTDOWN_FLUSH, flush).await.is_err() {
            debug!("MQTT flush timed out");
        }
        self.status.connection_state = ConnectionState::Disconnected;
    }
}

/// Retained state messages for one device level: `(topic, payload)` pairs.
pub fn state_messages(topics: &TopicScheme, device: DeviceId, level: u8) -> [(String, String); 2] {
    let switch = if level > 0 { PAYLOAD_ON } else { PAYLOAD_OFF };
    [
        (topics.state(device), switch.to_string()),
        (topics.brightness_state(device), level.to_string()),
    ]
}

pub struct MqttStateSink {
    client: AsyncClient,
    topics: TopicScheme,
}

impl MqttStateSink {
    fn publish_retained(&self, topic: String, payload: Vec<u8>) {
        debug!("TX topic={} ({} bytes)", topic, payload.len());
        if let Err(e) = self.client.try_publish(topic, QoS::AtMostOnce, true, payload) {
            warn!("MQTT publish failed: {}", e);
        }
    }
}

impl StateSink for MqttStateSink {
    fn publish_state(&mut self, device: DeviceId, level: u8) {
        for (topic, payload) in state_messages(&self.topics, device, level) {
            self.publish_retained(topic, payload.into_bytes());
        }
    }

    fn publish_discovery(&mut self, device: DeviceId, name: &str) {
        let config = self.topics.discovery_payload(device, name);
        match serde_json::to_vec(&config) {
            Ok(json) => {
                info!("Announcing device {} as {:?}", device, config.name);
                self.publish_retained(self.topics.discovery(device), json);
            }
            Err(e) => warn!("Discovery payload for device {} not serializable: {}", device, e),
        }
    }
}
