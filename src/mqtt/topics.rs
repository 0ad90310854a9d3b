//! Topic layout and Home Assistant discovery metadata.

use serde::Serialize;

use super::config::TopicConfig;
use crate::zense::protocol::BRIGHTNESS_SCALE;
use crate::zense::DeviceId;

/// Birth topic Home Assistant publishes to after it (re)starts.
pub const HA_STATUS_TOPIC: &str = "homeassistant/status";

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";
pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

/// Which command topic of a device a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTopic {
    /// `<base>/<uid>/set`
    Switch,
    /// `<base>/<uid>/brightness/set`
    Brightness,
}

/// Light entity config understood by Home Assistant's MQTT discovery.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LightDiscovery {
    pub name: String,
    pub unique_id: String,
    pub command_topic: String,
    pub state_topic: String,
    pub brightness_command_topic: String,
    pub brightness_state_topic: String,
    pub brightness_scale: u8,
    pub payload_on: String,
    pub payload_off: String,
    pub availability_topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
    pub optimistic: bool,
    pub qos: u8,
}

#[derive(Clone, Debug)]
pub struct TopicScheme {
    config: TopicConfig,
}

impl TopicScheme {
    pub fn new(config: TopicConfig) -> Self {
        Self { config }
    }

    pub fn uid(&self, device: DeviceId) -> String {
        format!("{}{}", self.config.uid_prefix, device)
    }

    pub fn availability(&self) -> String {
        format!("{}/availability", self.config.base)
    }

    fn device_topic(&self, device: DeviceId, suffix: &str) -> String {
        format!("{}/{}/{}", self.config.base, self.uid(device), suffix)
    }

    pub fn command(&self, device: DeviceId) -> String {
        self.device_topic(device, "set")
    }

    pub fn state(&self, device: DeviceId) -> String {
        self.device_topic(device, "state")
    }

    pub fn brightness_command(&self, device: DeviceId) -> String {
        self.device_topic(device, "brightness/set")
    }

    pub fn brightness_state(&self, device: DeviceId) -> String {
        self.device_topic(device, "brightness/state")
    }

    pub fn discovery(&self, device: DeviceId) -> String {
        format!(
            "{}/{}/{}/config",
            self.config.discovery_prefix,
            self.config.domain,
            self.uid(device)
        )
    }

    /// Filters the bridge subscribes to after every (re)connect.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            HA_STATUS_TOPIC.to_string(),
            format!("{}/+/set", self.config.base),
            format!("{}/+/brightness/set", self.config.base),
        ]
    }

    /// Resolves a command topic back to its device.
    ///
    /// Anything outside `<base>/<uid>/set` and `<base>/<uid>/brightness/set`
    /// is rejected, as is a uid without the configured prefix or with a
    /// non-numeric suffix.
    pub fn parse_command(&self, topic: &str) -> Option<(DeviceId, DeviceTopic)> {
        let rest = topic
            .strip_prefix(self.config.base.as_str())?
            .strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        let (uid, kind) = match parts.as_slice() {
            [uid, "set"] => (*uid, DeviceTopic::Switch),
            [uid, "brightness", "set"] => (*uid, DeviceTopic::Brightness),
            _ => return None,
        };
        let device = uid
            .strip_prefix(self.config.uid_prefix.as_str())?
            .parse::<DeviceId>()
            .ok()?;
        Some((device, kind))
    }

    pub fn discovery_payload(&self, device: DeviceId, name: &str) -> LightDiscovery {
        LightDiscovery {
            name: format!("{} (Zense)", name),
            unique_id: self.uid(device),
            command_topic: self.command(device),
            state_topic: self.state(device),
            brightness_command_topic: self.brightness_command(device),
            brightness_state_topic: self.brightness_state(device),
            brightness_scale: BRIGHTNESS_SCALE,
            payload_on: PAYLOAD_ON.to_string(),
            payload_off: PAYLOAD_OFF.to_string(),
            availability_topic: self.availability(),
            payload_available: PAYLOAD_ONLINE.to_string(),
            payload_not_available: PAYLOAD_OFFLINE.to_string(),
            optimistic: false,
            qos: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scheme() -> TopicScheme {
        TopicScheme::new(TopicConfig::default())
    }

    #[test]
    fn device_topics_follow_the_base() {
        let topics = scheme();
        assert_eq!(topics.command(7), "homeassistant/zense_bridge/zensebridge_7/set");
        assert_eq!(
            topics.brightness_state(7),
            "homeassistant/zense_bridge/zensebridge_7/brightness/state"
        );
        assert_eq!(topics.discovery(7), "homeassistant/light/zensebridge_7/config");
        assert_eq!(topics.availability(), "homeassistant/zense_bridge/availability");
    }

    #[test]
    fn command_topics_resolve_to_devices() {
        let topics = scheme();
        assert_eq!(
            topics.parse_command("homeassistant/zense_bridge/zensebridge_12/set"),
            Some((12, DeviceTopic::Switch))
        );
        assert_eq!(
            topics.parse_command("homeassistant/zense_bridge/zensebridge_12/brightness/set"),
            Some((12, DeviceTopic::Brightness))
        );
    }

    #[test]
    fn foreign_topics_are_rejected() {
        let topics = scheme();
        for topic in [
            "homeassistant/zense_bridge/set",
            "homeassistant/zense_bridge/other_12/set",
            "homeassistant/zense_bridge/zensebridge_x/set",
            "homeassistant/zense_bridge/zensebridge_12/state",
            "homeassistant/zense_bridgeX/zensebridge_12/set",
            "elsewhere/zense_bridge/zensebridge_12/set",
            HA_STATUS_TOPIC,
        ] {
            assert_eq!(topics.parse_command(topic), None, "{topic}");
        }
    }

    #[test]
    fn discovery_payload_serializes_all_fields() {
        const DEVICE: &str = "homeassistant/zense_bridge/zensebridge_3";
        let payload = scheme().discovery_payload(3, "Kitchen");
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "name": "Kitchen (Zense)",
                "unique_id": "zensebridge_3",
                "command_topic": "homeassistant/zense_bridge/zensebridge_3/set",
                "state_topic": "homeassistant/zense_bridge/zensebridge_3/state",
                "brightness_command_topic": format!("{DEVICE}/brightness/set"),
                "brightness_state_topic": format!("{DEVICE}/brightness/state"),
                "brightness_scale": 100,
                "payload_on": "ON",
                "payload_off": "OFF",
                "availability_topic": "homeassistant/zense_bridge/availability",
                "payload_available": "online",
                "payload_not_available": "offline",
                "optimistic": false,
                "qos": 0
            })
        );
    }
}
