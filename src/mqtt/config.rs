use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Broker connection settings.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Empty means anonymous
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }

    /// Client id unique per process start, `zense-bridge-<unix seconds>`.
    pub fn client_id(&self) -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        format!("zense-bridge-{}", secs)
    }
}

/// Topic layout shared with Home Assistant.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    pub discovery_prefix: String,
    /// Root for every per-device topic and the availability topic
    pub base: String,
    pub domain: String,
    pub uid_prefix: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: "homeassistant".to_string(),
            base: "homeassistant/zense_bridge".to_string(),
            domain: "light".to_string(),
            uid_prefix: "zensebridge_".to_string(),
        }
    }
}
