//! # Bridge Configuration
//!
//! Built-in defaults, overridden by an optional TOML file, overridden by
//! environment variables. The environment keys are the ones the add-on
//! runner exports, so existing deployments keep working unchanged.
//!
//! ```toml
//! debug_mqtt = false
//!
//! [controller]
//! host = "192.168.1.235"
//! port = 10001
//! code = 16713
//! socket_timeout_secs = 12.0
//!
//! [mqtt]
//! host = "127.0.0.1"
//! port = 1883
//!
//! [timing]
//! debounce_ms = 120
//! command_gap_secs = 0.1
//! state_poll_secs = 600
//! level_on_window_secs = 1.0
//!
//! [topics]
//! base = "homeassistant/zense_bridge"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::SchedulerSettings;
use crate::mqtt::{MqttConfig, TopicConfig};
use crate::zense::SessionSettings;

const CONFIG_DIR: &str = "zense-bridge";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "ZENSE_BRIDGE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("{key} must be a non-negative number of seconds, got {value}")]
    InvalidDuration { key: &'static str, value: f64 },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub host: String,
    pub port: u16,
    pub code: u32,
    pub socket_timeout_secs: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            host: session.host,
            port: session.port,
            code: session.code,
            socket_timeout_secs: session.io_timeout.as_secs_f64(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_ms: u64,
    pub command_gap_secs: f64,
    /// Idle refresh period, clamped to one minute .. one week
    pub state_poll_secs: u64,
    pub level_on_window_secs: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 120,
            command_gap_secs: 0.10,
            state_poll_secs: 600,
            level_on_window_secs: 1.0,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub controller: ControllerConfig,
    pub mqtt: MqttConfig,
    pub timing: TimingConfig,
    pub topics: TopicConfig,
    /// Traces every inbound command message and raises the log level to DEBUG
    pub debug_mqtt: bool,
}

impl BridgeConfig {
    /// Loads the file at [`config_path`] (if present) and applies the process
    /// environment on top.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let mut config = Self::from_file(&path).await?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Loaded config from {}", path.display());
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides fields from environment variables looked up via `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        env.string("ZENSE_IP", &mut self.controller.host);
        env.parse("ZENSE_PORT", &mut self.controller.port)?;
        env.parse("ZENSE_CODE", &mut self.controller.code)?;
        env.parse("SOCKET_TIMEOUT", &mut self.controller.socket_timeout_secs)?;

        env.string("MQTT_HOST", &mut self.mqtt.host);
        env.parse("MQTT_PORT", &mut self.mqtt.port)?;
        env.string("MQTT_USER", &mut self.mqtt.username);
        env.string("MQTT_PASS", &mut self.mqtt.password);

        env.parse("DEBOUNCE_MS", &mut self.timing.debounce_ms)?;
        env.parse("CMD_GAP_SEC", &mut self.timing.command_gap_secs)?;
        env.parse("STATE_POLL_SEC", &mut self.timing.state_poll_secs)?;
        env.parse("LEVEL_ON_WINDOW_SEC", &mut self.timing.level_on_window_secs)?;

        if let Some(raw) = env.get("DEBUG_MQTT") {
            self.debug_mqtt = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        env.string("DISCOVERY_PREFIX", &mut self.topics.discovery_prefix);
        env.string("BASE", &mut self.topics.base);
        env.string("DOMAIN", &mut self.topics.domain);
        env.string("UID_PREFIX", &mut self.topics.uid_prefix);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session_settings()?;
        self.scheduler_settings()?;
        self.level_on_window()?;
        Ok(())
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        Ok(SessionSettings {
            host: self.controller.host.clone(),
            port: self.controller.port,
            code: self.controller.code,
            io_timeout: secs("SOCKET_TIMEOUT", self.controller.socket_timeout_secs)?,
            ..SessionSettings::default()
        })
    }

    pub fn scheduler_settings(&self) -> Result<SchedulerSettings, ConfigError> {
        Ok(SchedulerSettings {
            debounce: Duration::from_millis(self.timing.debounce_ms),
            command_gap: secs("CMD_GAP_SEC", self.timing.command_gap_secs)?,
            ..SchedulerSettings::default()
        })
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.timing.state_poll_secs)
    }

    pub fn level_on_window(&self) -> Result<Duration, ConfigError> {
        secs("LEVEL_ON_WINDOW_SEC", self.timing.level_on_window_secs)
    }
}

/// Config file location: `$ZENSE_BRIDGE_CONFIG`, else
/// `<config dir>/zense-bridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn secs(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { key, value })
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn parse<T: FromStr>(&self, key: &'static str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(value) = self.get(key) {
            *target = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key, value })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_addon() {
        let config = BridgeConfig::default();
        assert_eq!(config.controller.host, "192.168.1.235");
        assert_eq!(config.controller.port, 10001);
        assert_eq!(config.controller.code, 16713);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.topics.uid_prefix, "zensebridge_");
        assert!(!config.debug_mqtt);

        let scheduler = config.scheduler_settings().unwrap();
        assert_eq!(scheduler.debounce, Duration::from_millis(120));
        assert_eq!(scheduler.command_gap, Duration::from_millis(100));
        assert_eq!(config.session_settings().unwrap().io_timeout, Duration::from_secs(12));
        assert_eq!(config.poll_period(), Duration::from_secs(600));
    }

    #[test]
    fn environment_overrides_fields() {
        let mut config = BridgeConfig::default();
        config
            .apply_env(env(&[
                ("ZENSE_IP", "10.0.0.9"),
                ("ZENSE_PORT", " 4000 "),
                ("SOCKET_TIMEOUT", "2.5"),
                ("MQTT_USER", "bridge"),
                ("CMD_GAP_SEC", "0.25"),
                ("DEBUG_MQTT", "Yes"),
                ("BASE", "zense"),
            ]))
            .unwrap();

        assert_eq!(config.controller.host, "10.0.0.9");
        assert_eq!(config.controller.port, 4000);
        assert_eq!(config.mqtt.username, "bridge");
        assert_eq!(config.topics.base, "zense");
        assert!(config.debug_mqtt);
        assert_eq!(
            config.session_settings().unwrap().io_timeout,
            Duration::from_millis(2500)
        );
        assert_eq!(
            config.scheduler_settings().unwrap().command_gap,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn debug_flag_accepts_only_truthy_words() {
        let mut config = BridgeConfig::default();
        config.apply_env(env(&[("DEBUG_MQTT", "off")])).unwrap();
        assert!(!config.debug_mqtt);
        config.apply_env(env(&[("DEBUG_MQTT", "1")])).unwrap();
        assert!(config.debug_mqtt);
    }

    #[test]
    fn unparseable_environment_is_an_error() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_env(env(&[("MQTT_PORT", "eighteen")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "MQTT_PORT", .. }));
    }

    #[test]
    fn negative_durations_are_rejected() {
        let mut config = BridgeConfig::default();
        config.apply_env(env(&[("CMD_GAP_SEC", "-1")])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration { key: "CMD_GAP_SEC", .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("zense-bridge-test-missing.toml");
        let config = BridgeConfig::from_file(&path).await.unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let path = std::env::temp_dir()
            .join(format!("zense-bridge-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            concat!(
                "debug_mqtt = true\n",
                "[controller]\nhost = \"zense.lan\"\n",
                "[timing]\nstate_poll_secs = 30\n",
            ),
        )
        .unwrap();

        let config = BridgeConfig::from_file(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(config.debug_mqtt);
        assert_eq!(config.controller.host, "zense.lan");
        assert_eq!(config.controller.port, 10001);
        assert_eq!(config.timing.state_poll_secs, 30);
        assert_eq!(config.timing.debounce_ms, 120);
        assert_eq!(config.mqtt, MqttConfig::default());
    }

    #[tokio::test]
    async fn malformed_file_is_a_parse_error() {
        let path = std::env::temp_dir()
            .join(format!("zense-bridge-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[controller\nport = 1").unwrap();

        let result = BridgeConfig::from_file(&path).await;
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
