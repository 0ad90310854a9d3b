//! Inbound message decoding and routing into the scheduler's ingress.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::topics::{DeviceTopic, TopicScheme, HA_STATUS_TOPIC, PAYLOAD_ONLINE};
use crate::bridge::intent::{normalize_brightness, Intent, IntentKind, IntentSender};
use crate::zense::DeviceId;

/// What an inbound message asks the bridge to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Home Assistant came (back) online and wants discovery again
    BusOnline,
    Device(Intent),
}

/// Parses a numeric payload, rounding to the nearest integer.
///
/// Empty text, booleans and anything that is not a finite number yield `None`.
pub fn parse_numeric(payload: &str) -> Option<i64> {
    let value = payload.trim().parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round() as i64)
}

/// Decodes a single bus message. Unknown topics and malformed payloads are
/// dropped.
pub fn decode(topics: &TopicScheme, topic: &str, payload: &[u8]) -> Option<Inbound> {
    let payload = String::from_utf8_lossy(payload);
    let payload = payload.trim();

    if topic == HA_STATUS_TOPIC {
        return (payload == PAYLOAD_ONLINE).then_some(Inbound::BusOnline);
    }

    let (device, kind) = topics.parse_command(topic)?;
    let intent = match kind {
        DeviceTopic::Brightness => {
            let raw = parse_numeric(payload)?;
            Intent::level(device, i64::from(normalize_brightness(raw)))
        }
        DeviceTopic::Switch => match payload.to_ascii_uppercase().as_str() {
            "ON" => Intent::on(device),
            "OFF" => Intent::off(device),
            _ => return None,
        },
    };
    Some(Inbound::Device(intent))
}

/// Drops an On that closely follows a Level for the same device.
///
/// Dashboards send the brightness and then a redundant ON; executing that ON
/// would jump the light to full brightness.
#[derive(Debug)]
pub struct IngressGate {
    window: Duration,
    last_level: HashMap<DeviceId, Instant>,
}

impl IngressGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_level: HashMap::new(),
        }
    }

    /// Whether the intent may go on to the scheduler.
    pub fn admit(&mut self, intent: &Intent, now: Instant) -> bool {
        match intent.kind {
            IntentKind::Level(_) => {
                self.last_level.insert(intent.device, now);
                true
            }
            IntentKind::On => match self.last_level.get(&intent.device) {
                Some(at) => now.saturating_duration_since(*at) > self.window,
                None => true,
            },
            _ => true,
        }
    }
}

pub struct MsgManager {
    topics: TopicScheme,
    gate: IngressGate,
    intents: IntentSender,
    trace: bool,
}

impl MsgManager {
    pub fn new(
        topics: TopicScheme,
        level_on_window: Duration,
        intents: IntentSender,
        trace: bool,
    ) -> Self {
        Self {
            topics,
            gate: IngressGate::new(level_on_window),
            intents,
            trace,
        }
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn request_discovery(&self) -> bool {
        self.intents.submit(Intent::discover())
    }

    /// Routes one inbound message. Returns whether an intent was queued.
    pub fn handle(&mut self, topic: &str, payload: &[u8]) -> bool {
        if self.trace {
            debug!("RX topic={} payload={:?}", topic, String::from_utf8_lossy(payload));
        }
        match decode(&self.topics, topic, payload) {
            Some(Inbound::BusOnline) => self.request_discovery(),
            Some(Inbound::Device(intent)) => {
                if !self.gate.admit(&intent, Instant::now()) {
                    debug!("Suppressing ON for device {} right after a level", intent.device);
                    return false;
                }
                self.intents.submit(intent)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::TopicConfig;
    use pretty_assertions::assert_eq;

    fn topics() -> TopicScheme {
        TopicScheme::new(TopicConfig::default())
    }

    fn decode_str(topic: &str, payload: &str) -> Option<Inbound> {
        decode(&topics(), topic, payload.as_bytes())
    }

    const SET: &str = "homeassistant/zense_bridge/zensebridge_4/set";
    const BRIGHTNESS: &str = "homeassistant/zense_bridge/zensebridge_4/brightness/set";

    #[test]
    fn numeric_payloads_are_rounded() {
        assert_eq!(parse_numeric("42"), Some(42));
        assert_eq!(parse_numeric(" 42.6 "), Some(43));
        assert_eq!(parse_numeric("-3"), Some(-3));
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("true"), None);
        assert_eq!(parse_numeric("bright"), None);
        assert_eq!(parse_numeric("inf"), None);
        assert_eq!(parse_numeric("NaN"), None);
    }

    #[test]
    fn switch_payloads_ignore_case_and_whitespace() {
        assert_eq!(decode_str(SET, " on\n"), Some(Inbound::Device(Intent::on(4))));
        assert_eq!(decode_str(SET, "Off"), Some(Inbound::Device(Intent::off(4))));
        assert_eq!(decode_str(SET, "TOGGLE"), None);
    }

    #[test]
    fn brightness_payloads_are_normalized() {
        assert_eq!(decode_str(BRIGHTNESS, "60"), Some(Inbound::Device(Intent::level(4, 60))));
        assert_eq!(decode_str(BRIGHTNESS, "255"), Some(Inbound::Device(Intent::level(4, 100))));
        assert_eq!(decode_str(BRIGHTNESS, "127.6"), Some(Inbound::Device(Intent::level(4, 50))));
        assert_eq!(decode_str(BRIGHTNESS, ""), None);
    }

    #[test]
    fn status_topic_only_reacts_to_online() {
        assert_eq!(decode_str(HA_STATUS_TOPIC, "online"), Some(Inbound::BusOnline));
        assert_eq!(decode_str(HA_STATUS_TOPIC, "offline"), None);
    }

    #[test]
    fn unknown_topics_are_dropped() {
        assert_eq!(decode_str("homeassistant/zense_bridge/availability", "online"), None);
        assert_eq!(decode_str("homeassistant/zense_bridge/zensebridge_4/state", "ON"), None);
    }

    #[test]
    fn gate_drops_on_inside_the_level_window() {
        let mut gate = IngressGate::new(Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(gate.admit(&Intent::on(4), t0));
        assert!(gate.admit(&Intent::level(4, 30), t0));
        assert!(!gate.admit(&Intent::on(4), t0 + Duration::from_millis(400)));
        assert!(!gate.admit(&Intent::on(4), t0 + Duration::from_secs(1)));
        assert!(gate.admit(&Intent::on(4), t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn gate_is_per_device_and_ignores_off() {
        let mut gate = IngressGate::new(Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(gate.admit(&Intent::level(4, 30), t0));
        assert!(gate.admit(&Intent::on(5), t0));
        assert!(gate.admit(&Intent::off(4), t0));
    }

    #[tokio::test]
    async fn manager_routes_and_gates_messages() {
        let (intents, mut rx) = IntentSender::channel();
        let mut manager = MsgManager::new(topics(), Duration::from_secs(1), intents, false);

        assert!(manager.handle(BRIGHTNESS, b"200"));
        assert!(!manager.handle(SET, b"ON"));
        assert!(manager.handle(SET, b"OFF"));
        assert!(manager.handle(HA_STATUS_TOPIC, b"online"));
        assert!(!manager.handle(SET, b"garbage"));

        assert_eq!(rx.recv().await, Some(Intent::level(4, 78)));
        assert_eq!(rx.recv().await, Some(Intent::off(4)));
        assert_eq!(rx.recv().await, Some(Intent::discover()));
        assert!(rx.try_recv().is_err());
    }
}
