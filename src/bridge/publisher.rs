//! Outward state notifications.
//!
//! The scheduler reports confirmed outcomes to a [`StatePublisher`], which
//! drops repeats and forwards the rest to a [`StateSink`] (the MQTT adapter
//! in production).

use std::collections::HashMap;
use tracing::debug;

use super::intent::clamp_level;
use crate::zense::DeviceId;

/// Destination for state and discovery notifications.
///
/// Must be `Send + Sync`: the scheduler task holds it across awaits.
pub trait StateSink: Send + Sync {
    fn publish_state(&mut self, device: DeviceId, level: u8);

    fn publish_discovery(&mut self, device: DeviceId, name: &str);
}

pub struct StatePublisher {
    sink: Box<dyn StateSink>,
    last_levels: HashMap<DeviceId, u8>,
}

impl StatePublisher {
    pub fn new(sink: Box<dyn StateSink>) -> Self {
        Self {
            sink,
            last_levels: HashMap::new(),
        }
    }

    /// Publishes a device level unless it equals the last one published for
    /// that device. Returns whether anything was sent.
    pub fn publish_state(&mut self, device: DeviceId, level: i64) -> bool {
        let level = clamp_level(level);
        if self.last_levels.get(&device) == Some(&level) {
            debug!("Device {} already published at {}", device, level);
            return false;
        }
        self.last_levels.insert(device, level);
        self.sink.publish_state(device, level);
        true
    }

    pub fn publish_discovery(&mut self, device: DeviceId, name: &str) {
        self.sink.publish_discovery(device, name);
    }

    pub fn last_level(&self, device: DeviceId) -> Option<u8> {
        self.last_levels.get(&device).copied()
    }
}
