//! Intents: what a client asked for, already decoded and normalized.

use tokio::sync::mpsc;
use tracing::warn;

use crate::zense::protocol::BRIGHTNESS_SCALE;
use crate::zense::DeviceId;

/// Reserved device id addressing the whole fleet (discover / refresh).
pub const FLEET: DeviceId = 0;

/// Upper end of the controller's native brightness scale.
const NATIVE_SCALE: i64 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Off,
    On,
    /// Normalized level in `[0, 100]`
    Level(u8),
    Discover,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intent {
    pub device: DeviceId,
    pub kind: IntentKind,
}

impl Intent {
    pub fn off(device: DeviceId) -> Self {
        Self {
            device,
            kind: IntentKind::Off,
        }
    }

    pub fn on(device: DeviceId) -> Self {
        Self {
            device,
            kind: IntentKind::On,
        }
    }

    /// Level intent; the value is clamped to `[0, 100]`.
    pub fn level(device: DeviceId, level: i64) -> Self {
        Self {
            device,
            kind: IntentKind::Level(clamp_level(level)),
        }
    }

    pub fn discover() -> Self {
        Self {
            device: FLEET,
            kind: IntentKind::Discover,
        }
    }

    pub fn refresh() -> Self {
        Self {
            device: FLEET,
            kind: IntentKind::Refresh,
        }
    }
}

/// Clamps any integer into the normalized `[0, 100]` scale.
pub fn clamp_level(value: i64) -> u8 {
    u8::try_from(value.clamp(0, i64::from(BRIGHTNESS_SCALE))).unwrap_or(BRIGHTNESS_SCALE)
}

/// Converts a raw client brightness into the normalized scale.
///
/// Values already in `[0, 100]` pass through. Larger values are taken to be
/// on the native `0..=255` scale (capped at 255) and rescaled, rounding to
/// the nearest integer. Negative input becomes 0.
pub fn normalize_brightness(raw: i64) -> u8 {
    if raw <= i64::from(BRIGHTNESS_SCALE) {
        return clamp_level(raw);
    }
    let native = raw.min(NATIVE_SCALE);
    // Integer form of round(native / 255 * 100), halves rounded up.
    let scaled = (native * i64::from(BRIGHTNESS_SCALE) * 2 + NATIVE_SCALE) / (NATIVE_SCALE * 2);
    clamp_level(scaled)
}

/// Producer side of the scheduler's ingress queue.
///
/// Unbounded; cloned freely by every intent source.
#[derive(Clone, Debug)]
pub struct IntentSender {
    tx: mpsc::UnboundedSender<Intent>,
}

impl IntentSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Intent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues an intent. Returns `false` once the scheduler is gone.
    pub fn submit(&self, intent: Intent) -> bool {
        match self.tx.send(intent) {
            Ok(()) => true,
            Err(e) => {
                warn!("Scheduler stopped, dropping intent {:?}", e.0);
                false
            }
        }
    }
}
