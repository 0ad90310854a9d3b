//! # Command Aggregator
//!
//! Collapses a burst of intents into at most one directive per device.
//!
//! ## Precedence
//!
//! | incoming   | effect on the device's pending state                     |
//! |------------|----------------------------------------------------------|
//! | `Off`      | off, clears on and level                                 |
//! | `On`       | on, only if neither off nor a level is already pending   |
//! | `Level(0)` | same as `Off`                                            |
//! | `Level(v)` | level = v, clears on and off                             |
//!
//! The controller only exposes absolute operations, so the last directive in
//! a window is all that matters; two partial directives are never combined.
//!
//! The fleet sentinel keeps two flags of its own: discover requested and
//! refresh requested.

use std::collections::BTreeMap;
use tracing::debug;

use super::intent::{Intent, IntentKind, FLEET};
use crate::zense::DeviceId;

/// Per-device intent accumulated since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingState {
    pub off: bool,
    pub on: bool,
    pub level: Option<u8>,
}

impl PendingState {
    fn apply(&mut self, kind: IntentKind) {
        match kind {
            IntentKind::Off | IntentKind::Level(0) => {
                self.off = true;
                self.on = false;
                self.level = None;
            }
            IntentKind::On => {
                if !self.off && self.level.is_none() {
                    self.on = true;
                }
            }
            IntentKind::Level(level) => {
                self.level = Some(level);
                self.on = false;
                self.off = false;
            }
            IntentKind::Discover | IntentKind::Refresh => {}
        }
    }

    /// The single operation this state resolves to, if any.
    pub fn directive(&self) -> Option<Directive> {
        if self.off {
            Some(Directive::Off)
        } else if let Some(level) = self.level {
            Some(Directive::Fade(level))
        } else if self.on {
            Some(Directive::On)
        } else {
            None
        }
    }
}

/// One controller operation for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Off,
    Fade(u8),
    On,
}

/// Everything a flush has to execute, taken out of the pending map in one go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushPlan {
    pub discover: bool,
    pub refresh: bool,
    pub directives: Vec<(DeviceId, Directive)>,
}

impl FlushPlan {
    pub fn is_empty(&self) -> bool {
        !self.discover && !self.refresh && self.directives.is_empty()
    }
}

/// Pending state of every device touched since the last flush.
///
/// Iteration is ordered by device id so a flush is deterministic.
#[derive(Debug, Default)]
pub struct PendingMap {
    entries: BTreeMap<DeviceId, PendingState>,
}

impl PendingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, intent: Intent) {
        match intent.kind {
            IntentKind::Discover => self.entries.entry(FLEET).or_default().on = true,
            IntentKind::Refresh => self.entries.entry(FLEET).or_default().off = true,
            kind if intent.device == FLEET => {
                debug!("Ignoring {:?} addressed to the fleet sentinel", kind);
            }
            kind => self.entries.entry(intent.device).or_default().apply(kind),
        }
    }

    pub fn get(&self, device: DeviceId) -> Option<&PendingState> {
        self.entries.get(&device)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshots every pending state into a plan and clears the map.
    pub fn take_plan(&mut self) -> FlushPlan {
        let entries = std::mem::take(&mut self.entries);
        let mut plan = FlushPlan::default();
        for (device, state) in entries {
            if device == FLEET {
                plan.discover = state.on;
                plan.refresh = state.off;
            } else if let Some(directive) = state.directive() {
                plan.directives.push((device, directive));
            }
        }
        plan
    }
}
