//! # Bridge Core
//!
//! Everything between the control bus and the controller session.
//!
//! ## Why This Module Exists
//!
//! Clients fire commands far faster than the controller can take them: a
//! dimmer slider emits a dozen levels per second, and a scene touches many
//! devices at once. The controller, on the other hand, accepts exactly one
//! command at a time over a single session and misbehaves when commands
//! arrive without a gap. This module sits in between:
//!
//! - intents are queued without ever blocking the producer
//! - a burst is collapsed into at most one operation per device
//! - operations are executed one by one with a fixed pacing gap
//! - only confirmed outcomes are reported back as state
//!
//! ## Module Architecture
//!
//! ```text
//! bridge/
//! ├── intent.rs      - Intent values, normalization and the ingress sender
//! ├── aggregator.rs  - Per-device precedence merge into a flush plan
//! ├── publisher.rs   - State sink trait and duplicate suppression
//! └── scheduler.rs   - Debounce / execute cycle and the idle poller
//! ```

pub mod aggregator;
pub mod intent;
pub mod publisher;
pub mod scheduler;

pub use intent::{Intent, IntentKind, IntentSender};
pub use publisher::{StatePublisher, StateSink};
pub use scheduler::{spawn_idle_poller, SchedulerHandle, SchedulerSettings};
