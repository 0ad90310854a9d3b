//! # MQTT Integration Module
//!
//! Connects the bridge to the home-automation bus. Home Assistant talks to the
//! bridge exclusively through retained MQTT topics and discovery messages.
//!
//! ## Why This Module Exists
//!
//! The bridge core only deals in intents and confirmed levels. This module is
//! the translation layer around it:
//! - inbound command topics become intents on the scheduler's ingress
//! - confirmed levels and discovered devices become retained messages
//! - bridge availability is announced on connect and withdrawn on exit
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker and topic configuration
//! ├── topics.rs           - Topic layout and discovery payloads
//! ├── message_manager.rs  - Inbound decoding and the ON-after-level gate
//! └── mqtt_handler.rs     - rumqttc event loop and the state sink
//! ```
//!
//! ## Reconnects
//!
//! rumqttc re-establishes the connection on the next poll after an error.
//! Every `ConnAck` re-subscribes, re-announces `online` and requests a fresh
//! discovery, so a broker restart needs no special handling.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod topics;

pub use config::{MqttConfig, TopicConfig};
pub use message_manager::MsgManager;
pub use mqtt_handler::{MqttHandler, MqttStateSink};
pub use topics::TopicScheme;
