//! Bridge between a Zense home-lighting controller and an MQTT bus.

pub mod bridge;
pub mod config;
pub mod mqtt;
pub mod zense;
