//! Geotogether to Domoticz MQTT bridge
//!
//! This library polls the Geotogether smart-meter cloud API and republishes
//! live power and cumulative energy as domoticz meter updates over MQTT, while
//! answering control commands on a command topic.

pub mod bridge;
pub mod bus;
pub mod command;
pub mod config;
pub mod error;
pub mod geo_readings;
pub mod geo_session;
pub mod logging;
pub mod power_split;
pub mod scheduler;

// Re-export commonly used types for easier access
pub use bridge::{Bridge, BusPublisher};
pub use bus::BusLoop;
pub use command::Command;
pub use config::Settings;
pub use geo_session::GeoSession;
