use ::config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_VAR: &str = "GEODOMO_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const ENV_PREFIX: &str = "GEODOMO";

/// Start-up settings: compiled defaults, overlaid by an optional TOML file,
/// overlaid by `GEODOMO_*` environment variables (`__` separates sections).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub geo: GeoSettings,
    pub mqtt: MqttSettings,
    pub topics: TopicSettings,
    pub domoticz: DomoticzSettings,
    pub schedule: ScheduleSettings,
    pub power_offset: i64,
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl Default for GeoSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.geotogether.com/".into(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
    /// Upper bound on how long the loop waits for bus traffic before checking timers.
    pub tick_millis: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "geotogether-subscriber".into(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            reconnect_delay_secs: 10,
            tick_millis: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSettings {
    pub command: String,
    pub status: String,
    pub meter: String,
    pub simple_power: String,
    pub voltage: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            command: "geotogether-domo/cmd".into(),
            status: "geotogether-domo/status".into(),
            meter: "domoticz/in".into(),
            simple_power: "geotogether-domo/power".into(),
            voltage: "geotogether-domo/voltage".into(),
        }
    }
}

/// Domoticz device indices for the two electricity meters we update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomoticzSettings {
    pub idx_import: u32,
    pub idx_export: u32,
}

impl Default for DomoticzSettings {
    fn default() -> Self {
        Self {
            idx_import: 2599,
            idx_export: 2600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub poll_secs: u64,
    pub periodic_secs: u64,
    pub telemetry_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            poll_secs: 20,
            periodic_secs: 300,
            telemetry_secs: 600,
        }
    }
}

impl Settings {
    /// Loads settings from the file named by `GEODOMO_CONFIG` (or `config.toml`)
    /// plus environment overrides. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::build(
            File::with_name(&path).required(false),
            Some(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
        )
    }

    /// Parses settings from TOML text layered over the defaults, ignoring the environment.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::build(File::from_str(text, FileFormat::Toml), None)
    }

    fn build<F>(file: F, env: Option<Environment>) -> Result<Self, ConfigError>
    where
        F: ::config::Source + Send + Sync + 'static,
    {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file);
        if let Some(env) = env {
            builder = builder.add_source(env);
        }
        builder.build()?.try_deserialize()
    }
}

/// The tunables the bridge consults while running. `power_offset` and `debug`
/// change at runtime through control commands.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub poll_interval: Duration,
    pub periodic_interval: Duration,
    pub telemetry_interval: Duration,
    pub power_offset: i64,
    pub debug: bool,
}

impl From<&Settings> for RuntimeConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.schedule.poll_secs),
            periodic_interval: Duration::from_secs(settings.schedule.periodic_secs),
            telemetry_interval: Duration::from_secs(settings.schedule.telemetry_secs),
            power_offset: settings.power_offset,
            debug: settings.debug,
        }
    }
}
