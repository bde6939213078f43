use crate::command::Command;
use crate::config::{DomoticzSettings, RuntimeConfig, Settings, TopicSettings};
use crate::error::BusError;
use crate::geo_session::GeoSession;
use crate::logging::LogControl;
use crate::power_split::derive_readings;
use crate::scheduler::PollScheduler;
use chrono::Utc;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Outbound side of the message bus as seen by the bridge.
pub trait BusPublisher {
    fn publish(&mut self, topic: &str, payload: String) -> Result<(), BusError>;
}

/// Last value seen on the voltage topic and when it arrived (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageSample {
    pub volts: f64,
    pub received_at: i64,
}

/// Outcome of a closed telemetry window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub total_import_wh: f64,
    pub alarm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Unconnected,
}

/// JSON replies on the status topic, tagged with the command they answer.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
enum Reply<'a> {
    Status {
        now: i64,
        #[serde(rename = "deviceId")]
        device_id: Option<&'a str>,
        #[serde(rename = "systemName")]
        system_name: Option<&'a str>,
        nodata: bool,
        next_periodic_sec: u64,
        next_telemetry_sec: u64,
        voltage: Option<f64>,
        voltage_at: Option<i64>,
    },
    Reset {
        state: ConnectionState,
    },
    Config {
        debug: bool,
        poll_sec: u64,
        periodic_sec: u64,
        telemetry_sec: u64,
        geourl: &'a str,
        idx_import: u32,
        idx_export: u32,
        power_offset: i64,
    },
    Debug {
        debug: bool,
    },
    Offset {
        power_offset: i64,
    },
    GetLive {
        state: &'static str,
    },
    GetPeriodic {
        state: &'static str,
    },
}

/// Command dispatcher and the one piece of mutable state the process has:
/// upstream session, cached import total, timers and runtime settings.
pub struct Bridge {
    geo: GeoSession,
    scheduler: PollScheduler,
    runtime: RuntimeConfig,
    topics: TopicSettings,
    domoticz: DomoticzSettings,
    total_import_wh: f64,
    voltage: Option<VoltageSample>,
    log_control: Option<LogControl>,
}

impl Bridge {
    pub fn new(geo: GeoSession, settings: &Settings, start: Instant) -> Self {
        let runtime = RuntimeConfig::from(settings);
        let scheduler = PollScheduler::new(
            runtime.poll_interval,
            runtime.periodic_interval,
            runtime.telemetry_interval,
            start,
        );
        Self {
            geo,
            scheduler,
            runtime,
            topics: settings.topics.clone(),
            domoticz: settings.domoticz.clone(),
            total_import_wh: 0.0,
            voltage: None,
            log_control: None,
        }
    }

    pub fn with_log_control(mut self, log_control: LogControl) -> Self {
        self.log_control = Some(log_control);
        self
    }

    /// Topics the bus loop must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.topics.command.clone(), self.topics.voltage.clone()]
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn total_import_wh(&self) -> f64 {
        self.total_import_wh
    }

    pub fn voltage(&self) -> Option<VoltageSample> {
        self.voltage
    }

    pub fn geo(&self) -> &GeoSession {
        &self.geo
    }

    /// Entry point for every inbound bus message. Retained messages are stale
    /// replays and are dropped.
    pub async fn handle_message(
        &mut self,
        topic: &str,
        payload: &str,
        retain: bool,
        out: &mut impl BusPublisher,
    ) {
        if retain {
            debug!("skipping retained message on {topic}");
            return;
        }
        debug!("msg from: {topic}");
        if topic == self.topics.command {
            debug!("cmd: {payload}");
            self.dispatch(Command::parse(payload), Instant::now(), out)
                .await;
        } else if topic == self.topics.voltage {
            self.record_voltage(payload);
        } else {
            debug!("unexpected message topic: {topic}");
        }
    }

    pub async fn dispatch(&mut self, command: Command, now: Instant, out: &mut impl BusPublisher) {
        match command {
            Command::Status => {
                let reply = self.status_reply(now);
                publish_json(out, &self.topics.status, &reply);
            }
            Command::Reset => {
                let state = match self.geo.reconnect().await {
                    Ok(_) => ConnectionState::Connected,
                    Err(_) => ConnectionState::Unconnected,
                };
                publish_json(out, &self.topics.status, &Reply::Reset { state });
            }
            Command::Config => {
                let reply = self.config_reply();
                publish_json(out, &self.topics.status, &reply);
            }
            Command::Debug => {
                self.runtime.debug = !self.runtime.debug;
                if let Some(log_control) = &self.log_control {
                    log_control.set_debug(self.runtime.debug);
                }
                info!("debug logging {}", if self.runtime.debug { "on" } else { "off" });
                let reply = Reply::Debug {
                    debug: self.runtime.debug,
                };
                publish_json(out, &self.topics.status, &reply);
            }
            Command::Offset(power_offset) => {
                self.runtime.power_offset = power_offset;
                info!("simple power offset set to {power_offset}W");
                publish_json(out, &self.topics.status, &Reply::Offset { power_offset });
            }
            Command::GetLive => self.get_live(out).await,
            Command::GetPeriodic => self.get_periodic(out).await,
            Command::Unrecognized(payload) => {
                warn!("unrecognized command: {payload:?}");
            }
        }
    }

    /// Fires whichever timers are due: periodic first so the live publish that
    /// follows carries the freshest total, then live, then telemetry.
    pub async fn run_timers(
        &mut self,
        now: Instant,
        out: &mut impl BusPublisher,
    ) -> Option<Telemetry> {
        let due = self.scheduler.due(now);
        if due.periodic {
            debug!("Geotogether-domo poll periodic");
            self.dispatch(Command::GetPeriodic, now, out).await;
        }
        if due.live {
            debug!("Geotogether-domo poll live");
            self.dispatch(Command::GetLive, now, out).await;
        }
        if !due.telemetry {
            return None;
        }

        let telemetry = Telemetry {
            total_import_wh: self.total_import_wh,
            alarm: self.scheduler.close_window(),
        };
        info!(
            "Geotogether-domo telemetry. Total import: {}Wh",
            telemetry.total_import_wh
        );
        if telemetry.alarm {
            error!(
                "Geotogether-domo alarm: no live power data in the last {}s",
                self.runtime.telemetry_interval.as_secs()
            );
        }
        Some(telemetry)
    }

    async fn get_live(&mut self, out: &mut impl BusPublisher) {
        let reading = match self.geo.fetch_live().await {
            Ok(reading) => reading,
            Err(e) => {
                debug!("live fetch failed: {e}");
                let reply = Reply::GetLive {
                    state: "live failed",
                };
                publish_json(out, &self.topics.status, &reply);
                return;
            }
        };

        if reading.has_power_data() {
            self.scheduler.record_live_data();
        } else {
            debug!("live data carried no electricity power entry");
        }
        let derived = derive_readings(
            reading.watts_or_zero(),
            self.total_import_wh,
            self.domoticz.idx_import,
            self.domoticz.idx_export,
            self.runtime.power_offset,
        );
        publish_json(out, &self.topics.meter, &derived.import);
        publish_json(out, &self.topics.meter, &derived.export);
        publish(
            out,
            &self.topics.simple_power,
            derived.simple_power.to_string(),
        );
    }

    async fn get_periodic(&mut self, out: &mut impl BusPublisher) {
        match self.geo.fetch_periodic().await {
            Ok(reading) => {
                self.total_import_wh = reading.total_import_wh;
                debug!("total import now {}Wh", self.total_import_wh);
            }
            Err(e) => {
                debug!("periodic fetch failed: {e}");
                let reply = Reply::GetPeriodic {
                    state: "periodic failed",
                };
                publish_json(out, &self.topics.status, &reply);
            }
        }
    }

    fn record_voltage(&mut self, payload: &str) {
        match payload.trim().parse::<f64>() {
            Ok(volts) => {
                debug!("voltage {volts}V");
                self.voltage = Some(VoltageSample {
                    volts,
                    received_at: Utc::now().timestamp(),
                });
            }
            Err(_) => debug!("ignoring voltage payload {payload:?}"),
        }
    }

    fn status_reply(&self, now: Instant) -> Reply<'_> {
        let session = self.geo.session();
        Reply::Status {
            now: Utc::now().timestamp(),
            device_id: session.map(|s| s.device_id.as_str()),
            system_name: session.map(|s| s.system_name.as_str()),
            nodata: self.scheduler.no_data(),
            next_periodic_sec: self.scheduler.secs_to_next_periodic(now),
            next_telemetry_sec: self.scheduler.secs_to_next_telemetry(now),
            voltage: self.voltage.map(|v| v.volts),
            voltage_at: self.voltage.map(|v| v.received_at),
        }
    }

    fn config_reply(&self) -> Reply<'_> {
        Reply::Config {
            debug: self.runtime.debug,
            poll_sec: self.runtime.poll_interval.as_secs(),
            periodic_sec: self.runtime.periodic_interval.as_secs(),
            telemetry_sec: self.runtime.telemetry_interval.as_secs(),
            geourl: self.geo.base_url(),
            idx_import: self.domoticz.idx_import,
            idx_export: self.domoticz.idx_export,
            power_offset: self.runtime.power_offset,
        }
    }
}

fn publish_json<T: Serialize>(out: &mut impl BusPublisher, topic: &str, message: &T) {
    match serde_json::to_string(message) {
        Ok(payload) => publish(out, topic, payload),
        Err(e) => error!("cannot encode message for {topic}: {e}"),
    }
}

fn publish(out: &mut impl BusPublisher, topic: &str, payload: String) {
    debug!("send to {topic}: {payload}");
    if let Err(e) = out.publish(topic, payload) {
        warn!("{e}");
    }
}
