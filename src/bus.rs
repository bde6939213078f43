use crate::bridge::{Bridge, BusPublisher};
use crate::config::MqttSettings;
use crate::error::BusError;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

const REQUEST_CAPACITY: usize = 32;

/// Publishes through the request queue of a connected client. Queued requests
/// go out the next time the event loop is polled.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl BusPublisher for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: String) -> Result<(), BusError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BusError::Publish(format!("{topic}: {e}")))
    }
}

/// Owns the broker connection lifecycle: connect, subscribe, process messages
/// and timers, and start over whenever the connection is lost.
pub struct BusLoop {
    options: MqttOptions,
    broker: String,
    subscriptions: Vec<String>,
    reconnect_delay: Duration,
    tick: Duration,
}

impl BusLoop {
    pub fn new(settings: &MqttSettings, subscriptions: Vec<String>) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        options.set_clean_session(true);
        match (&settings.username, &settings.password) {
            (Some(username), password) => {
                options.set_credentials(username, password.as_deref().unwrap_or_default());
            }
            (None, Some(_)) => {
                warn!("MQTT password set without a username, connecting anonymously");
            }
            (None, None) => {}
        }
        Self {
            options,
            broker: format!("{}:{}", settings.host, settings.port),
            subscriptions,
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
            tick: Duration::from_millis(settings.tick_millis),
        }
    }

    /// Runs forever. Connect failures back off for the configured delay;
    /// a dropped session reconnects straight away.
    pub async fn run(&self, bridge: &mut Bridge) {
        loop {
            match self.connect().await {
                Ok((mut publisher, mut eventloop)) => {
                    info!("Geotogether-domo connected to queue: {}", self.broker);
                    let e = self.process(bridge, &mut publisher, &mut eventloop).await;
                    info!("Geotogether-domo lost MQTT connection - retrying ({e})");
                    if let Err(e) = publisher.client.try_disconnect() {
                        warn!("could not close MQTT client cleanly: {e}");
                    }
                }
                Err(e) => {
                    error!(
                        "Geotogether-domo cannot connect to MQTT - retrying in {} sec ({e})",
                        self.reconnect_delay.as_secs()
                    );
                    sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    /// Opens a fresh client, queues the subscriptions and waits for the broker
    /// to accept the connection.
    pub(crate) async fn connect(&self) -> Result<(MqttPublisher, EventLoop), BusError> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        for topic in &self.subscriptions {
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .map_err(|e| BusError::Connect(e.to_string()))?;
        }

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BusError::Connect(format!("{:?}", ack.code)));
                    }
                    return Ok((MqttPublisher { client }, eventloop));
                }
                Ok(_) => continue,
                Err(e) => return Err(BusError::Connect(e.to_string())),
            }
        }
    }

    /// One iteration per inbound event or tick: hand any message to the bridge,
    /// then let it check its timers. Returns only when the connection fails.
    async fn process(
        &self,
        bridge: &mut Bridge,
        publisher: &mut MqttPublisher,
        eventloop: &mut EventLoop,
    ) -> BusError {
        loop {
            match timeout(self.tick, eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::Publish(message)))) => {
                    let payload = String::from_utf8_lossy(&message.payload);
                    bridge
                        .handle_message(&message.topic, &payload, message.retain, publisher)
                        .await;
                }
                Ok(Ok(_)) | Err(_) => {}
                Ok(Err(e)) => return BusError::Disconnect(e.to_string()),
            }
            bridge.run_timers(Instant::now(), publisher).await;
        }
    }
}
