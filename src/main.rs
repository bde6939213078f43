use geotogether_domo_bridge::{logging, Bridge, BusLoop, GeoSession, Settings};
use std::time::Instant;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    let log_control = logging::init(settings.debug)?;

    info!("Geotogether-domo MQTT bridge started");

    let geo = GeoSession::new(&settings.geo)?;
    let mut bridge = Bridge::new(geo, &settings, Instant::now()).with_log_control(log_control);
    let bus = BusLoop::new(&settings.mqtt, bridge.subscriptions());

    // Never returns: every failure is retried
    bus.run(&mut bridge).await;

    Ok(())
}
