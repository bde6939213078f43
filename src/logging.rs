use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Handle onto the installed log filter so the `debug` command can raise or
/// lower verbosity without a restart.
#[derive(Clone)]
pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogControl {
    pub fn set_debug(&self, debug: bool) {
        if let Err(e) = self.handle.reload(filter_for(debug)) {
            warn!("could not switch log level: {e}");
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the `debug` setting
/// at start-up; runtime toggles replace it.
pub fn init(debug: bool) -> anyhow::Result<LogControl> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(debug));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .try_init()?;
    Ok(LogControl { handle })
}

fn filter_for(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::new(format!("{level},rumqttc=warn"))
}
