use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single HTTP exchange with the Geotogether API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("device lookup failed: {0}")]
    DeviceLookupFailed(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no upstream session: {0}")]
    Session(#[from] AuthError),
    #[error("live data unavailable: {0}")]
    LiveUnavailable(#[source] UpstreamError),
    #[error("periodic data unavailable: {0}")]
    PeriodicUnavailable(#[source] UpstreamError),
    #[error("periodic data has no electricity total")]
    NoElectricityTotal,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("cannot connect to MQTT broker: {0}")]
    Connect(String),
    #[error("MQTT connection dropped: {0}")]
    Disconnect(String),
    #[error("MQTT publish failed: {0}")]
    Publish(String),
}
