use crate::error::{FetchError, UpstreamError};
use crate::geo_session::{send_json, GeoSession};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use tracing::{debug, warn};

pub const LIVE_DATA_PATH: &str = "api/userapi/system/smets2-live-data/";
pub const PERIODIC_DATA_PATH: &str = "api/userapi/system/smets2-periodic-data/";
const ELECTRICITY: &str = "ELECTRICITY";

/// Instantaneous electricity demand. `None` when the meter reported no power
/// entry for electricity, which is not the same thing as a zero reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveReading {
    pub electricity_watts: Option<i64>,
}

impl LiveReading {
    pub fn has_power_data(&self) -> bool {
        self.electricity_watts.is_some()
    }

    pub fn watts_or_zero(&self) -> i64 {
        self.electricity_watts.unwrap_or(0)
    }
}

/// Cumulative electricity import, in Wh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicReading {
    pub total_import_wh: f64,
}

/// kWh to Wh, rounded to the mWh so the published figure carries no float noise.
pub fn kwh_to_wh(kwh: f64) -> f64 {
    (kwh * 1_000_000.0).round() / 1000.0
}

impl GeoSession {
    /// Reads live power. Any failed request drops the session.
    pub async fn fetch_live(&mut self) -> Result<LiveReading, FetchError> {
        let live: LiveDataResponse = self
            .authorized_get(LIVE_DATA_PATH)
            .await?
            .map_err(|e| {
                warn!("Geotogether-domo livedata failed: {e}");
                FetchError::LiveUnavailable(e)
            })?;
        Ok(live.into())
    }

    /// Reads cumulative energy and converts the electricity total from kWh to Wh.
    pub async fn fetch_periodic(&mut self) -> Result<PeriodicReading, FetchError> {
        let periodic: PeriodicDataResponse = self
            .authorized_get(PERIODIC_DATA_PATH)
            .await?
            .map_err(|e| {
                warn!("Geotogether-domo periodic data failed: {e}");
                FetchError::PeriodicUnavailable(e)
            })?;
        periodic
            .electricity_total_kwh()
            .map(|kwh| PeriodicReading {
                total_import_wh: kwh_to_wh(kwh),
            })
            .ok_or_else(|| {
                warn!("Geotogether-domo periodic data has no electricity total");
                FetchError::NoElectricityTotal
            })
    }

    /// GETs `path` + device id with the bearer token. The outer error means no
    /// session could be established; the inner one is a failed request, after
    /// which the session has already been invalidated.
    async fn authorized_get<T: DeserializeOwned>(
        &mut self,
        path: &str,
    ) -> Result<Result<T, UpstreamError>, FetchError> {
        let session = self.ensure_session().await?;
        let (token, device_id) = (session.token.clone(), session.device_id.clone());
        let url = self.url(&format!("{path}{device_id}"));

        debug!("call Geo API. url: {url}");
        let result = send_json(self.client().get(&url).bearer_auth(token)).await;
        if result.is_err() {
            self.invalidate();
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LiveDataResponse {
    power: Option<Vec<PowerEntry>>,
}

#[derive(Debug, Deserialize)]
struct PowerEntry {
    #[serde(rename = "type")]
    commodity: String,
    watts: i64,
}

impl From<LiveDataResponse> for LiveReading {
    fn from(live: LiveDataResponse) -> Self {
        let electricity_watts = live
            .power
            .unwrap_or_default()
            .into_iter()
            .find(|entry| entry.commodity == ELECTRICITY)
            .map(|entry| entry.watts);
        Self { electricity_watts }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PeriodicDataResponse {
    total_consumption_list: Option<Vec<TotalConsumption>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TotalConsumption {
    commodity_type: String,
    total_consumption: Option<f64>,
}

impl PeriodicDataResponse {
    fn electricity_total_kwh(&self) -> Option<f64> {
        self.total_consumption_list
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|entry| entry.commodity_type == ELECTRICITY)
            .and_then(|entry| entry.total_consumption)
    }
}

#[cfg(test)]
pub(crate) mod mock_readings {
    use mockito::{Mock, ServerGuard};

    pub fn live_body(watts: i64) -> String {
        format!(
            r#"{{
                "latestUtc": 1633000000,
                "id": "device-abc",
                "power": [
                    {{ "type": "ELECTRICITY", "watts": {watts}, "valueAvailable": true }},
                    {{ "type": "GAS_ENERGY", "watts": 0, "valueAvailable": true }}
                ],
                "powerTimestamp": 1633000000
            }}"#
        )
    }

    pub fn periodic_body(kwh: f64) -> String {
        format!(
            r#"{{
                "latestUtc": 1633000000,
                "id": "device-abc",
                "totalConsumptionList": [
                    {{ "commodityType": "GAS_ENERGY", "readingTime": 1633000000, "totalConsumption": 99.0, "valueAvailable": true }},
                    {{ "commodityType": "ELECTRICITY", "readingTime": 1633000000, "totalConsumption": {kwh}, "valueAvailable": true }}
                ]
            }}"#
        )
    }

    pub async fn mock_live(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
        server
            .mock("GET", "/api/userapi/system/smets2-live-data/device-abc")
            .match_header("authorization", "Bearer token-123")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    pub async fn mock_periodic(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
        server
            .mock("GET", "/api/userapi/system/smets2-periodic-data/device-abc")
            .match_header("authorization", "Bearer token-123")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }
}
