use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::{WeatherError, WeatherRecord};

use super::{ProviderId, WeatherProvider, http_client, truncate_body, unix_to_utc};

const CURRENT_URL: &str = "http://api.weatherapi.com/v1/current.json";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, WeatherError> {
        Ok(Self { api_key, http: http_client(timeout)? })
    }

    async fn fetch_current(&self, city: &str) -> Result<WeatherRecord> {
        let res = self
            .http
            .get(CURRENT_URL)
            .query(&[("key", self.api_key.as_str()), ("q", city)])
            .send()
            .await
            .context("Failed to send request to WeatherAPI.com (current)")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read WeatherAPI current response body")?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "WeatherAPI current request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        parse_current(city, &body)
    }
}

pub(crate) fn parse_current(city: &str, body: &str) -> Result<WeatherRecord> {
    let parsed: WaResponse =
        serde_json::from_str(body).context("Failed to parse WeatherAPI current JSON")?;

    let ts = parsed.current.last_updated_epoch.or(parsed.location.localtime_epoch);
    let observed_at = ts.and_then(unix_to_utc).unwrap_or_else(Utc::now);

    Ok(WeatherRecord {
        city: city.to_string(),
        country: parsed.location.country,
        temperature_c: parsed.current.temp_c,
        rain_present: parsed.current.precip_mm > 0.0,
        description: parsed.current.condition.text,
        humidity_pct: parsed.current.humidity,
        pressure_hpa: parsed.current.pressure_mb.map(|mb| mb.round() as u32),
        observed_at,
    })
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    country: String,
    localtime_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    humidity: Option<u8>,
    pressure_mb: Option<f64>,
    #[serde(default)]
    precip_mm: f64,
    condition: WaCondition,
    last_updated_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    async fn current(&self, location: &str) -> Result<WeatherRecord, WeatherError> {
        self.fetch_current(location).await.map_err(|e| WeatherError::Fetch {
            location: location.to_string(),
            message: format!("{e:#}"),
        })
    }
}
