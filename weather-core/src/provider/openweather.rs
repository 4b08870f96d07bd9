use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::{WeatherError, WeatherRecord};

use super::{ProviderId, WeatherProvider, http_client, truncate_body, unix_to_utc};

const CURRENT_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    endpoint: String,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, WeatherError> {
        Ok(Self {
            api_key,
            http: http_client(timeout)?,
            endpoint: CURRENT_URL.to_string(),
        })
    }

    /// Send requests to another current-weather endpoint, e.g. a regional mirror.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn fetch_current(&self, city: &str) -> Result<WeatherRecord> {
        let res = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", city),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .context("Failed to send request to OpenWeather (current weather)")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("Failed to read OpenWeather current response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "OpenWeather current request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        parse_current(city, &body)
    }
}

/// Map an OpenWeather current-weather body to a record for `city`.
///
/// The record keeps the requested city name rather than the provider's
/// `name`, so repeated ingestions of the same location share one key.
pub(crate) fn parse_current(city: &str, body: &str) -> Result<WeatherRecord> {
    let parsed: OwCurrentResponse =
        serde_json::from_str(body).context("Failed to parse OpenWeather current JSON")?;

    let observed_at = unix_to_utc(parsed.dt).unwrap_or_else(Utc::now);

    let description = parsed
        .weather
        .first()
        .map(|w| w.description.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    let rain_last_hour = parsed.rain.and_then(|r| r.one_hour).unwrap_or(0.0);

    Ok(WeatherRecord {
        city: city.to_string(),
        country: parsed.sys.country,
        temperature_c: parsed.main.temp,
        rain_present: rain_last_hour > 0.0,
        description,
        humidity_pct: parsed.main.humidity,
        pressure_hpa: parsed.main.pressure,
        observed_at,
    })
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    humidity: Option<u8>,
    pressure: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwRain {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwSys {
    country: String,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    rain: Option<OwRain>,
    sys: OwSys,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    async fn current(&self, location: &str) -> Result<WeatherRecord, WeatherError> {
        self.fetch_current(location)
            .await
            .map_err(|e| WeatherError::Fetch {
                location: location.to_string(),
                message: format!("{e:#}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RAINY: &str = r#"{
        "coord": {"lon": 2.35, "lat": 48.85},
        "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
        "main": {"temp": 12.4, "feels_like": 11.8, "pressure": 1008, "humidity": 87},
        "rain": {"1h": 0.35},
        "dt": 1718179200,
        "sys": {"country": "FR", "sunrise": 1718164000, "sunset": 1718222000},
        "name": "Paris"
    }"#;

    #[test]
    fn parses_rainy_response() {
        let record = parse_current("Paris", RAINY).expect("valid body");

        assert_eq!(record.city, "Paris");
        assert_eq!(record.country, "FR");
        assert_eq!(record.temperature_c, 12.4);
        assert!(record.rain_present);
        assert_eq!(record.description, "light rain");
        assert_eq!(record.humidity_pct, Some(87));
        assert_eq!(record.pressure_hpa, Some(1008));
        assert_eq!(record.observed_at, Utc.timestamp_opt(1718179200, 0).unwrap());
    }

    #[test]
    fn missing_rain_block_means_no_rain() {
        let body = r#"{
            "weather": [],
            "main": {"temp": -3.0},
            "dt": 1718179200,
            "sys": {"country": "UA"},
            "name": "Kyiv"
        }"#;
        let record = parse_current("Kyiv", body).expect("valid body");

        assert!(!record.rain_present);
        assert_eq!(record.description, "Unknown");
        assert_eq!(record.humidity_pct, None);
    }

    /// Answers exactly one request with `status` and `body`, returning the base URL.
    fn respond_once(status: &'static str, body: &'static str) -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        format!("http://{addr}/data/2.5/weather")
    }

    #[tokio::test]
    async fn rejected_request_is_a_fetch_error() {
        let endpoint = respond_once("401 Unauthorized", r#"{"cod":401,"message":"Invalid API key"}"#);
        let provider = OpenWeatherProvider::new("bad-key".into(), Duration::from_secs(5))
            .unwrap()
            .with_endpoint(endpoint);

        let err = provider.current("Paris").await.unwrap_err();

        match err {
            WeatherError::Fetch { location, message } => {
                assert_eq!(location, "Paris");
                assert!(message.contains("401"), "{message}");
                assert!(message.contains("Invalid API key"), "{message}");
            }
            other => panic!("expected a fetch error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_body_is_an_error() {
        let err = parse_current("Paris", "{\"cod\": 401}").unwrap_err();
        assert!(err.to_string().contains("Failed to parse OpenWeather current JSON"));
    }
}
