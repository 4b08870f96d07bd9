use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WeatherError;

/// One stored observation. Unique on `(city, observed_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub city: String,
    /// Whatever the provider reports: ISO code for OpenWeather, full name for WeatherAPI.
    pub country: String,
    pub temperature_c: f64,
    pub rain_present: bool,
    pub description: String,
    pub humidity_pct: Option<u8>,
    pub pressure_hpa: Option<u32>,
    pub observed_at: DateTime<Utc>,
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WeatherError> {
        if start >= end {
            return Err(WeatherError::InvalidParameter {
                name: "date range",
                value: format!("{start} .. {end}"),
                expected: "a start strictly before the end",
            });
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TempExtreme {
    #[default]
    Max,
    Min,
}

impl TempExtreme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempExtreme::Max => "max",
            TempExtreme::Min => "min",
        }
    }
}

impl fmt::Display for TempExtreme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TempExtreme {
    type Err = WeatherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "max" => Ok(TempExtreme::Max),
            "min" => Ok(TempExtreme::Min),
            _ => Err(WeatherError::InvalidParameter {
                name: "temp_extreme",
                value: value.to_string(),
                expected: "max, min",
            }),
        }
    }
}

/// How rain hours are counted: one total across every location, or one count per city.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RainScope {
    #[default]
    Total,
    PerLocation,
}

impl RainScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RainScope::Total => "total",
            RainScope::PerLocation => "per_location",
        }
    }
}

impl fmt::Display for RainScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RainScope {
    type Err = WeatherError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "total" => Ok(RainScope::Total),
            "per_location" => Ok(RainScope::PerLocation),
            _ => Err(WeatherError::InvalidParameter {
                name: "rain_scope",
                value: value.to_string(),
                expected: "total, per_location",
            }),
        }
    }
}

/// Column a grouped report aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Country,
    City,
}

impl GroupBy {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            GroupBy::Country => "country",
            GroupBy::City => "city",
        }
    }
}

/// Report type together with the parameters only it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Countries,
    Cities,
    Extremes { extreme: TempExtreme },
    Rain { scope: RainScope },
}

impl Report {
    pub fn name(&self) -> &'static str {
        match self {
            Report::Countries => "countries",
            Report::Cities => "cities",
            Report::Extremes { .. } => "extremes",
            Report::Rain { .. } => "rain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRequest {
    pub report: Report,
    pub range: DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub name: String,
    pub avg_temp: f64,
    pub max_temp: f64,
    pub min_temp: f64,
    /// Sample standard deviation; `None` when the group has a single reading.
    pub stddev_temp: Option<f64>,
    pub samples: i64,
    pub rain_hours: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityExtreme {
    pub city: String,
    pub country: String,
    pub temperature_c: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LocationRainHours {
    pub city: String,
    pub hours: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RainHours {
    Total(i64),
    PerLocation(Vec<LocationRainHours>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ReportResult {
    Groups {
        by: GroupBy,
        rows: Vec<GroupStats>,
    },
    Extremes {
        extreme: TempExtreme,
        rows: Vec<CityExtreme>,
    },
    RainHours(RainHours),
}
