use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every failure the pipeline can surface at an invocation boundary.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error(
        "Invalid date filter '{0}'. Supported filters: selected_hour, today, yesterday, current_week, last_seven_days."
    )]
    InvalidFilter(String),

    #[error("Invalid value '{value}' for {name}. Expected one of: {expected}.")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("No weather data recorded between {start} and {end}.")]
    NoData {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Failed to fetch weather for {location}: {message}")]
    Fetch { location: String, message: String },

    #[error("Database error during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeatherError {
    pub(crate) fn persistence(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| WeatherError::Persistence { operation, source }
    }

    /// Stable label used as the `kind` field in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WeatherError::InvalidFilter(_) => "invalid_filter",
            WeatherError::InvalidParameter { .. } => "invalid_parameter",
            WeatherError::NoData { .. } => "no_data",
            WeatherError::Fetch { .. } => "fetch",
            WeatherError::Persistence { .. } => "persistence",
            WeatherError::Backup(_) => "backup",
            WeatherError::Config(_) => "config",
        }
    }

    /// `NoData` is an expected outcome of a valid query, not an infrastructure fault.
    pub fn is_expected(&self) -> bool {
        matches!(self, WeatherError::NoData { .. })
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            WeatherError::InvalidFilter(_) | WeatherError::InvalidParameter { .. } => 2,
            WeatherError::NoData { .. } => 3,
            WeatherError::Fetch { .. }
            | WeatherError::Persistence { .. }
            | WeatherError::Backup(_)
            | WeatherError::Config(_) => 1,
        }
    }
}
