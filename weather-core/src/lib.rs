//! Core library for the `weather` statistics pipeline.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over weather providers
//! - Persistence of observations and the aggregate queries behind reports
//! - Date-range resolution and the statistics engine
//! - The scheduled ingestion and backup jobs
//!
//! It is used by `weather-cli`, but the jobs can also be driven by any
//! scheduler through [`invocation`].

pub mod backup;
pub mod config;
pub mod date_range;
pub mod error;
pub mod ingest;
pub mod invocation;
pub mod model;
pub mod provider;
pub mod stats;
pub mod store;

pub use backup::{BackupJob, BackupOutcome, BackupProvider};
pub use config::{BackupConfig, Config, ProviderConfig};
pub use date_range::DateFilter;
pub use error::WeatherError;
pub use ingest::{IngestionJob, IngestionReport};
pub use model::{
    DateRange, RainScope, Report, ReportRequest, ReportResult, TempExtreme, WeatherRecord,
};
pub use provider::{ProviderId, WeatherProvider};
pub use stats::StatisticsEngine;
pub use store::WeatherStore;
