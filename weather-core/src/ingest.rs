use serde::Serialize;
use tracing::{error, info, warn};

use crate::{error::WeatherError, provider::WeatherProvider, store::WeatherStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub requested: usize,
    pub stored: u64,
    /// Observations already present for the same city and timestamp.
    pub skipped_duplicates: u64,
}

/// Fetch current conditions for every configured location and store them.
#[derive(Debug)]
pub struct IngestionJob {
    provider: Box<dyn WeatherProvider>,
    store: WeatherStore,
    locations: Vec<String>,
}

impl IngestionJob {
    pub fn new(
        provider: Box<dyn WeatherProvider>,
        store: WeatherStore,
        locations: Vec<String>,
    ) -> Self {
        Self { provider, store, locations }
    }

    /// Successful fetches are written even when other locations fail; the failures are
    /// then reported as one [`WeatherError::Fetch`]. Nothing is retried here.
    pub async fn run(&self) -> Result<IngestionReport, WeatherError> {
        info!(
            provider = %self.provider.id(),
            locations = self.locations.len(),
            "starting ingestion"
        );

        self.store.migrate().await?;

        let mut records = Vec::with_capacity(self.locations.len());
        let mut failed = Vec::new();

        for location in &self.locations {
            match self.provider.current(location).await {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(location = %location, kind = err.kind(), error = %err, "fetch failed");
                    failed.push(location.clone());
                }
            }
        }

        let stored = self.store.insert_batch(&records).await.inspect_err(|err| {
            error!(kind = err.kind(), error = %err, records = records.len(), "failed to store observations");
        })?;

        let report = IngestionReport {
            requested: self.locations.len(),
            stored,
            skipped_duplicates: records.len() as u64 - stored,
        };

        if !failed.is_empty() {
            error!(failed = failed.len(), stored, "ingestion finished with fetch failures");
            return Err(WeatherError::Fetch {
                location: failed.join(", "),
                message: format!(
                    "{} of {} locations failed; {} observations stored",
                    failed.len(),
                    report.requested,
                    report.stored
                ),
            });
        }

        info!(stored = report.stored, skipped = report.skipped_duplicates, "ingestion finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{DateRange, GroupBy, WeatherRecord},
        provider::ProviderId,
    };
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};

    #[derive(Debug)]
    struct FixedProvider {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl WeatherProvider for FixedProvider {
        fn id(&self) -> ProviderId {
            ProviderId::OpenWeather
        }

        async fn current(&self, location: &str) -> Result<WeatherRecord, WeatherError> {
            if self.failing.iter().any(|name| *name == location) {
                return Err(WeatherError::Fetch {
                    location: location.to_string(),
                    message: "status 404 Not Found".into(),
                });
            }

            Ok(WeatherRecord {
                city: location.to_string(),
                country: "XX".into(),
                temperature_c: 20.0,
                rain_present: false,
                description: "clear sky".into(),
                humidity_pct: None,
                pressure_hpa: None,
                observed_at: Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap(),
            })
        }
    }

    /// Shuts the store down while fetching, so only the write can fail.
    #[derive(Debug)]
    struct ClosingProvider {
        store: WeatherStore,
    }

    #[async_trait]
    impl WeatherProvider for ClosingProvider {
        fn id(&self) -> ProviderId {
            ProviderId::WeatherApi
        }

        async fn current(&self, location: &str) -> Result<WeatherRecord, WeatherError> {
            self.store.close().await;
            FixedProvider { failing: vec![] }.current(location).await
        }
    }

    fn locations(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn noon_hour() -> DateRange {
        let start = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        DateRange::new(start, start + Duration::hours(1)).unwrap()
    }

    #[tokio::test]
    async fn stores_one_record_per_location() {
        let store = WeatherStore::in_memory().await.unwrap();
        let job = IngestionJob::new(
            Box::new(FixedProvider { failing: vec![] }),
            store.clone(),
            locations(&["Paris", "Rome"]),
        );

        let report = job.run().await.unwrap();
        assert_eq!(
            report,
            IngestionReport { requested: 2, stored: 2, skipped_duplicates: 0 }
        );

        // Same provider timestamp again: nothing new is written.
        let again = job.run().await.unwrap();
        assert_eq!(again.stored, 0);
        assert_eq!(again.skipped_duplicates, 2);
    }

    #[tokio::test]
    async fn fetch_failures_surface_after_storing_the_rest() {
        let store = WeatherStore::in_memory().await.unwrap();
        let job = IngestionJob::new(
            Box::new(FixedProvider { failing: vec!["Atlantis"] }),
            store.clone(),
            locations(&["Paris", "Atlantis"]),
        );

        let err = job.run().await.unwrap_err();
        assert!(matches!(err, WeatherError::Fetch { ref location, .. } if location == "Atlantis"));

        let stored = store.group_stats(GroupBy::City, &noon_hour()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "Paris");
    }

    #[tokio::test]
    async fn write_failure_is_a_persistence_error() {
        let store = WeatherStore::in_memory().await.unwrap();
        let job = IngestionJob::new(
            Box::new(ClosingProvider { store: store.clone() }),
            store,
            locations(&["Paris"]),
        );

        let err = job.run().await.unwrap_err();

        assert!(matches!(err, WeatherError::Persistence { operation: "insert", .. }), "{err}");
        assert_eq!(err.exit_code(), 1);
    }
}
