use chrono::{FixedOffset, TimeZone};
use tracing::{debug, warn};

use crate::{
    error::WeatherError,
    model::{GroupBy, RainHours, RainScope, Report, ReportRequest, ReportResult},
    store::WeatherStore,
};

/// Runs report queries against a [`WeatherStore`]. Read-only.
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    store: WeatherStore,
}

impl StatisticsEngine {
    pub fn new(store: WeatherStore) -> Self {
        Self { store }
    }

    /// Execute one report.
    ///
    /// Emptiness is checked before anything else: a range without any observations is
    /// [`WeatherError::NoData`] for every report, `rain` included. Only a range that
    /// holds observations, none of them rainy, reports zero rain hours.
    pub async fn run(&self, request: &ReportRequest) -> Result<ReportResult, WeatherError> {
        let range = &request.range;
        debug!(report = request.report.name(), range = %range, "running report");

        let result = match request.report {
            Report::Countries => ReportResult::Groups {
                by: GroupBy::Country,
                rows: self.store.group_stats(GroupBy::Country, range).await?,
            },
            Report::Cities => ReportResult::Groups {
                by: GroupBy::City,
                rows: self.store.group_stats(GroupBy::City, range).await?,
            },
            Report::Extremes { extreme } => ReportResult::Extremes {
                extreme,
                rows: self.store.temperature_extremes(extreme, range).await?,
            },
            Report::Rain { scope: RainScope::Total } => {
                let (samples, hours) = self.store.rain_hours_total(range).await?;
                if samples == 0 {
                    return Err(self.no_data(request));
                }
                ReportResult::RainHours(RainHours::Total(hours))
            }
            Report::Rain { scope: RainScope::PerLocation } => {
                ReportResult::RainHours(RainHours::PerLocation(
                    self.store.rain_hours_by_city(range).await?,
                ))
            }
        };

        if result.is_empty() {
            return Err(self.no_data(request));
        }

        Ok(result)
    }

    fn no_data(&self, request: &ReportRequest) -> WeatherError {
        warn!(report = request.report.name(), range = %request.range, "no data in range");
        WeatherError::NoData {
            start: request.range.start(),
            end: request.range.end(),
        }
    }
}

impl ReportResult {
    pub fn is_empty(&self) -> bool {
        match self {
            ReportResult::Groups { rows, .. } => rows.is_empty(),
            ReportResult::Extremes { rows, .. } => rows.is_empty(),
            ReportResult::RainHours(RainHours::PerLocation(rows)) => rows.is_empty(),
            ReportResult::RainHours(RainHours::Total(_)) => false,
        }
    }

    /// Human-readable rows, timestamps shown in `offset`.
    pub fn lines(&self, offset: &FixedOffset) -> Vec<String> {
        match self {
            ReportResult::Groups { by, rows } => {
                let label = match by {
                    GroupBy::Country => "country",
                    GroupBy::City => "city",
                };
                rows.iter()
                    .map(|row| {
                        let stddev = row
                            .stddev_temp
                            .map_or_else(|| "n/a".to_string(), |value| format!("{value:.2}"));
                        format!(
                            "{label}={} avg_temp={:.2} max_temp={:.2} min_temp={:.2} stddev_temp={stddev} samples={} rain_hours={}",
                            row.name, row.avg_temp, row.max_temp, row.min_temp, row.samples, row.rain_hours
                        )
                    })
                    .collect()
            }
            ReportResult::Extremes { extreme, rows } => rows
                .iter()
                .map(|row| {
                    let local = offset.from_utc_datetime(&row.observed_at.naive_utc());
                    format!(
                        "city={} country={} {extreme}_temp={:.2} timestamp={}",
                        row.city,
                        row.country,
                        row.temperature_c,
                        local.format("%Y-%m-%d %H:%M:%S %:z")
                    )
                })
                .collect(),
            ReportResult::RainHours(RainHours::Total(hours)) => {
                vec![format!("hours_with_rain={hours}")]
            }
            ReportResult::RainHours(RainHours::PerLocation(rows)) => rows
                .iter()
                .map(|row| format!("city={} hours_with_rain={}", row.city, row.hours))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CityExtreme, GroupStats, TempExtreme};
    use chrono::{Duration, Utc};

    #[test]
    fn total_rain_is_never_empty() {
        assert!(!ReportResult::RainHours(RainHours::Total(0)).is_empty());
        assert!(ReportResult::RainHours(RainHours::PerLocation(vec![])).is_empty());
    }

    #[test]
    fn lines_render_in_reporting_offset() {
        let result = ReportResult::Extremes {
            extreme: TempExtreme::Max,
            rows: vec![CityExtreme {
                city: "Paris".into(),
                country: "FR".into(),
                temperature_c: 15.0,
                observed_at: Utc.with_ymd_and_hms(2024, 6, 12, 7, 0, 0).unwrap(),
            }],
        };
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();

        assert_eq!(
            result.lines(&offset),
            vec!["city=Paris country=FR max_temp=15.00 timestamp=2024-06-12 09:00:00 +02:00"]
        );
    }

    #[test]
    fn group_lines_include_every_statistic() {
        let result = ReportResult::Groups {
            by: GroupBy::Country,
            rows: vec![
                GroupStats {
                    name: "FR".into(),
                    avg_temp: 12.333,
                    max_temp: 15.0,
                    min_temp: 10.0,
                    stddev_temp: Some(2.6458),
                    samples: 3,
                    rain_hours: 1,
                },
                GroupStats {
                    name: "NO".into(),
                    avg_temp: 4.0,
                    max_temp: 4.0,
                    min_temp: 4.0,
                    stddev_temp: None,
                    samples: 1,
                    rain_hours: 0,
                },
            ],
        };
        let utc = FixedOffset::east_opt(0).unwrap();

        assert_eq!(
            result.lines(&utc),
            vec![
                "country=FR avg_temp=12.33 max_temp=15.00 min_temp=10.00 stddev_temp=2.65 samples=3 rain_hours=1",
                "country=NO avg_temp=4.00 max_temp=4.00 min_temp=4.00 stddev_temp=n/a samples=1 rain_hours=0",
            ]
        );
    }

    #[tokio::test]
    async fn rain_without_rows_is_no_data() {
        let engine = StatisticsEngine::new(WeatherStore::in_memory().await.unwrap());
        let start = Utc.with_ymd_and_hms(2024, 6, 12, 0, 0, 0).unwrap();
        let request = ReportRequest {
            report: Report::Rain { scope: RainScope::Total },
            range: crate::DateRange::new(start, start + Duration::days(1)).unwrap(),
        };

        let err = engine.run(&request).await.unwrap_err();
        assert!(err.is_expected());
    }
}
