//! Persistence for weather observations.
//!
//! [`WeatherStore`] owns the `weather_data` table: schema, batch writes,
//! the aggregate reads behind every report, retention and snapshots.
//! Timestamps are stored as unix seconds so hour buckets are plain integer
//! division.

use std::{path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, QueryBuilder, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::{debug, info};

use crate::{
    error::WeatherError,
    model::{
        CityExtreme, DateRange, GroupBy, GroupStats, LocationRainHours, TempExtreme,
        WeatherRecord,
    },
    provider::unix_to_utc,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS weather_data (
    city TEXT NOT NULL,
    country TEXT NOT NULL,
    temperature DOUBLE PRECISION NOT NULL,
    rain_present BOOLEAN NOT NULL,
    description TEXT NOT NULL,
    humidity INTEGER,
    pressure INTEGER,
    observed_at BIGINT NOT NULL,
    PRIMARY KEY (city, observed_at)
);
CREATE INDEX IF NOT EXISTS idx_weather_data_observed_at ON weather_data (observed_at);
CREATE INDEX IF NOT EXISTS idx_weather_data_country ON weather_data (country);
"#;

/// Rows per INSERT statement; keeps bind counts well under SQLite's limit.
const INSERT_CHUNK: usize = 100;

/// Distinct hour buckets containing at least one rainy observation.
const RAIN_HOURS: &str = "COUNT(DISTINCT CASE WHEN rain_present THEN observed_at / 3600 END)";

#[derive(Debug, Clone)]
pub struct WeatherStore {
    pool: SqlitePool,
    in_memory: bool,
}

#[derive(Debug, FromRow)]
struct GroupRow {
    name: String,
    avg_temp: f64,
    max_temp: f64,
    min_temp: f64,
    /// Sample variance; NULL for single-sample groups.
    temp_variance: Option<f64>,
    samples: i64,
    rain_hours: i64,
}

#[derive(Debug, FromRow)]
struct ExtremeRow {
    city: String,
    country: String,
    temperature: f64,
    observed_at: i64,
}

impl WeatherStore {
    /// Open (creating if missing) the database at `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, WeatherError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(WeatherError::persistence("connect"))?
            .create_if_missing(true);

        // Every connection to `:memory:` would see its own empty database.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(WeatherError::persistence("connect"))?;

        Ok(Self { pool, in_memory })
    }

    /// Memory databases live only inside this pool and cannot be snapshotted to disk.
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    pub async fn in_memory() -> Result<Self, WeatherError> {
        let store = Self::connect("sqlite::memory:").await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Create the table and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), WeatherError> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(WeatherError::persistence("migrate"))?;
            }
        }

        Ok(())
    }

    /// Insert all records in one transaction. Records whose `(city, observed_at)`
    /// already exists are skipped; returns the number of rows actually written.
    pub async fn insert_batch(&self, records: &[WeatherRecord]) -> Result<u64, WeatherError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(WeatherError::persistence("insert"))?;
        let mut inserted = 0;

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO weather_data \
                 (city, country, temperature, rain_present, description, humidity, pressure, observed_at) ",
            );

            qb.push_values(chunk, |mut row, record| {
                row.push_bind(record.city.as_str())
                    .push_bind(record.country.as_str())
                    .push_bind(record.temperature_c)
                    .push_bind(record.rain_present)
                    .push_bind(record.description.as_str())
                    .push_bind(record.humidity_pct.map(i64::from))
                    .push_bind(record.pressure_hpa.map(i64::from))
                    .push_bind(record.observed_at.timestamp());
            });
            qb.push(" ON CONFLICT (city, observed_at) DO NOTHING");

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(WeatherError::persistence("insert"))?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(WeatherError::persistence("insert"))?;

        debug!(records = records.len(), inserted, "batch insert committed");
        Ok(inserted)
    }

    /// Per-group temperature statistics and rain hours, ordered by group name.
    pub async fn group_stats(
        &self,
        by: GroupBy,
        range: &DateRange,
    ) -> Result<Vec<GroupStats>, WeatherError> {
        let column = by.column();
        let sql = format!(
            "SELECT {column} AS name, \
                    AVG(temperature) AS avg_temp, \
                    MAX(temperature) AS max_temp, \
                    MIN(temperature) AS min_temp, \
                    (SUM(temperature * temperature) - SUM(temperature) * SUM(temperature) / COUNT(*)) \
                        / (COUNT(*) - 1) AS temp_variance, \
                    COUNT(*) AS samples, \
                    {RAIN_HOURS} AS rain_hours \
             FROM weather_data \
             WHERE observed_at >= ?1 AND observed_at < ?2 \
             GROUP BY {column} \
             ORDER BY {column} ASC"
        );

        let rows = sqlx::query_as::<_, GroupRow>(&sql)
            .bind(range.start().timestamp())
            .bind(range.end().timestamp())
            .fetch_all(&self.pool)
            .await
            .map_err(WeatherError::persistence("group statistics"))?;

        Ok(rows
            .into_iter()
            .map(|row| GroupStats {
                name: row.name,
                avg_temp: row.avg_temp,
                max_temp: row.max_temp,
                min_temp: row.min_temp,
                // Rounding can push the variance of equal readings slightly below zero.
                stddev_temp: row.temp_variance.map(|variance| variance.max(0.0).sqrt()),
                samples: row.samples,
                rain_hours: row.rain_hours,
            })
            .collect())
    }

    /// One row per city: its hottest (or coldest) observation, earliest first on ties.
    pub async fn temperature_extremes(
        &self,
        extreme: TempExtreme,
        range: &DateRange,
    ) -> Result<Vec<CityExtreme>, WeatherError> {
        let direction = match extreme {
            TempExtreme::Max => "DESC",
            TempExtreme::Min => "ASC",
        };
        let sql = format!(
            "SELECT city, country, temperature, observed_at FROM ( \
                 SELECT city, country, temperature, observed_at, \
                        ROW_NUMBER() OVER ( \
                            PARTITION BY city ORDER BY temperature {direction}, observed_at ASC \
                        ) AS position \
                 FROM weather_data \
                 WHERE observed_at >= ?1 AND observed_at < ?2 \
             ) AS ranked \
             WHERE position = 1 \
             ORDER BY city ASC"
        );

        let rows = sqlx::query_as::<_, ExtremeRow>(&sql)
            .bind(range.start().timestamp())
            .bind(range.end().timestamp())
            .fetch_all(&self.pool)
            .await
            .map_err(WeatherError::persistence("temperature extremes"))?;

        rows.into_iter()
            .map(|row| {
                let observed_at =
                    unix_to_utc(row.observed_at).ok_or_else(|| WeatherError::Persistence {
                        operation: "temperature extremes",
                        source: sqlx::Error::Decode(
                            format!("observed_at {} is out of range", row.observed_at).into(),
                        ),
                    })?;

                Ok(CityExtreme {
                    city: row.city,
                    country: row.country,
                    temperature_c: row.temperature,
                    observed_at,
                })
            })
            .collect()
    }

    /// `(rows in range, distinct rainy hours across all locations)`.
    pub async fn rain_hours_total(&self, range: &DateRange) -> Result<(i64, i64), WeatherError> {
        let sql = format!(
            "SELECT COUNT(*), {RAIN_HOURS} FROM weather_data \
             WHERE observed_at >= ?1 AND observed_at < ?2"
        );

        sqlx::query_as::<_, (i64, i64)>(&sql)
            .bind(range.start().timestamp())
            .bind(range.end().timestamp())
            .fetch_one(&self.pool)
            .await
            .map_err(WeatherError::persistence("rain hours"))
    }

    /// Rainy hours per city, including cities that had no rain in range.
    pub async fn rain_hours_by_city(
        &self,
        range: &DateRange,
    ) -> Result<Vec<LocationRainHours>, WeatherError> {
        let sql = format!(
            "SELECT city, {RAIN_HOURS} AS hours FROM weather_data \
             WHERE observed_at >= ?1 AND observed_at < ?2 \
             GROUP BY city \
             ORDER BY city ASC"
        );

        sqlx::query_as::<_, LocationRainHours>(&sql)
            .bind(range.start().timestamp())
            .bind(range.end().timestamp())
            .fetch_all(&self.pool)
            .await
            .map_err(WeatherError::persistence("rain hours by city"))
    }

    /// Delete observations taken before `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, WeatherError> {
        let result = sqlx::query("DELETE FROM weather_data WHERE observed_at < ?1")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await
            .map_err(WeatherError::persistence("purge"))?;

        info!(cutoff = %cutoff, deleted = result.rows_affected(), "purged old observations");
        Ok(result.rows_affected())
    }

    pub async fn reclaim_space(&self) -> Result<(), WeatherError> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(WeatherError::persistence("vacuum"))?;
        Ok(())
    }

    /// Write a consistent copy of the whole database to `target`, which must not exist.
    pub async fn snapshot_to(&self, target: &Path) -> Result<(), WeatherError> {
        let escaped = target.to_string_lossy().replace('\'', "''");

        sqlx::query(&format!("VACUUM INTO '{escaped}'"))
            .execute(&self.pool)
            .await
            .map_err(WeatherError::persistence("snapshot"))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
