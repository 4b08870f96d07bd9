//! Backup providers and the scheduled backup job.

use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::{
    config::BackupConfig,
    error::WeatherError,
    provider::{http_client, truncate_body},
    store::WeatherStore,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupOutcome {
    pub provider: &'static str,
    pub location: PathBuf,
    /// Known only for exports that go through rows.
    pub rows: Option<usize>,
    pub bytes: u64,
}

#[async_trait]
pub trait BackupProvider: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    async fn create_backup(&self) -> Result<BackupOutcome, WeatherError>;
}

/// Copies the live database into a timestamped file with `VACUUM INTO`.
#[derive(Debug, Clone)]
pub struct SqliteSnapshot {
    store: WeatherStore,
    dir: PathBuf,
}

impl SqliteSnapshot {
    /// Fails with [`WeatherError::Config`] for memory databases, which have no file to copy.
    pub fn new(store: WeatherStore, dir: PathBuf) -> Result<Self, WeatherError> {
        if store.is_in_memory() {
            return Err(WeatherError::Config(
                "Snapshot backups need a file-backed database; DATABASE_URL points at memory"
                    .to_string(),
            ));
        }

        Ok(Self { store, dir })
    }
}

#[async_trait]
impl BackupProvider for SqliteSnapshot {
    fn name(&self) -> &'static str {
        "sqlite_snapshot"
    }

    async fn create_backup(&self) -> Result<BackupOutcome, WeatherError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            WeatherError::Backup(format!(
                "Failed to create backup directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let target = self
            .dir
            .join(format!("weather-{}.db", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));

        self.store
            .snapshot_to(&target)
            .await
            .map_err(|e| WeatherError::Backup(e.to_string()))?;

        let bytes = fs::metadata(&target).map(|m| m.len()).map_err(|e| {
            WeatherError::Backup(format!(
                "Snapshot file was not written to {}: {e}",
                target.display()
            ))
        })?;

        Ok(BackupOutcome {
            provider: self.name(),
            location: target,
            rows: None,
            bytes,
        })
    }
}

/// Exports every row of a hosted table through its REST interface
/// (`/rest/v1/<table>?select=*`) into a JSON file.
#[derive(Debug, Clone)]
pub struct RestTableExport {
    http: Client,
    project_url: String,
    api_key: String,
    table: String,
    file_path: PathBuf,
}

impl RestTableExport {
    pub fn new(
        project_url: String,
        api_key: String,
        table: String,
        file_path: PathBuf,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        Ok(Self {
            http: http_client(timeout)?,
            project_url: project_url.trim_end_matches('/').to_string(),
            api_key,
            table,
            file_path,
        })
    }

    async fn fetch_rows(&self) -> anyhow::Result<Vec<Value>> {
        let url = format!("{}/rest/v1/{}", self.project_url, self.table);

        let res = self
            .http
            .get(&url)
            .query(&[("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send export request for table '{}'", self.table))?;

        let status = res.status();
        let body = res.text().await.context("Failed to read export response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "Export of table '{}' failed with status {}: {}",
                self.table,
                status,
                truncate_body(&body),
            ));
        }

        serde_json::from_str(&body).context("Failed to parse export JSON")
    }
}

/// Write exported rows as pretty-printed JSON, returning the file size.
pub fn write_export(path: &Path, rows: &[Value]) -> anyhow::Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create backup directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(rows).context("Failed to serialize export")?;
    fs::write(path, &json)
        .with_context(|| format!("Failed to write backup file: {}", path.display()))?;

    Ok(json.len() as u64)
}

#[async_trait]
impl BackupProvider for RestTableExport {
    fn name(&self) -> &'static str {
        "rest_export"
    }

    async fn create_backup(&self) -> Result<BackupOutcome, WeatherError> {
        let rows = self
            .fetch_rows()
            .await
            .map_err(|e| WeatherError::Backup(format!("{e:#}")))?;

        if rows.is_empty() {
            return Err(WeatherError::Backup(format!(
                "Table '{}' returned no rows; refusing to write an empty backup",
                self.table
            )));
        }

        let bytes = write_export(&self.file_path, &rows)
            .map_err(|e| WeatherError::Backup(format!("{e:#}")))?;

        Ok(BackupOutcome {
            provider: self.name(),
            location: self.file_path.clone(),
            rows: Some(rows.len()),
            bytes,
        })
    }
}

/// Build the configured provider. Snapshots need the live store; REST exports
/// require every connection field up front.
pub fn backup_provider_from_config(
    config: &BackupConfig,
    store: Option<WeatherStore>,
    timeout: Duration,
) -> Result<Box<dyn BackupProvider>, WeatherError> {
    match config {
        BackupConfig::Snapshot { dir } => {
            let store = store.ok_or_else(|| {
                WeatherError::Config("Snapshot backups need a database connection".to_string())
            })?;
            Ok(Box::new(SqliteSnapshot::new(store, dir.clone())?))
        }
        BackupConfig::Rest { project_url, api_key, table, file_path } => {
            let missing = |name: &str| {
                WeatherError::Config(format!("{name} is not set for the REST backup"))
            };

            Ok(Box::new(RestTableExport::new(
                project_url.clone().ok_or_else(|| missing("BACKUP_PROJECT_URL"))?,
                api_key.clone().ok_or_else(|| missing("BACKUP_API_KEY"))?,
                table.clone().ok_or_else(|| missing("BACKUP_TABLE_NAME"))?,
                file_path.clone().ok_or_else(|| missing("BACKUP_FILE_PATH"))?,
                timeout,
            )?))
        }
    }
}

#[derive(Debug)]
pub struct BackupJob {
    provider: Box<dyn BackupProvider>,
}

impl BackupJob {
    pub fn new(provider: Box<dyn BackupProvider>) -> Self {
        Self { provider }
    }

    pub async fn run(&self) -> Result<BackupOutcome, WeatherError> {
        info!(provider = self.provider.name(), "starting backup");

        match self.provider.create_backup().await {
            Ok(outcome) => {
                info!(
                    provider = outcome.provider,
                    location = %outcome.location.display(),
                    rows = ?outcome.rows,
                    bytes = outcome.bytes,
                    "backup completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                error!(provider = self.provider.name(), kind = err.kind(), error = %err, "backup failed");
                Err(err)
            }
        }
    }
}
