use anyhow::{Context, Result, anyhow};
use chrono::FixedOffset;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::{error::WeatherError, provider::ProviderId};

/// Cities polled by the ingestion job when the config names none.
pub const DEFAULT_LOCATIONS: &[&str] = &[
    "Istanbul",
    "London",
    "Saint Petersburg",
    "Berlin",
    "Madrid",
    "Kyiv",
    "Rome",
    "Bucharest",
    "Paris",
    "Minsk",
    "Vienna",
    "Warsaw",
    "Hamburg",
    "Budapest",
    "Belgrade",
    "Barcelona",
    "Munich",
    "Kharkiv",
    "Milan",
];

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Offset used for day and week boundaries, e.g. "+02:00".
    pub utc_offset: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { utc_offset: "+00:00".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Where the backup job writes to.
///
/// Example TOML:
/// [backup]
/// kind = "rest"
/// project_url = "https://xyz.supabase.co"
/// api_key = "..."
/// table = "weatherdata"
/// file_path = "backup.json"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupConfig {
    Snapshot {
        dir: PathBuf,
    },
    Rest {
        project_url: Option<String>,
        api_key: Option<String>,
        table: Option<String>,
        file_path: Option<PathBuf>,
    },
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig::Snapshot { dir: PathBuf::from("backups") }
    }
}

/// Top-level configuration: the on-disk file with environment overrides applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Optional default provider id, e.g. "openweather" or "weatherapi".
    pub default_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    pub providers: HashMap<String, ProviderConfig>,

    pub locations: Vec<String>,

    pub database_url: Option<String>,

    /// Rows older than this many days are removed by `purge`.
    pub retention_days: u32,

    pub report: ReportConfig,

    pub http: HttpConfig,

    pub backup: BackupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: None,
            providers: HashMap::new(),
            locations: DEFAULT_LOCATIONS.iter().map(|city| city.to_string()).collect(),
            database_url: None,
            retention_days: 7,
            report: ReportConfig::default(),
            http: HttpConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId, WeatherError> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            WeatherError::Config(
                "No default provider configured.\n\
                 Hint: run `weather configure <provider>` (e.g. `weather configure openweather`) \
                 or set OPENWEATHERMAP_API_KEY."
                    .to_string(),
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load the config file and apply environment overrides on top.
    pub fn load_with_env() -> Result<Self> {
        let mut cfg = Self::load()?;
        cfg.apply_env(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-stats", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay values found through `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(key) = var("OPENWEATHERMAP_API_KEY") {
            self.upsert_provider_api_key(ProviderId::OpenWeather, key);
        }
        if let Some(key) = var("WEATHERAPI_API_KEY") {
            self.upsert_provider_api_key(ProviderId::WeatherApi, key);
        }
        if let Some(provider) = var("WEATHER_PROVIDER") {
            self.default_provider = Some(provider);
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(locations) = var("WEATHER_LOCATIONS") {
            self.locations = locations
                .split(',')
                .map(str::trim)
                .filter(|city| !city.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(offset) = var("REPORT_UTC_OFFSET") {
            self.report.utc_offset = offset;
        }

        if let Some(dir) = var("BACKUP_DIR") {
            self.backup = BackupConfig::Snapshot { dir: PathBuf::from(dir) };
        }

        let rest_vars = [
            var("BACKUP_PROJECT_URL"),
            var("BACKUP_API_KEY"),
            var("BACKUP_TABLE_NAME"),
            var("BACKUP_FILE_PATH"),
        ];
        if rest_vars.iter().any(Option::is_some) {
            let [project_url, api_key, table, file_path] = rest_vars;
            let (old_url, old_key, old_table, old_path) = match self.backup.clone() {
                BackupConfig::Rest { project_url, api_key, table, file_path } => {
                    (project_url, api_key, table, file_path)
                }
                BackupConfig::Snapshot { .. } => (None, None, None, None),
            };

            self.backup = BackupConfig::Rest {
                project_url: project_url.or(old_url),
                api_key: api_key.or(old_key),
                table: table.or(old_table),
                file_path: file_path.map(PathBuf::from).or(old_path),
            };
        }
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.providers.get(provider_id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    pub fn database_url(&self) -> Result<&str, WeatherError> {
        self.database_url.as_deref().ok_or_else(|| {
            WeatherError::Config(
                "DATABASE_URL is not set.\n\
                 Hint: export DATABASE_URL=sqlite://weather.db or add `database_url` to the config file."
                    .to_string(),
            )
        })
    }

    pub fn report_offset(&self) -> Result<FixedOffset, WeatherError> {
        self.report.utc_offset.parse::<FixedOffset>().map_err(|e| {
            WeatherError::Config(format!(
                "Invalid reporting UTC offset '{}': {e}. Expected e.g. \"+02:00\".",
                self.report.utc_offset
            ))
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| vars.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
    }

    #[test]
    fn default_provider_id_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.default_provider_id().unwrap_err();

        assert!(err.to_string().contains("No default provider configured"));
    }

    #[test]
    fn set_api_key_and_default_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenWeather);

        let key = cfg.provider_api_key(ProviderId::OpenWeather);
        assert_eq!(key, Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
    }

    #[test]
    fn set_default_provider_overrides_default() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenWeather);

        cfg.set_default_provider(ProviderId::WeatherApi);

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::WeatherApi);
    }

    #[test]
    fn missing_database_url_fails_fast() {
        let cfg = Config::default();
        let err = cfg.database_url().unwrap_err();

        assert!(matches!(err, WeatherError::Config(_)));
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg: Config = toml::from_str(
            r#"
            database_url = "sqlite://from-file.db"
            locations = ["Oslo"]

            [report]
            utc_offset = "+01:00"
            "#,
        )
        .expect("valid toml");

        cfg.apply_env(env(&[
            ("DATABASE_URL", "sqlite://from-env.db"),
            ("OPENWEATHERMAP_API_KEY", "ENV_KEY"),
            ("WEATHER_LOCATIONS", "Paris, Berlin ,,Rome"),
            ("REPORT_UTC_OFFSET", "+02:00"),
        ]));

        assert_eq!(cfg.database_url().unwrap(), "sqlite://from-env.db");
        assert_eq!(cfg.provider_api_key(ProviderId::OpenWeather), Some("ENV_KEY"));
        assert_eq!(cfg.default_provider_id().unwrap(), ProviderId::OpenWeather);
        assert_eq!(cfg.locations, vec!["Paris", "Berlin", "Rome"]);
        assert_eq!(cfg.report_offset().unwrap(), FixedOffset::east_opt(7200).unwrap());
        assert_eq!(cfg.retention_days, 7);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("DATABASE_URL", "  ")]));

        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.locations.len(), DEFAULT_LOCATIONS.len());
    }

    #[test]
    fn rest_backup_env_merges_with_file_settings() {
        let mut cfg: Config = toml::from_str(
            r#"
            [backup]
            kind = "rest"
            table = "weatherdata"
            "#,
        )
        .expect("valid toml");

        cfg.apply_env(env(&[
            ("BACKUP_PROJECT_URL", "https://example.supabase.co"),
            ("BACKUP_API_KEY", "SECRET"),
        ]));

        assert_eq!(
            cfg.backup,
            BackupConfig::Rest {
                project_url: Some("https://example.supabase.co".into()),
                api_key: Some("SECRET".into()),
                table: Some("weatherdata".into()),
                file_path: None,
            }
        );
    }

    #[test]
    fn invalid_offset_is_a_config_error() {
        let mut cfg = Config::default();
        cfg.report.utc_offset = "CET".into();

        assert!(matches!(cfg.report_offset(), Err(WeatherError::Config(_))));
    }

    #[test]
    fn config_file_belongs_to_this_application() {
        // No home directory means no platform config dir at all.
        let Ok(path) = Config::config_file_path() else {
            return;
        };

        assert!(path.ends_with("config.toml"));
        let rendered = path.to_string_lossy();
        assert!(rendered.contains("weather"), "{rendered}");
        assert!(!rendered.contains("weather-cli"), "{rendered}");
        assert!(!rendered.contains("weather-task"), "{rendered}");
    }
}
