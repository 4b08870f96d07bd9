use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use weather_core::{
    BackupConfig, BackupJob, Config, DateFilter, IngestionJob, ProviderId, RainScope, Report,
    ReportRequest, StatisticsEngine, TempExtreme, WeatherError, WeatherStore,
    backup::backup_provider_from_config,
    date_range,
    invocation::{InvocationContext, JobStatus, handle_backup, handle_ingestion},
    provider::default_provider_from_config,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather",
    version,
    about = "Weather statistics for cities and countries",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub report: ReportArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// Fetch current weather for every configured location and store it.
    Ingest,

    /// Back up the weather table with the configured backup provider.
    Backup,

    /// Delete observations older than the retention window and reclaim space.
    Purge {
        /// Retention window in days; defaults to `retention_days` from the config.
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Which report to print. At most one may be given.
#[derive(Debug, Args)]
#[group(id = "report_type", multiple = false)]
pub struct ReportType {
    /// Get countries weather stats
    #[arg(long)]
    pub countries: bool,

    /// Get cities weather stats
    #[arg(long)]
    pub cities: bool,

    /// Get the extreme temperature of each city
    #[arg(long)]
    pub extremes: bool,

    /// Count the hours with rain presence
    #[arg(long)]
    pub rain: bool,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub kind: ReportType,

    /// Date range: selected_hour, today, yesterday, current_week or last_seven_days
    #[arg(
        long = "date_filter",
        value_name = "FILTER",
        default_value = "last_seven_days",
        value_parser = DateFilter::from_str
    )]
    pub date_filter: DateFilter,

    /// Temperature extreme to report with --extremes: max or min [default: max]
    #[arg(long = "temp_extreme", value_name = "EXTREME", value_parser = TempExtreme::from_str)]
    pub temp_extreme: Option<TempExtreme>,

    /// Rain hours with --rain: total (distinct hours across all cities) or per_location [default: total]
    #[arg(long = "rain_scope", value_name = "SCOPE", value_parser = RainScope::from_str)]
    pub rain_scope: Option<RainScope>,

    /// Reference time in the reporting offset, "YYYY-MM-DD HH" or "YYYY-MM-DD HH:MM" [default: now]
    #[arg(long, value_name = "TIME")]
    pub at: Option<String>,
}

impl ReportArgs {
    /// The requested report. `--temp_extreme` and `--rain_scope` are rejected unless
    /// their own report flag is given.
    pub fn report(&self) -> Result<Report, WeatherError> {
        let kind = &self.kind;

        if let Some(extreme) = self.temp_extreme.filter(|_| !kind.extremes) {
            return Err(WeatherError::InvalidParameter {
                name: "--temp_extreme",
                value: extreme.to_string(),
                expected: "max or min, together with --extremes",
            });
        }
        if let Some(scope) = self.rain_scope.filter(|_| !kind.rain) {
            return Err(WeatherError::InvalidParameter {
                name: "--rain_scope",
                value: scope.to_string(),
                expected: "total or per_location, together with --rain",
            });
        }

        if kind.countries {
            Ok(Report::Countries)
        } else if kind.cities {
            Ok(Report::Cities)
        } else if kind.extremes {
            Ok(Report::Extremes { extreme: self.temp_extreme.unwrap_or_default() })
        } else if kind.rain {
            Ok(Report::Rain { scope: self.rain_scope.unwrap_or_default() })
        } else {
            Err(WeatherError::InvalidParameter {
                name: "report type",
                value: "none".to_string(),
                expected: "--countries, --cities, --extremes or --rain",
            })
        }
    }

    /// The instant the date filter is resolved against. `selected_hour` without
    /// `--at` asks for the hour interactively.
    fn reference_instant(&self, offset: &FixedOffset) -> Result<DateTime<FixedOffset>> {
        let text = match (&self.at, self.date_filter) {
            (Some(at), _) => at.clone(),
            (None, DateFilter::SelectedHour) => inquire::Text::new("Hour of interest (YYYY-MM-DD HH):")
                .prompt()
                .context("Failed to read the selected hour")?,
            (None, _) => return Ok(Utc::now().with_timezone(offset)),
        };

        Ok(parse_local_time(&text, offset)?)
    }
}

pub fn parse_local_time(text: &str, offset: &FixedOffset) -> Result<DateTime<FixedOffset>, WeatherError> {
    let text = text.trim();
    let invalid = || WeatherError::InvalidParameter {
        name: "at",
        value: text.to_string(),
        expected: "\"YYYY-MM-DD HH\" or \"YYYY-MM-DD HH:MM\"",
    };

    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&format!("{text}:00"), "%Y-%m-%d %H:%M"))
        .map_err(|_| invalid())?;

    offset.from_local_datetime(&naive).single().ok_or_else(invalid)
}

/// Start of the retention window, `days` before `now`.
pub fn purge_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, WeatherError> {
    Duration::try_days(days.into())
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| WeatherError::InvalidParameter {
            name: "days",
            value: days.to_string(),
            expected: "a number of days within the supported calendar",
        })
}

/// Exit status for a failed run: typed pipeline errors keep their own code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<WeatherError>().map_or(1, WeatherError::exit_code)
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Some(Command::Configure { provider }) => configure(&provider),
            Some(Command::Ingest) => ingest().await,
            Some(Command::Backup) => backup().await,
            Some(Command::Purge { days }) => purge(days).await,
            None => report(&self.report).await,
        }
    }
}

async fn report(args: &ReportArgs) -> Result<()> {
    let report = args.report()?;
    let config = Config::load_with_env()?;
    let offset = config.report_offset()?;
    let database_url = config.database_url()?;

    let reference = args.reference_instant(&offset)?;
    let range = date_range::resolve(args.date_filter, &reference)?;

    let store = WeatherStore::connect(database_url).await?;
    store.migrate().await?;

    let result = StatisticsEngine::new(store.clone())
        .run(&ReportRequest { report, range })
        .await;
    store.close().await;
    let result = result?;

    for line in result.lines(&offset) {
        println!("{line}");
    }

    Ok(())
}

async fn ingest() -> Result<()> {
    let config = Config::load_with_env()?;
    let provider = default_provider_from_config(&config)?;
    let store = WeatherStore::connect(config.database_url()?).await?;

    let job = IngestionJob::new(provider, store, config.locations.clone());
    finish(handle_ingestion(&InvocationContext::manual(), &job).await)
}

async fn backup() -> Result<()> {
    let config = Config::load_with_env()?;
    let store = match &config.backup {
        BackupConfig::Snapshot { .. } => Some(WeatherStore::connect(config.database_url()?).await?),
        BackupConfig::Rest { .. } => None,
    };

    let provider = backup_provider_from_config(&config.backup, store, config.http_timeout())?;
    let job = BackupJob::new(provider);
    finish(handle_backup(&InvocationContext::manual(), &job).await)
}

async fn purge(days: Option<u32>) -> Result<()> {
    let config = Config::load_with_env()?;
    let cutoff = purge_cutoff(Utc::now(), days.unwrap_or(config.retention_days))?;
    let store = WeatherStore::connect(config.database_url()?).await?;
    store.migrate().await?;

    let deleted = store.purge_older_than(cutoff).await?;
    store.reclaim_space().await?;
    store.close().await;

    println!("Deleted {deleted} observations older than {}", cutoff.to_rfc3339());
    Ok(())
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if config.is_provider_configured(id) {
        let replace = inquire::Confirm::new(&format!("{id} already has an API key. Replace it?"))
            .with_default(false)
            .prompt()
            .context("Failed to read the answer")?;
        if !replace {
            return Ok(());
        }
    }

    let api_key = inquire::Password::new(&format!("API key for {id}:"))
        .without_confirmation()
        .prompt()
        .context("Failed to read the API key")?;
    config.upsert_provider_api_key(id, api_key.trim().to_string());

    let current_default = config.default_provider_id().ok();
    if current_default != Some(id) {
        let make_default = inquire::Confirm::new(&format!("Use {id} as the default provider?"))
            .with_default(true)
            .prompt()
            .context("Failed to read the answer")?;
        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save()?;
    println!("Saved {id} credentials to {}", Config::config_file_path()?.display());
    Ok(())
}

fn finish(status: JobStatus) -> Result<()> {
    if !status.is_success() {
        bail!(status.body);
    }

    println!("{}", status.body);
    Ok(())
}
