//! Binary crate for the `weather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments into reports or job invocations
//! - Interactive configuration
//! - Human-friendly output and exit status

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use weather_core::WeatherError;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so report output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cmd = cli::Cli::parse();

    match cmd.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<WeatherError>() {
                Some(e) if e.is_expected() => warn!(kind = e.kind(), "{e}"),
                Some(e) => error!(kind = e.kind(), "{err:#}"),
                None => error!("{err:#}"),
            }
            eprintln!("Error: {err:#}");
            ExitCode::from(cli::exit_code(&err))
        }
    }
}
