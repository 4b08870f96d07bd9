//! Entry points for scheduled invocations.
//!
//! Each call performs one unit of work and returns a status; nothing is kept
//! between calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Instrument, error, info, info_span};

use crate::{backup::BackupJob, error::WeatherError, ingest::IngestionJob};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub request_id: String,
    pub invoked_at: DateTime<Utc>,
}

impl InvocationContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), invoked_at: Utc::now() }
    }

    /// Context for a run started by hand, identified by its start time.
    pub fn manual() -> Self {
        let invoked_at = Utc::now();
        Self {
            request_id: format!("manual-{}", invoked_at.format("%Y%m%dT%H%M%S")),
            invoked_at,
        }
    }
}

/// HTTP-style completion status reported back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub status_code: u16,
    pub body: String,
}

impl JobStatus {
    pub fn ok(body: impl Into<String>) -> Self {
        Self { status_code: 200, body: body.into() }
    }

    pub fn failed(err: &WeatherError) -> Self {
        Self { status_code: 500, body: err.to_string() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

pub async fn handle_ingestion(ctx: &InvocationContext, job: &IngestionJob) -> JobStatus {
    let status = match job
        .run()
        .instrument(info_span!("ingestion", request_id = %ctx.request_id))
        .await
    {
        Ok(report) => {
            JobStatus::ok(format!("Weather data updated successfully ({} stored)", report.stored))
        }
        Err(err) => JobStatus::failed(&err),
    };
    log_status(ctx, &status);
    status
}

pub async fn handle_backup(ctx: &InvocationContext, job: &BackupJob) -> JobStatus {
    let status = match job
        .run()
        .instrument(info_span!("backup", request_id = %ctx.request_id))
        .await
    {
        Ok(outcome) => JobStatus::ok(format!("Backup written to {}", outcome.location.display())),
        Err(err) => JobStatus::failed(&err),
    };
    log_status(ctx, &status);
    status
}

fn log_status(ctx: &InvocationContext, status: &JobStatus) {
    if status.is_success() {
        info!(request_id = %ctx.request_id, status = status.status_code, "invocation finished");
    } else {
        error!(
            request_id = %ctx.request_id,
            status = status.status_code,
            body = %status.body,
            "invocation failed"
        );
    }
}
