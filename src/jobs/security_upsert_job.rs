//! Security Master Upsert Job
//!
//! Pulls the full security-master universe from the data vendor and merges it
//! into the `securities` table. Invoked once a day by an external scheduler
//! (`security-master upsert`); the job itself never reschedules.
//!
//! # Processing Strategy
//!
//! 1. Take the run lock, failing fast when another run holds it
//! 2. Fetch the vendor payload; any failure aborts before a single write
//! 3. Keep listed companies (an NSE symbol or BSE code, not delisted)
//! 4. Convert rows through the fixed column map and expand name abbreviations
//! 5. Upsert in chunks; a failing row is recorded and skipped
//! 6. Archive the raw payload and the operation log to the object store
//!
//! Re-running with an unchanged payload only moves `updated_at`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::SecurityRepository;
use crate::errors::RepositoryError;
use crate::external::object_store::{operation_log_key, raw_payload_key};
use crate::external::{FetchError, ObjectStore, VendorSource};
use crate::models::SecurityInput;
use crate::services::abbreviation_service::AbbreviationService;
use crate::services::vendor_transform::{ColumnMap, Field};

pub const OPERATION: &str = "security_upsert";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("another upsert run is in progress")]
    RunInProgress,

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(#[from] FetchError),

    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    /// Position in the vendor's data array.
    pub row: usize,
    pub isin: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub token: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub fetched: usize,
    pub mapped_columns: usize,
    pub listed: usize,
    pub transformed: usize,
    pub upserted: usize,
    pub failed: usize,
    pub failures: Vec<RowFailure>,
    pub error: Option<String>,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            token: None,
            status: RunStatus::Success,
            started_at: Utc::now(),
            duration_ms: 0,
            fetched: 0,
            mapped_columns: 0,
            listed: 0,
            transformed: 0,
            upserted: 0,
            failed: 0,
            failures: Vec::new(),
            error: None,
        }
    }

    fn fail_row(&mut self, row: usize, isin: Option<String>, reason: String) {
        self.failed += 1;
        self.failures.push(RowFailure { row, isin, reason });
    }

    fn settle_status(&mut self) {
        self.status = if self.failed == 0 {
            RunStatus::Success
        } else if self.upserted > 0 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Error
        };
    }
}

/// Everything one run needs, built by the caller.
pub struct UpsertContext {
    pub repository: Arc<dyn SecurityRepository>,
    pub vendor: Arc<dyn VendorSource>,
    pub abbreviations: Arc<AbbreviationService>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub batch_size: usize,
}

/// Main entry point for the daily security upsert.
pub async fn run_security_upsert(ctx: &UpsertContext) -> Result<PipelineReport, PipelineError> {
    if !ctx.repository.try_acquire_run_lock().await? {
        warn!("⚠️ Security upsert skipped: another run holds the lock");
        return Err(PipelineError::RunInProgress);
    }

    let started = Instant::now();
    let mut report = PipelineReport::new();
    info!("🔄 Starting security upsert run {}", report.run_id);

    let result = execute(ctx, &mut report).await;

    report.duration_ms = started.elapsed().as_millis();
    if let Err(e) = &result {
        report.status = RunStatus::Error;
        report.error = Some(e.to_string());
        error!("❌ Security upsert run {} failed: {}", report.run_id, e);
    }
    write_operation_log(ctx, &report).await;

    if let Err(e) = ctx.repository.release_run_lock().await {
        warn!("⚠️ Failed to release run lock: {}", e);
    }

    result.map(|_| {
        info!(
            "✅ Security upsert run {} finished ({:?}): {} fetched, {} listed, {} upserted, {} failed",
            report.run_id, report.status, report.fetched, report.listed, report.upserted, report.failed
        );
        report
    })
}

async fn execute(ctx: &UpsertContext, report: &mut PipelineReport) -> Result<(), PipelineError> {
    let payload = ctx.vendor.fetch().await?;
    report.token = Some(payload.token.clone());
    report.fetched = payload.rows.len();
    info!("Fetched {} rows from vendor (token {})", report.fetched, payload.token);

    archive_payload(ctx, &payload.token, &payload.raw).await;

    let columns = ColumnMap::from_headers(&payload.headers);
    report.mapped_columns = columns.mapped_columns();
    info!(
        "Mapped {} of {} vendor columns",
        report.mapped_columns,
        payload.headers.len()
    );
    if !columns.has(Field::IsinCode) {
        warn!("⚠️ Vendor header row has no ISIN column; every row will be rejected");
    }

    let listed: Vec<(usize, &Vec<serde_json::Value>)> = payload
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| columns.is_listed(row))
        .collect();
    report.listed = listed.len();
    info!("Filtered {} listed companies from {} rows", report.listed, report.fetched);

    let mut inputs: Vec<(usize, SecurityInput)> = Vec::with_capacity(listed.len());
    for (idx, row) in listed {
        match columns.to_input(row) {
            Ok(input) => inputs.push((idx, input)),
            Err(e) => {
                warn!("Skipping row {}: {}", idx, e);
                report.fail_row(idx, columns.text(row, Field::IsinCode), e.to_string());
            }
        }
    }
    report.transformed = inputs.len();

    let names: Vec<String> = inputs
        .iter()
        .map(|(_, input)| input.company_name.clone().unwrap_or_default())
        .collect();
    let expanded = ctx.abbreviations.expand_names(&names).await;
    for ((_, input), name) in inputs.iter_mut().zip(expanded) {
        if input.company_name.is_some() {
            input.company_name = Some(name);
        }
    }

    for chunk in inputs.chunks(ctx.batch_size.max(1)) {
        let batch: Vec<SecurityInput> = chunk.iter().map(|(_, input)| input.clone()).collect();
        let outcomes = ctx.repository.upsert_batch(batch).await?;
        for ((idx, input), outcome) in chunk.iter().zip(outcomes) {
            match outcome {
                Ok(_) => report.upserted += 1,
                Err(e) => {
                    warn!("Upsert failed for row {}: {}", idx, e);
                    report.fail_row(*idx, input.isin_code.clone(), e.to_string());
                }
            }
        }
        info!("Upserted {}/{} securities", report.upserted, report.transformed);
    }

    report.settle_status();
    Ok(())
}

async fn archive_payload(ctx: &UpsertContext, token: &str, raw: &[u8]) {
    let Some(store) = &ctx.object_store else {
        return;
    };
    let key = raw_payload_key(Utc::now(), token);
    match store.put_json(&key, raw.to_vec()).await {
        Ok(()) => info!("📦 Archived raw payload to {}", key),
        Err(e) => warn!("⚠️ Failed to archive raw payload to {}: {}", key, e),
    }
}

async fn write_operation_log(ctx: &UpsertContext, report: &PipelineReport) {
    let Some(store) = &ctx.object_store else {
        return;
    };
    let now = Utc::now();
    let entry = json!({
        "timestamp": now.to_rfc3339(),
        "operation": OPERATION,
        "status": report.status,
        "details": report,
    });
    let body = match serde_json::to_vec_pretty(&entry) {
        Ok(body) => body,
        Err(e) => {
            warn!("⚠️ Failed to serialize operation log: {}", e);
            return;
        }
    };
    let key = operation_log_key(now, OPERATION);
    match store.put_json(&key, body).await {
        Ok(()) => info!("📝 Operation log written to {}", key),
        Err(e) => warn!("⚠️ Failed to write operation log to {}: {}", key, e),
    }
}
