// Batch Runner
//
// Applies the Schedule Builder across all eligible assets for one period,
// collecting per-asset outcomes; one asset's validation failure never
// aborts the rest. Produces drafts only - posting stays a separate,
// explicit step.
//
// File-backed engines fan the work out across a bounded rayon pool, one
// SQLite connection per worker, serialized per asset by the shared lock
// table; outcomes are merged in a single collector pass afterwards.
// In-memory engines process sequentially on the engine's own connection.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assets::Asset;
use crate::db;
use crate::engine::{calculate_on, AssetLocks};
use crate::error::EngineResult;
use crate::methods::MethodKind;
use crate::schedule::ScheduleParams;

/// Default bound on batch worker threads
pub const DEFAULT_WORKERS: usize = 4;

// ============================================================================
// REQUEST
// ============================================================================

/// Optional narrowing of the asset set a batch run covers
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    /// Only these asset ids (when set)
    pub asset_ids: Option<Vec<String>>,
    /// Only assets configured with this method (when set)
    pub method: Option<MethodKind>,
}

impl BatchFilter {
    fn matches(&self, asset: &Asset) -> bool {
        if let Some(ids) = &self.asset_ids {
            if !ids.iter().any(|id| id == &asset.id) {
                return false;
            }
        }
        if let Some(kind) = self.method {
            if asset.method.kind() != kind {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub filter: Option<BatchFilter>,
    /// Units produced this period, keyed by asset id
    /// (required input for units-of-production assets)
    pub units_produced: HashMap<String, f64>,
}

impl BatchRequest {
    pub fn new(period_start: NaiveDate, period_end: NaiveDate) -> Self {
        BatchRequest {
            period_start,
            period_end,
            filter: None,
            units_produced: HashMap::new(),
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSuccess {
    pub asset_id: String,
    pub entry_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub asset_id: String,
    /// Error category name, so callers can triage without parsing text
    pub category: String,
    pub reason: String,
}

/// Per-asset outcomes of one batch run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: Vec<BatchSuccess>,
    /// Assets whose validation failed, with the violated precondition
    pub failed: Vec<BatchFailure>,
    /// Assets not eligible to begin with (disposed or fully depreciated)
    pub skipped: usize,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "batch: {} succeeded, {} failed, {} skipped",
            self.succeeded.len(),
            self.failed.len(),
            self.skipped
        )
    }
}

enum Outcome {
    Ok(BatchSuccess),
    Failed(BatchFailure),
}

// ============================================================================
// RUNNER
// ============================================================================

pub(crate) fn run(
    conn: &Connection,
    db_path: Option<&Path>,
    locks: &AssetLocks,
    workers: usize,
    request: &BatchRequest,
) -> EngineResult<BatchReport> {
    let filter = request.filter.clone().unwrap_or_default();

    let mut eligible: Vec<String> = Vec::new();
    let mut skipped = 0usize;
    for asset in db::list_assets(conn)? {
        if !filter.matches(&asset) {
            continue;
        }
        if !asset.is_depreciable() {
            skipped += 1;
            continue;
        }
        eligible.push(asset.id);
    }

    let outcomes = match db_path {
        Some(path) if workers > 1 && eligible.len() > 1 => {
            run_parallel(path, locks, workers, request, &eligible)
        }
        _ => eligible
            .iter()
            .map(|id| process_asset(conn, locks, id, request))
            .collect(),
    };

    // Collector step: merge worker outcomes into one report
    let mut report = BatchReport {
        skipped,
        ..BatchReport::default()
    };
    for outcome in outcomes {
        match outcome {
            Outcome::Ok(success) => report.succeeded.push(success),
            Outcome::Failed(failure) => report.failed.push(failure),
        }
    }

    info!(
        period_start = %request.period_start,
        period_end = %request.period_end,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        skipped = report.skipped,
        "batch depreciation run complete"
    );
    Ok(report)
}

fn run_parallel(
    path: &Path,
    locks: &AssetLocks,
    workers: usize,
    request: &BatchRequest,
    eligible: &[String],
) -> Vec<Outcome> {
    use rayon::prelude::*;

    let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool,
        Err(e) => {
            warn!(error = %e, "worker pool unavailable; running batch sequentially");
            return match Connection::open(path) {
                Ok(conn) => eligible
                    .iter()
                    .map(|id| process_asset(&conn, locks, id, request))
                    .collect(),
                Err(e) => storage_failures(eligible, &e),
            };
        }
    };

    let chunk_size = eligible.len().div_ceil(workers);
    pool.install(|| {
        eligible
            .par_chunks(chunk_size)
            .map(|chunk| match open_worker_connection(path) {
                Ok(conn) => chunk
                    .iter()
                    .map(|id| process_asset(&conn, locks, id, request))
                    .collect::<Vec<_>>(),
                Err(e) => storage_failures(chunk, &e),
            })
            .flatten()
            .collect()
    })
}

fn open_worker_connection(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    // Writers from other workers hold the database briefly; wait, don't fail
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn process_asset(
    conn: &Connection,
    locks: &AssetLocks,
    asset_id: &str,
    request: &BatchRequest,
) -> Outcome {
    let params = ScheduleParams {
        units_this_period: request.units_produced.get(asset_id).copied(),
        year_fraction: None,
    };
    match calculate_on(
        conn,
        locks,
        asset_id,
        request.period_start,
        request.period_end,
        &params,
    ) {
        Ok(entry) => Outcome::Ok(BatchSuccess {
            asset_id: asset_id.to_string(),
            entry_id: entry.id,
            amount: entry.amount,
        }),
        Err(e) => Outcome::Failed(BatchFailure {
            asset_id: asset_id.to_string(),
            category: e.category().as_str().to_string(),
            reason: e.to_string(),
        }),
    }
}

fn storage_failures(ids: &[String], err: &rusqlite::Error) -> Vec<Outcome> {
    ids.iter()
        .map(|id| {
            Outcome::Failed(BatchFailure {
                asset_id: id.clone(),
                category: "storage".to_string(),
                reason: err.to_string(),
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
