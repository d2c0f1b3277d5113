// Depreciation Engine
//
// Facade over the processors, exposing the operations the admin UI/API
// layers call: calculate, post, reverse, revalue, dispose, run batch.
//
// Concurrency model: each asset's ledger is the unit of mutual exclusion.
// Operations against the same asset serialize on a per-asset lock;
// operations against different assets run independently. Posting commits
// its three effects (entry state, asset projection, journal request) in one
// SQLite transaction, with the external ledger call made before commit so a
// rejection or timeout rolls the whole operation back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::assets::Asset;
use crate::batch::{self, BatchReport, BatchRequest};
use crate::db;
use crate::disposal::{self, DisposalEvent, DisposalType};
use crate::error::{DepreciationError, EngineResult};
use crate::methods::{amounts_equal, round_cents, AMOUNT_TOLERANCE};
use crate::posting::{
    depreciation_journal, disposal_journal, revaluation_journal, reversal_journal,
    AccountingLedger, JournalReference, LedgerError, PostingCoordinator,
};
use crate::revaluation::{self, RevaluationEvent};
use crate::schedule::{self, EntryState, ScheduleEntry, ScheduleParams};

// ============================================================================
// PER-ASSET LOCK TABLE
// ============================================================================

/// Arena of per-asset locks. Lock entries are created on first use and kept
/// for the lifetime of the engine; the set of assets is small and stable.
#[derive(Default)]
pub struct AssetLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AssetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the lock guarding one asset's ledger
    pub fn lock_for(&self, asset_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .lock()
            .entry(asset_id.to_string())
            .or_default()
            .clone()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct DepreciationEngine {
    conn: Connection,
    /// Set for file-backed databases; lets the batch runner open per-worker
    /// connections. In-memory engines run batches sequentially.
    db_path: Option<PathBuf>,
    locks: Arc<AssetLocks>,
    coordinator: PostingCoordinator,
    batch_workers: usize,
}

impl DepreciationEngine {
    /// Open a file-backed engine with the schema in place
    pub fn open(path: &Path, ledger: Arc<dyn AccountingLedger>) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        db::setup_database(&conn)?;
        Ok(DepreciationEngine {
            conn,
            db_path: Some(path.to_path_buf()),
            locks: Arc::new(AssetLocks::new()),
            coordinator: PostingCoordinator::new(ledger),
            batch_workers: batch::DEFAULT_WORKERS,
        })
    }

    /// In-memory engine, used by tests and the demo binary
    pub fn open_in_memory(ledger: Arc<dyn AccountingLedger>) -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        db::setup_database(&conn)?;
        Ok(DepreciationEngine {
            conn,
            db_path: None,
            locks: Arc::new(AssetLocks::new()),
            coordinator: PostingCoordinator::new(ledger),
            batch_workers: batch::DEFAULT_WORKERS,
        })
    }

    pub fn with_ledger_timeout(mut self, timeout: Duration) -> Self {
        self.coordinator = self.coordinator.with_timeout(timeout);
        self
    }

    pub fn with_batch_workers(mut self, workers: usize) -> Self {
        self.batch_workers = workers.max(1);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // REGISTRY OPERATIONS
    // ========================================================================

    /// Validate and persist a new asset
    pub fn register_asset(&self, asset: &Asset) -> EngineResult<()> {
        asset.validate()?;
        db::insert_asset(&self.conn, asset)?;
        info!(asset_id = %asset.id, name = %asset.name, cost = asset.cost, "asset registered");
        Ok(())
    }

    pub fn get_asset(&self, asset_id: &str) -> EngineResult<Asset> {
        db::get_asset(&self.conn, asset_id)
    }

    pub fn list_assets(&self) -> EngineResult<Vec<Asset>> {
        db::list_assets(&self.conn)
    }

    pub fn schedule_for_asset(&self, asset_id: &str) -> EngineResult<Vec<ScheduleEntry>> {
        db::entries_for_asset(&self.conn, asset_id)
    }

    /// Rebuild an asset's ledger fields from its posted event sequence
    pub fn replay_ledger(&self, asset_id: &str) -> EngineResult<db::ReplayedLedger> {
        db::replay_ledger(&self.conn, asset_id)
    }

    // ========================================================================
    // SCHEDULE CALCULATION
    // ========================================================================

    /// Build (or rebuild) the draft schedule entry for one asset and period
    pub fn calculate_schedule(
        &self,
        asset_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
        params: &ScheduleParams,
    ) -> EngineResult<ScheduleEntry> {
        calculate_on(&self.conn, &self.locks, asset_id, period_start, period_end, params)
    }

    // ========================================================================
    // POSTING
    // ========================================================================

    /// Commit a draft entry: mark it posted, roll the asset's projection
    /// forward, and emit the journal request - atomically. A ledger
    /// rejection or timeout rolls everything back and the entry stays draft.
    pub fn post_schedule(
        &mut self,
        entry_id: &str,
        posting_date: NaiveDate,
    ) -> EngineResult<JournalReference> {
        let probe = db::get_entry(&self.conn, entry_id)?;
        let lock = self.locks.lock_for(&probe.asset_id);
        let _guard = lock.lock();

        let tx = self.conn.transaction()?;

        // Re-read under the lock; the probe may be stale
        let entry = db::get_entry(&tx, entry_id)?;
        if entry.state == EntryState::Posted {
            return Err(DepreciationError::conflict(
                "schedule_entry",
                entry_id,
                "entry is already posted; reverse it with a compensating entry instead",
            ));
        }

        let mut asset = db::get_asset(&tx, &entry.asset_id)?;
        if !asset.is_active() {
            return Err(DepreciationError::conflict(
                "asset",
                &asset.id,
                "asset was disposed after this draft was computed",
            ));
        }
        if !amounts_equal(entry.opening_book_value, asset.book_value) {
            return Err(DepreciationError::conflict(
                "schedule_entry",
                entry_id,
                "draft is stale (book value changed since computation); recompute it",
            ));
        }

        asset.accumulated_depreciation =
            round_cents(asset.accumulated_depreciation + entry.amount);
        asset.book_value = entry.closing_book_value;
        asset.units_consumed += entry.aux.units_this_period.unwrap_or(0.0);
        if entry.reaches_salvage {
            asset.fully_depreciated = true;
        }
        db::update_asset(&tx, &asset)?;

        let journal_ref = self
            .coordinator
            .submit(depreciation_journal(&entry, posting_date))
            .map_err(|e| {
                warn!(entry_id = %entry_id, error = %e, "posting rolled back");
                ledger_error(e, &self.coordinator)
            })?;

        db::mark_entry_posted(&tx, entry_id, Utc::now(), &journal_ref)?;
        tx.commit()?;

        info!(
            asset_id = %asset.id,
            entry_id = %entry_id,
            amount = entry.amount,
            journal_ref = %journal_ref,
            "depreciation posted"
        );
        Ok(journal_ref)
    }

    /// Undo a posted entry with a compensating posted entry. The original
    /// stays on the books, linked to its reversal; the period becomes
    /// schedulable again.
    pub fn reverse_schedule(
        &mut self,
        entry_id: &str,
        reversal_date: NaiveDate,
    ) -> EngineResult<ScheduleEntry> {
        let probe = db::get_entry(&self.conn, entry_id)?;
        let lock = self.locks.lock_for(&probe.asset_id);
        let _guard = lock.lock();

        let tx = self.conn.transaction()?;

        let original = db::get_entry(&tx, entry_id)?;
        if original.state != EntryState::Posted {
            return Err(DepreciationError::conflict(
                "schedule_entry",
                entry_id,
                "only posted entries can be reversed; drafts are simply recomputed",
            ));
        }
        if original.reversed_by.is_some() {
            return Err(DepreciationError::conflict(
                "schedule_entry",
                entry_id,
                "entry is already reversed",
            ));
        }

        let mut asset = db::get_asset(&tx, &original.asset_id)?;
        if !asset.is_active() {
            return Err(DepreciationError::conflict(
                "asset",
                &asset.id,
                "disposed assets cannot take reversals",
            ));
        }

        let opening = asset.book_value;
        let reversal_id = uuid::Uuid::new_v4().to_string();

        asset.accumulated_depreciation =
            round_cents(asset.accumulated_depreciation - original.amount);
        asset.book_value = round_cents(opening + original.amount);
        asset.units_consumed -= original.aux.units_this_period.unwrap_or(0.0);
        asset.fully_depreciated = asset.book_value <= asset.salvage_value + AMOUNT_TOLERANCE;
        db::update_asset(&tx, &asset)?;

        let journal_ref = self
            .coordinator
            .submit(reversal_journal(&original, &reversal_id, reversal_date))
            .map_err(|e| {
                warn!(entry_id = %entry_id, error = %e, "reversal rolled back");
                ledger_error(e, &self.coordinator)
            })?;

        let now = Utc::now();
        let reversal = ScheduleEntry {
            id: reversal_id.clone(),
            asset_id: original.asset_id.clone(),
            method: original.method,
            period_start: original.period_start,
            period_end: original.period_end,
            opening_book_value: opening,
            amount: -original.amount,
            closing_book_value: asset.book_value,
            reaches_salvage: false,
            aux: original.aux.clone(),
            state: EntryState::Posted,
            created_at: now,
            posted_at: Some(now),
            journal_ref: Some(journal_ref),
            reverses: Some(original.id.clone()),
            reversed_by: None,
            idempotency_hash: original.idempotency_hash.clone(),
        };
        db::insert_entry(&tx, &reversal)?;
        db::mark_entry_reversed(&tx, &original.id, &reversal_id)?;
        tx.commit()?;

        info!(
            asset_id = %reversal.asset_id,
            original = %original.id,
            reversal = %reversal_id,
            amount = original.amount,
            "posted entry reversed"
        );
        Ok(reversal)
    }

    // ========================================================================
    // REVALUATION
    // ========================================================================

    /// Rebase an asset's carrying value; the next schedule run depreciates
    /// from the new value
    pub fn revalue_asset(
        &mut self,
        asset_id: &str,
        date: NaiveDate,
        new_value: f64,
        valuation_method: &str,
        valuer: &str,
    ) -> EngineResult<RevaluationEvent> {
        let lock = self.locks.lock_for(asset_id);
        let _guard = lock.lock();

        let tx = self.conn.transaction()?;

        let asset = db::get_asset(&tx, asset_id)?;
        let (mut event, updated) =
            revaluation::revalue(&asset, date, new_value, valuation_method, valuer)?;

        let journal_ref = self
            .coordinator
            .submit(revaluation_journal(&event))
            .map_err(|e| {
                warn!(asset_id = %asset_id, error = %e, "revaluation rolled back");
                ledger_error(e, &self.coordinator)
            })?;
        event.reserve_reference = Some(journal_ref);

        db::insert_revaluation(&tx, &event)?;
        db::update_asset(&tx, &updated)?;
        tx.commit()?;

        info!(
            asset_id = %asset_id,
            adjustment = event.adjustment,
            routing = event.routing.as_str(),
            "asset revalued"
        );
        Ok(event)
    }

    // ========================================================================
    // DISPOSAL
    // ========================================================================

    /// Terminate an asset's ledger, realizing the gain or loss on proceeds
    pub fn dispose_asset(
        &mut self,
        asset_id: &str,
        date: NaiveDate,
        proceeds: f64,
        disposal_type: DisposalType,
    ) -> EngineResult<DisposalEvent> {
        let lock = self.locks.lock_for(asset_id);
        let _guard = lock.lock();

        let tx = self.conn.transaction()?;

        let asset = db::get_asset(&tx, asset_id)?;
        let (mut event, updated) = disposal::dispose(&asset, date, proceeds, disposal_type)?;

        // Any outstanding draft dies with the asset
        let dropped = tx.execute(
            "DELETE FROM schedule_entries WHERE asset_id = ?1 AND state = 'draft'",
            rusqlite::params![asset_id],
        )?;
        if dropped > 0 {
            debug!(asset_id = %asset_id, dropped, "discarded drafts on disposal");
        }

        let journal_ref = self
            .coordinator
            .submit(disposal_journal(&event))
            .map_err(|e| {
                warn!(asset_id = %asset_id, error = %e, "disposal rolled back");
                ledger_error(e, &self.coordinator)
            })?;
        event.journal_ref = Some(journal_ref);

        db::insert_disposal(&tx, &event)?;
        db::update_asset(&tx, &updated)?;
        tx.commit()?;

        info!(
            asset_id = %asset_id,
            proceeds,
            gain_loss = event.gain_loss,
            "asset disposed"
        );
        Ok(event)
    }

    // ========================================================================
    // BATCH
    // ========================================================================

    /// Apply the Schedule Builder across all eligible assets for a period,
    /// collecting per-asset outcomes. Drafts only; posting stays explicit.
    pub fn run_batch_depreciation(&self, request: &BatchRequest) -> EngineResult<BatchReport> {
        batch::run(
            &self.conn,
            self.db_path.as_deref(),
            &self.locks,
            self.batch_workers,
            request,
        )
    }
}

/// Build a draft schedule entry against an arbitrary connection, holding
/// the asset's lock. Shared between the engine facade and batch workers.
pub(crate) fn calculate_on(
    conn: &Connection,
    locks: &AssetLocks,
    asset_id: &str,
    period_start: NaiveDate,
    period_end: NaiveDate,
    params: &ScheduleParams,
) -> EngineResult<ScheduleEntry> {
    let lock = locks.lock_for(asset_id);
    let _guard = lock.lock();

    let asset = db::get_asset(conn, asset_id)?;
    let existing = db::entries_for_asset(conn, asset_id)?;
    let entry = schedule::build_entry(&asset, &existing, period_start, period_end, params)?;

    // Recomputation overwrites the prior same-period draft
    db::delete_draft(conn, asset_id, period_start, period_end)?;
    db::insert_entry(conn, &entry)?;

    debug!(
        asset_id = %asset_id,
        entry_id = %entry.id,
        amount = entry.amount,
        "draft schedule entry computed"
    );
    Ok(entry)
}

fn ledger_error(err: LedgerError, coordinator: &PostingCoordinator) -> DepreciationError {
    match err {
        LedgerError::Rejected(message) => DepreciationError::LedgerRejected(message),
        LedgerError::Timeout => DepreciationError::LedgerTimeout {
            timeout_ms: coordinator.timeout().as_millis() as u64,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
