// Posting Coordinator
//
// Bridges the engine to the external accounting ledger. The ledger itself
// is an external collaborator: this module only shapes journal requests and
// submits them under a bounded timeout. A timeout is a posting failure
// (the caller rolls back), never a silent success.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::disposal::DisposalEvent;
use crate::revaluation::{RevaluationEvent, RevaluationRouting};
use crate::schedule::ScheduleEntry;

// ============================================================================
// ACCOUNT NAMES
// ============================================================================

/// Ledger account names used by the journal requests this engine emits
pub mod accounts {
    pub const DEPRECIATION_EXPENSE: &str = "depreciation_expense";
    pub const ACCUMULATED_DEPRECIATION: &str = "accumulated_depreciation";
    pub const REVALUATION_RESERVE: &str = "revaluation_reserve";
    pub const FIXED_ASSETS: &str = "fixed_assets";
    pub const IMPAIRMENT_LOSS: &str = "impairment_loss";
    pub const DISPOSAL_GAIN: &str = "gain_on_disposal";
    pub const DISPOSAL_LOSS: &str = "loss_on_disposal";
    pub const CASH: &str = "cash";
}

// ============================================================================
// JOURNAL REQUEST
// ============================================================================

/// One posting request to the external double-entry ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRequest {
    pub debit_account: String,
    pub credit_account: String,
    pub amount: f64,
    pub date: NaiveDate,
    /// Id of the schedule entry / revaluation / disposal being committed
    pub reference_id: String,
}

/// Opaque reference returned by the ledger for a committed journal entry
pub type JournalReference = String;

/// Errors surfaced by the external ledger boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger rejected the journal entry: {0}")]
    Rejected(String),
    #[error("ledger call timed out")]
    Timeout,
}

/// External accounting ledger (general double-entry posting mechanics live
/// behind this seam; only the request/reference surface is modeled here)
pub trait AccountingLedger: Send + Sync {
    fn post_journal_entry(&self, request: &JournalRequest) -> Result<JournalReference, LedgerError>;
}

// ============================================================================
// REQUEST SHAPES
// ============================================================================

/// Debit depreciation expense, credit the accumulated-depreciation contra
pub fn depreciation_journal(entry: &ScheduleEntry, posting_date: NaiveDate) -> JournalRequest {
    JournalRequest {
        debit_account: accounts::DEPRECIATION_EXPENSE.to_string(),
        credit_account: accounts::ACCUMULATED_DEPRECIATION.to_string(),
        amount: entry.amount,
        date: posting_date,
        reference_id: entry.id.clone(),
    }
}

/// Flipped legs compensating a previously posted entry
pub fn reversal_journal(
    original: &ScheduleEntry,
    reversal_id: &str,
    posting_date: NaiveDate,
) -> JournalRequest {
    JournalRequest {
        debit_account: accounts::ACCUMULATED_DEPRECIATION.to_string(),
        credit_account: accounts::DEPRECIATION_EXPENSE.to_string(),
        amount: original.amount,
        date: posting_date,
        reference_id: reversal_id.to_string(),
    }
}

/// An increase credits the revaluation reserve; a decrease debits loss
pub fn revaluation_journal(event: &RevaluationEvent) -> JournalRequest {
    let (debit, credit) = match event.routing {
        RevaluationRouting::ReserveCredit => {
            (accounts::FIXED_ASSETS, accounts::REVALUATION_RESERVE)
        }
        RevaluationRouting::ImpairmentDebit => (accounts::IMPAIRMENT_LOSS, accounts::FIXED_ASSETS),
    };
    JournalRequest {
        debit_account: debit.to_string(),
        credit_account: credit.to_string(),
        amount: event.adjustment.abs(),
        date: event.date,
        reference_id: event.id.clone(),
    }
}

/// One journal per disposal: gain/loss oriented when nonzero, otherwise the
/// proceeds against the asset account
pub fn disposal_journal(event: &DisposalEvent) -> JournalRequest {
    let (debit, credit, amount) = if event.gain_loss > 0.0 {
        (accounts::FIXED_ASSETS, accounts::DISPOSAL_GAIN, event.gain_loss)
    } else if event.gain_loss < 0.0 {
        (
            accounts::DISPOSAL_LOSS,
            accounts::FIXED_ASSETS,
            -event.gain_loss,
        )
    } else {
        (accounts::CASH, accounts::FIXED_ASSETS, event.proceeds)
    };
    JournalRequest {
        debit_account: debit.to_string(),
        credit_account: credit.to_string(),
        amount,
        date: event.date,
        reference_id: event.id.clone(),
    }
}

// ============================================================================
// POSTING COORDINATOR
// ============================================================================

/// Default bound on external ledger calls
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(5);

/// Submits journal requests to the external ledger under a bounded timeout.
/// Shared by posting, reversal, revaluation and disposal commits.
#[derive(Clone)]
pub struct PostingCoordinator {
    ledger: Arc<dyn AccountingLedger>,
    timeout: Duration,
}

impl PostingCoordinator {
    pub fn new(ledger: Arc<dyn AccountingLedger>) -> Self {
        PostingCoordinator {
            ledger,
            timeout: DEFAULT_LEDGER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Submit one journal request, bounded by the configured timeout.
    ///
    /// The call runs on a helper thread so a hung ledger cannot block the
    /// engine past the bound; a late answer is discarded.
    pub fn submit(&self, request: JournalRequest) -> Result<JournalReference, LedgerError> {
        let (tx, rx) = mpsc::channel();
        let ledger = Arc::clone(&self.ledger);
        std::thread::spawn(move || {
            let result = ledger.post_journal_entry(&request);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "ledger call timed out");
                Err(LedgerError::Timeout)
            }
        }
    }
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

/// In-memory ledger used by tests and the demo binary. Records every
/// accepted request and can be switched into rejecting or hanging mode to
/// exercise the rollback paths.
#[derive(Default)]
pub struct InMemoryLedger {
    accepted: Mutex<Vec<JournalRequest>>,
    reject: AtomicBool,
    hang: AtomicBool,
    counter: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent posts fail with a rejection
    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Make subsequent posts block until well past any sane timeout
    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> Vec<JournalRequest> {
        self.accepted.lock().clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }
}

impl AccountingLedger for InMemoryLedger {
    fn post_journal_entry(&self, request: &JournalRequest) -> Result<JournalReference, LedgerError> {
        if self.hang.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(60));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(LedgerError::Rejected("ledger unavailable".to_string()));
        }
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.accepted.lock().push(request.clone());
        Ok(format!("JRN-{:06}", seq))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Asset;
    use crate::disposal::{dispose, DisposalType};
    use crate::methods::DepreciationMethod;
    use crate::revaluation::revalue;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request() -> JournalRequest {
        JournalRequest {
            debit_account: accounts::DEPRECIATION_EXPENSE.to_string(),
            credit_account: accounts::ACCUMULATED_DEPRECIATION.to_string(),
            amount: 18_000.0,
            date: date(2024, 12, 31),
            reference_id: "entry-1".to_string(),
        }
    }

    #[test]
    fn test_in_memory_ledger_accepts_and_references() {
        let ledger = InMemoryLedger::new();
        let r1 = ledger.post_journal_entry(&request()).unwrap();
        let r2 = ledger.post_journal_entry(&request()).unwrap();
        assert_eq!(r1, "JRN-000001");
        assert_eq!(r2, "JRN-000002");
        assert_eq!(ledger.accepted_count(), 2);
    }

    #[test]
    fn test_coordinator_propagates_rejection() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_rejecting(true);
        let coordinator = PostingCoordinator::new(ledger.clone());
        let err = coordinator.submit(request()).unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
        assert_eq!(ledger.accepted_count(), 0);
    }

    #[test]
    fn test_coordinator_times_out_on_hung_ledger() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_hanging(true);
        let coordinator =
            PostingCoordinator::new(ledger.clone()).with_timeout(Duration::from_millis(50));
        let err = coordinator.submit(request()).unwrap_err();
        assert_eq!(err, LedgerError::Timeout);
    }

    #[test]
    fn test_revaluation_journal_routing() {
        let asset = Asset::new(
            "Marble Statue",
            50_000.0,
            1_000.0,
            DepreciationMethod::WrittenDownValue { rate: 0.1 },
            date(2020, 1, 1),
        );
        let (up, _) = revalue(&asset, date(2025, 1, 1), 60_000.0, "market", "v").unwrap();
        let journal = revaluation_journal(&up);
        assert_eq!(journal.credit_account, accounts::REVALUATION_RESERVE);
        assert_eq!(journal.amount, 10_000.0);

        let (down, _) = revalue(&asset, date(2025, 1, 1), 45_000.0, "market", "v").unwrap();
        let journal = revaluation_journal(&down);
        assert_eq!(journal.debit_account, accounts::IMPAIRMENT_LOSS);
        assert_eq!(journal.amount, 5_000.0);
    }

    #[test]
    fn test_disposal_journal_orientation() {
        let mut asset = Asset::new(
            "Old Projector",
            20_000.0,
            0.0,
            DepreciationMethod::StraightLine {
                useful_life_years: 4,
            },
            date(2020, 1, 1),
        );
        asset.accumulated_depreciation = 15_000.0;
        asset.book_value = 5_000.0;

        let (gain, _) = dispose(&asset, date(2025, 1, 1), 7_000.0, DisposalType::Sale).unwrap();
        let journal = disposal_journal(&gain);
        assert_eq!(journal.credit_account, accounts::DISPOSAL_GAIN);
        assert_eq!(journal.amount, 2_000.0);

        let (loss, _) = dispose(&asset, date(2025, 1, 1), 1_000.0, DisposalType::Scrap).unwrap();
        let journal = disposal_journal(&loss);
        assert_eq!(journal.debit_account, accounts::DISPOSAL_LOSS);
        assert_eq!(journal.amount, 4_000.0);

        let (flat, _) = dispose(&asset, date(2025, 1, 1), 5_000.0, DisposalType::Sale).unwrap();
        let journal = disposal_journal(&flat);
        assert_eq!(journal.debit_account, accounts::CASH);
        assert_eq!(journal.amount, 5_000.0);
    }
}
