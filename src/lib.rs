// Temple Asset Depreciation Engine - Core Library
// Exposes all modules for use in the demo binary and tests

pub mod assets;
pub mod batch;
pub mod db;
pub mod disposal;
pub mod engine;
pub mod error;
pub mod methods;
pub mod posting;
pub mod revaluation;
pub mod schedule;

// Re-export commonly used types
pub use assets::{Asset, AssetStatus};
pub use batch::{BatchFailure, BatchFilter, BatchReport, BatchRequest, BatchSuccess};
pub use db::{open_database, replay_ledger, setup_database, ReplayedLedger};
pub use disposal::{dispose, DisposalEvent, DisposalType};
pub use engine::{AssetLocks, DepreciationEngine};
pub use error::{DepreciationError, EngineResult, ErrorCategory};
pub use methods::{
    wdv_rate_from_life, AssetBasis, AuxFields, Computation, DepreciationMethod, MethodKind,
    PeriodInput,
};
pub use posting::{
    accounts, AccountingLedger, InMemoryLedger, JournalReference, JournalRequest, LedgerError,
    PostingCoordinator,
};
pub use revaluation::{revalue, RevaluationEvent, RevaluationRouting};
pub use schedule::{build_entry, year_fraction, EntryState, ScheduleEntry, ScheduleParams};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
