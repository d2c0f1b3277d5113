// Error taxonomy for the depreciation engine
//
// Every rejected precondition carries enough detail for the caller to tell
// which category it falls into: validation, numeric, state conflict,
// external ledger, or storage. Nothing is silently swallowed.

use thiserror::Error;

/// Result type alias for depreciation engine operations
pub type EngineResult<T> = Result<T, DepreciationError>;

/// Coarse category, used by callers that route errors rather than match
/// individual variants (e.g. the batch report and the API layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid or missing input, rejected before any state change
    Validation,
    /// Degenerate method parameters (zero life, zero units, negative amount)
    Numeric,
    /// Operation conflicts with entity lifecycle state
    StateConflict,
    /// External ledger failure or timeout; retryable after rollback
    External,
    /// Persistence layer failure
    Storage,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Numeric => "numeric",
            ErrorCategory::StateConflict => "state_conflict",
            ErrorCategory::External => "external",
            ErrorCategory::Storage => "storage",
        }
    }
}

/// Main error type for depreciation engine operations
#[derive(Error, Debug)]
pub enum DepreciationError {
    /// Precondition violated before any state change
    #[error("validation failed for asset {asset_id}: {message}")]
    Validation { asset_id: String, message: String },

    /// Degenerate numeric input rejected at the method boundary
    #[error("invalid method parameters: {0}")]
    Numeric(String),

    /// Operation conflicts with the entity's lifecycle state
    #[error("state conflict on {entity} {id}: {message}")]
    StateConflict {
        entity: &'static str,
        id: String,
        message: String,
    },

    /// External ledger rejected the journal request; the whole operation
    /// was rolled back and may be retried
    #[error("journal posting failed (rolled back, retryable): {0}")]
    LedgerRejected(String),

    /// External ledger did not answer within the bounded timeout; treated
    /// as a posting failure, never as a silent success
    #[error("journal posting timed out after {timeout_ms}ms (rolled back, retryable)")]
    LedgerTimeout { timeout_ms: u64 },

    /// Asset id not present in the registry
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    /// Schedule entry id not present
    #[error("schedule entry not found: {0}")]
    EntryNotFound(String),

    /// SQLite error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A stored row failed to parse back into its entity
    #[error("corrupt stored record: {0}")]
    Corrupt(String),

    /// Metadata (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DepreciationError {
    /// Build a validation error with the violated precondition spelled out
    pub fn validation(asset_id: impl Into<String>, message: impl Into<String>) -> Self {
        DepreciationError::Validation {
            asset_id: asset_id.into(),
            message: message.into(),
        }
    }

    /// Build a state-conflict error for an entity
    pub fn conflict(entity: &'static str, id: impl Into<String>, message: impl Into<String>) -> Self {
        DepreciationError::StateConflict {
            entity,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DepreciationError::Validation { .. } => ErrorCategory::Validation,
            DepreciationError::Numeric(_) => ErrorCategory::Numeric,
            DepreciationError::StateConflict { .. } => ErrorCategory::StateConflict,
            DepreciationError::LedgerRejected(_) | DepreciationError::LedgerTimeout { .. } => {
                ErrorCategory::External
            }
            DepreciationError::AssetNotFound(_) | DepreciationError::EntryNotFound(_) => {
                ErrorCategory::Validation
            }
            DepreciationError::Storage(_)
            | DepreciationError::Serde(_)
            | DepreciationError::Corrupt(_) => ErrorCategory::Storage,
        }
    }

    /// Whether the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::External
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = DepreciationError::validation("asset-1", "useful life must be positive");
        assert_eq!(
            err.to_string(),
            "validation failed for asset asset-1: useful life must be positive"
        );
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_conflict_error_display() {
        let err = DepreciationError::conflict("schedule_entry", "e-9", "already posted");
        assert_eq!(
            err.to_string(),
            "state conflict on schedule_entry e-9: already posted"
        );
        assert_eq!(err.category(), ErrorCategory::StateConflict);
    }

    #[test]
    fn test_ledger_errors_are_retryable() {
        assert!(DepreciationError::LedgerRejected("down".to_string()).is_retryable());
        assert!(DepreciationError::LedgerTimeout { timeout_ms: 500 }.is_retryable());
        assert!(!DepreciationError::Numeric("zero life".to_string()).is_retryable());
    }

    #[test]
    fn test_category_as_str() {
        assert_eq!(ErrorCategory::External.as_str(), "external");
        assert_eq!(ErrorCategory::StateConflict.as_str(), "state_conflict");
    }
}
