// Revaluation Processor
//
// Adjusts an asset's carrying value outside the normal depreciation
// cadence, rebasing the ledger: the book value is written to the new value
// directly and subsequent schedule runs depreciate from it. History before
// the event stays immutable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::Asset;
use crate::error::{DepreciationError, EngineResult};
use crate::methods::{round_cents, AMOUNT_TOLERANCE};

// ============================================================================
// ROUTING
// ============================================================================

/// Which side of the books the adjustment lands on. Surfaced to the caller
/// rather than hidden inside the journal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevaluationRouting {
    /// Upward revaluation: credit the revaluation reserve
    ReserveCredit,
    /// Downward revaluation: debit an impairment/loss expense
    ImpairmentDebit,
}

impl RevaluationRouting {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevaluationRouting::ReserveCredit => "reserve_credit",
            RevaluationRouting::ImpairmentDebit => "impairment_debit",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "reserve_credit" => Ok(RevaluationRouting::ReserveCredit),
            "impairment_debit" => Ok(RevaluationRouting::ImpairmentDebit),
            other => Err(DepreciationError::Numeric(format!(
                "unknown revaluation routing '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// REVALUATION EVENT
// ============================================================================

/// Immutable record of one revaluation action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevaluationEvent {
    pub id: String,
    pub asset_id: String,
    pub date: NaiveDate,
    pub previous_book_value: f64,
    pub new_value: f64,
    /// `new_value - previous_book_value`, signed
    pub adjustment: f64,
    pub routing: RevaluationRouting,
    /// Journal reference for the reserve/loss leg, set on commit
    pub reserve_reference: Option<String>,
    /// How the new value was arrived at (e.g. "market", "insurance")
    pub valuation_method: String,
    /// Who performed the valuation
    pub valuer: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// Rebase an active asset's carrying value to `new_value`.
///
/// Returns the immutable event and the updated asset. The caller persists
/// both atomically together with the journal request.
pub fn revalue(
    asset: &Asset,
    date: NaiveDate,
    new_value: f64,
    valuation_method: &str,
    valuer: &str,
) -> EngineResult<(RevaluationEvent, Asset)> {
    if !asset.is_active() {
        return Err(DepreciationError::conflict(
            "asset",
            &asset.id,
            "disposed assets cannot be revalued",
        ));
    }
    if new_value <= 0.0 {
        return Err(DepreciationError::validation(
            &asset.id,
            "revalued amount must be positive",
        ));
    }
    if new_value < asset.salvage_value {
        return Err(DepreciationError::validation(
            &asset.id,
            format!(
                "revalued amount {} is below salvage value {}",
                new_value, asset.salvage_value
            ),
        ));
    }

    let adjustment = round_cents(new_value - asset.book_value);
    let routing = if adjustment >= 0.0 {
        RevaluationRouting::ReserveCredit
    } else {
        RevaluationRouting::ImpairmentDebit
    };

    let event = RevaluationEvent {
        id: uuid::Uuid::new_v4().to_string(),
        asset_id: asset.id.clone(),
        date,
        previous_book_value: asset.book_value,
        new_value,
        adjustment,
        routing,
        reserve_reference: None,
        valuation_method: valuation_method.to_string(),
        valuer: valuer.to_string(),
        created_at: Utc::now(),
    };

    let mut updated = asset.clone();
    updated.book_value = new_value;
    updated.net_revaluation = round_cents(updated.net_revaluation + adjustment);
    // Rebasing above the salvage floor makes the asset depreciable again
    updated.fully_depreciated = new_value <= updated.salvage_value + AMOUNT_TOLERANCE;

    Ok((event, updated))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetStatus;
    use crate::methods::DepreciationMethod;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_asset(book_value: f64) -> Asset {
        let mut asset = Asset::new(
            "Prayer Hall Sound System",
            80_000.0,
            5_000.0,
            DepreciationMethod::WrittenDownValue { rate: 0.2 },
            date(2023, 4, 1),
        );
        asset.accumulated_depreciation = asset.cost - book_value;
        asset.book_value = book_value;
        asset
    }

    #[test]
    fn test_upward_revaluation() {
        // 40k book value revalued to 55k -> +15k to reserve
        let asset = test_asset(40_000.0);
        let (event, updated) = revalue(&asset, date(2025, 3, 31), 55_000.0, "market", "valuer-1").unwrap();

        assert_eq!(event.adjustment, 15_000.0);
        assert_eq!(event.previous_book_value, 40_000.0);
        assert_eq!(event.routing, RevaluationRouting::ReserveCredit);
        assert_eq!(updated.book_value, 55_000.0);
        assert_eq!(updated.net_revaluation, 15_000.0);
        assert!(updated.book_value_consistent());
        // Prior state untouched
        assert_eq!(asset.book_value, 40_000.0);
    }

    #[test]
    fn test_downward_revaluation_routes_to_loss() {
        let asset = test_asset(40_000.0);
        let (event, updated) = revalue(&asset, date(2025, 3, 31), 30_000.0, "insurance", "valuer-1").unwrap();

        assert_eq!(event.adjustment, -10_000.0);
        assert_eq!(event.routing, RevaluationRouting::ImpairmentDebit);
        assert_eq!(updated.book_value, 30_000.0);
        assert_eq!(updated.net_revaluation, -10_000.0);
        assert!(updated.book_value_consistent());
    }

    #[test]
    fn test_revalue_disposed_asset_rejected() {
        let mut asset = test_asset(40_000.0);
        asset.status = AssetStatus::Disposed;
        let err = revalue(&asset, date(2025, 1, 1), 50_000.0, "market", "v").unwrap_err();
        assert!(matches!(err, DepreciationError::StateConflict { .. }));
    }

    #[test]
    fn test_revalue_below_salvage_rejected() {
        let asset = test_asset(40_000.0);
        let err = revalue(&asset, date(2025, 1, 1), 1_000.0, "market", "v").unwrap_err();
        assert!(matches!(err, DepreciationError::Validation { .. }));
    }

    #[test]
    fn test_revaluation_clears_fully_depreciated_flag() {
        let mut asset = test_asset(5_000.0);
        asset.fully_depreciated = true;
        let (_, updated) = revalue(&asset, date(2025, 1, 1), 20_000.0, "market", "v").unwrap();
        assert!(!updated.fully_depreciated);
        assert!(updated.is_depreciable());
    }
}
