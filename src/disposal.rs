// Disposal Processor
//
// Terminates an asset's ledger: records the realized gain or loss against
// the proceeds and moves the asset to its terminal status. The Schedule
// Builder rejects any later entry for the asset by checking that status.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::assets::{Asset, AssetStatus};
use crate::error::{DepreciationError, EngineResult};
use crate::methods::round_cents;

// ============================================================================
// DISPOSAL TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalType {
    Sale,
    Scrap,
    Donation,
    WriteOff,
}

impl DisposalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisposalType::Sale => "sale",
            DisposalType::Scrap => "scrap",
            DisposalType::Donation => "donation",
            DisposalType::WriteOff => "write_off",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "sale" => Ok(DisposalType::Sale),
            "scrap" => Ok(DisposalType::Scrap),
            "donation" => Ok(DisposalType::Donation),
            "write_off" => Ok(DisposalType::WriteOff),
            other => Err(DepreciationError::Numeric(format!(
                "unknown disposal type '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// DISPOSAL EVENT
// ============================================================================

/// Terminal, immutable record of an asset leaving the books
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisposalEvent {
    pub id: String,
    pub asset_id: String,
    pub date: NaiveDate,
    pub book_value_at_disposal: f64,
    pub accumulated_at_disposal: f64,
    pub proceeds: f64,
    /// `proceeds - book_value_at_disposal`, signed
    pub gain_loss: f64,
    pub disposal_type: DisposalType,
    /// Journal reference set on commit
    pub journal_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DisposalEvent {
    pub fn is_gain(&self) -> bool {
        self.gain_loss > 0.0
    }
}

// ============================================================================
// PROCESSOR
// ============================================================================

/// Dispose an active asset for the given proceeds.
///
/// Returns the terminal event and the updated asset (status `disposed`).
/// The caller persists both atomically together with the journal request.
pub fn dispose(
    asset: &Asset,
    date: NaiveDate,
    proceeds: f64,
    disposal_type: DisposalType,
) -> EngineResult<(DisposalEvent, Asset)> {
    if !asset.is_active() {
        return Err(DepreciationError::conflict(
            "asset",
            &asset.id,
            "asset is already disposed",
        ));
    }
    if proceeds < 0.0 {
        return Err(DepreciationError::validation(
            &asset.id,
            "disposal proceeds must not be negative",
        ));
    }

    let event = DisposalEvent {
        id: uuid::Uuid::new_v4().to_string(),
        asset_id: asset.id.clone(),
        date,
        book_value_at_disposal: asset.book_value,
        accumulated_at_disposal: asset.accumulated_depreciation,
        proceeds,
        gain_loss: round_cents(proceeds - asset.book_value),
        disposal_type,
        journal_ref: None,
        created_at: Utc::now(),
    };

    let mut updated = asset.clone();
    updated.status = AssetStatus::Disposed;

    Ok((event, updated))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::DepreciationMethod;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_asset(book_value: f64) -> Asset {
        let mut asset = Asset::new(
            "Community Kitchen Van",
            60_000.0,
            5_000.0,
            DepreciationMethod::StraightLine {
                useful_life_years: 8,
            },
            date(2022, 6, 1),
        );
        asset.accumulated_depreciation = asset.cost - book_value;
        asset.book_value = book_value;
        asset
    }

    #[test]
    fn test_disposal_gain() {
        // Book value 30k sold for 35k -> gain +5k
        let asset = test_asset(30_000.0);
        let (event, updated) = dispose(&asset, date(2025, 8, 1), 35_000.0, DisposalType::Sale).unwrap();

        assert_eq!(event.gain_loss, 5_000.0);
        assert!(event.is_gain());
        assert_eq!(event.book_value_at_disposal, 30_000.0);
        assert_eq!(event.accumulated_at_disposal, 30_000.0);
        assert_eq!(updated.status, AssetStatus::Disposed);
    }

    #[test]
    fn test_disposal_loss() {
        let asset = test_asset(30_000.0);
        let (event, _) = dispose(&asset, date(2025, 8, 1), 22_000.0, DisposalType::Scrap).unwrap();
        assert_eq!(event.gain_loss, -8_000.0);
        assert!(!event.is_gain());
    }

    #[test]
    fn test_double_disposal_rejected() {
        let asset = test_asset(30_000.0);
        let (_, disposed) = dispose(&asset, date(2025, 8, 1), 30_000.0, DisposalType::Sale).unwrap();
        let err = dispose(&disposed, date(2025, 9, 1), 1_000.0, DisposalType::Scrap).unwrap_err();
        assert!(matches!(err, DepreciationError::StateConflict { .. }));
    }

    #[test]
    fn test_negative_proceeds_rejected() {
        let asset = test_asset(30_000.0);
        let err = dispose(&asset, date(2025, 8, 1), -100.0, DisposalType::WriteOff).unwrap_err();
        assert!(matches!(err, DepreciationError::Validation { .. }));
    }
}
