// Fixed-Asset Entity
//
// Identity is a stable UUID; the cached book value is a derived projection
// over the posted schedule/revaluation/disposal events and must always be
// reconstructible by replaying them (see db::replay_ledger).
//
// Invariant: book_value = cost - accumulated_depreciation + net_revaluation,
// and book_value >= salvage_value while the asset is active and depreciable.
// Only the Schedule Builder (via posting), the Revaluation Processor, and the
// Disposal Processor may mutate the ledger fields.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DepreciationError, EngineResult};
use crate::methods::{amounts_equal, AssetBasis, DepreciationMethod, AMOUNT_TOLERANCE};

// ============================================================================
// LIFECYCLE STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// In service, depreciable
    Active,
    /// Terminal state; no further schedule entries may be created
    Disposed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "active",
            AssetStatus::Disposed => "disposed",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "active" => Ok(AssetStatus::Active),
            "disposed" => Ok(AssetStatus::Disposed),
            other => Err(DepreciationError::Numeric(format!(
                "unknown asset status '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// ASSET ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Stable identity (UUID) - never changes
    pub id: String,

    /// Display name (e.g. "Main Hall Generator")
    pub name: String,

    /// Acquisition cost
    pub cost: f64,

    /// Floor value below which the asset is not further depreciated
    pub salvage_value: f64,

    /// Configured depreciation method with its parameters
    pub method: DepreciationMethod,

    /// Date depreciation begins (usually the in-service date)
    pub depreciation_start: NaiveDate,

    /// Cumulative units consumed (units-of-production only; advanced on post)
    pub units_consumed: f64,

    /// Sum of posted depreciation amounts
    pub accumulated_depreciation: f64,

    /// Signed sum of revaluation adjustments
    pub net_revaluation: f64,

    /// Cached projection: cost - accumulated + net_revaluation
    pub book_value: f64,

    /// Set once the book value reaches the salvage floor
    pub fully_depreciated: bool,

    pub status: AssetStatus,

    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(
        name: impl Into<String>,
        cost: f64,
        salvage_value: f64,
        method: DepreciationMethod,
        depreciation_start: NaiveDate,
    ) -> Self {
        Asset {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            cost,
            salvage_value,
            method,
            depreciation_start,
            units_consumed: 0.0,
            accumulated_depreciation: 0.0,
            net_revaluation: 0.0,
            book_value: cost,
            fully_depreciated: false,
            status: AssetStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Validate the configuration before registration
    pub fn validate(&self) -> EngineResult<()> {
        if self.cost <= 0.0 {
            return Err(DepreciationError::validation(
                &self.id,
                "acquisition cost must be positive",
            ));
        }
        if self.salvage_value < 0.0 {
            return Err(DepreciationError::validation(
                &self.id,
                "salvage value must not be negative",
            ));
        }
        if self.salvage_value > self.cost {
            return Err(DepreciationError::validation(
                &self.id,
                "salvage value must not exceed acquisition cost",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(DepreciationError::validation(&self.id, "name is required"));
        }
        self.method.validate()
    }

    pub fn is_active(&self) -> bool {
        self.status == AssetStatus::Active
    }

    /// Whether the Schedule Builder may create entries for this asset
    pub fn is_depreciable(&self) -> bool {
        self.is_active()
            && !self.fully_depreciated
            && self.book_value > self.salvage_value + AMOUNT_TOLERANCE
    }

    /// Snapshot handed to the method calculators
    pub fn basis(&self) -> AssetBasis {
        AssetBasis {
            cost: self.cost,
            salvage_value: self.salvage_value,
            opening_book_value: self.book_value,
        }
    }

    /// Check the cached projection against its defining identity
    pub fn book_value_consistent(&self) -> bool {
        amounts_equal(
            self.book_value,
            self.cost - self.accumulated_depreciation + self.net_revaluation,
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn start_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn test_asset() -> Asset {
        Asset::new(
            "Main Hall Generator",
            100_000.0,
            10_000.0,
            DepreciationMethod::StraightLine {
                useful_life_years: 5,
            },
            start_date(),
        )
    }

    #[test]
    fn test_new_asset_defaults() {
        let asset = test_asset();
        assert_eq!(asset.book_value, 100_000.0);
        assert_eq!(asset.accumulated_depreciation, 0.0);
        assert_eq!(asset.status, AssetStatus::Active);
        assert!(asset.is_depreciable());
        assert!(asset.book_value_consistent());
        assert!(asset.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_salvage() {
        let mut asset = test_asset();
        asset.salvage_value = 200_000.0;
        assert!(asset.validate().is_err());

        asset.salvage_value = -1.0;
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_cost() {
        let mut asset = test_asset();
        asset.cost = 0.0;
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_method() {
        let mut asset = test_asset();
        asset.method = DepreciationMethod::StraightLine {
            useful_life_years: 0,
        };
        assert!(asset.validate().is_err());
    }

    #[test]
    fn test_depreciable_checks() {
        let mut asset = test_asset();
        assert!(asset.is_depreciable());

        asset.fully_depreciated = true;
        assert!(!asset.is_depreciable());

        asset.fully_depreciated = false;
        asset.status = AssetStatus::Disposed;
        assert!(!asset.is_depreciable());

        asset.status = AssetStatus::Active;
        asset.book_value = asset.salvage_value;
        assert!(!asset.is_depreciable());
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(
            AssetStatus::parse(AssetStatus::Disposed.as_str()).unwrap(),
            AssetStatus::Disposed
        );
        assert!(AssetStatus::parse("scrapped").is_err());
    }
}
