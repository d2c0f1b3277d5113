// Schedule Builder
//
// For one asset and one period: selects the configured method strategy,
// validates preconditions, and produces a draft schedule entry
// (opening value, amount, closing value). Drafts may be recomputed and
// overwritten; posted entries are immutable and only a compensating
// reversal may undo them.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::assets::Asset;
use crate::error::{DepreciationError, EngineResult};
use crate::methods::{AuxFields, MethodKind, PeriodInput};

// ============================================================================
// ENTRY STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Computed but not yet committed; may be recomputed freely
    Draft,
    /// Committed and immutable; undone only by a compensating entry
    Posted,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Draft => "draft",
            EntryState::Posted => "posted",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "draft" => Ok(EntryState::Draft),
            "posted" => Ok(EntryState::Posted),
            other => Err(DepreciationError::Numeric(format!(
                "unknown entry state '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// SCHEDULE ENTRY
// ============================================================================

/// One row per (asset, period). At most one draft or posted entry may cover
/// a period at a time; compensating reversals are exempt from that rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub asset_id: String,
    pub method: MethodKind,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub opening_book_value: f64,
    pub amount: f64,
    pub closing_book_value: f64,
    /// Set when this entry drove the asset down to its salvage floor
    pub reaches_salvage: bool,
    /// Method-specific fields (units, interest/principal split, fund deposit)
    pub aux: AuxFields,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Journal reference returned by the external ledger on posting
    pub journal_ref: Option<String>,
    /// Id of the posted entry this one compensates, if a reversal
    pub reverses: Option<String>,
    /// Id of the compensating entry that reversed this one, if any
    pub reversed_by: Option<String>,
    /// Dedup key over (asset, period); NULL-reverses rows are unique on it
    pub idempotency_hash: String,
}

impl ScheduleEntry {
    /// Hash over the (asset, period) pair, mirroring how imported records
    /// are deduplicated elsewhere in the system
    pub fn compute_idempotency_hash(
        asset_id: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}{}", asset_id, period_start, period_end));
        format!("{:x}", hasher.finalize())
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.period_start <= end && start <= self.period_end
    }

    pub fn same_period(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.period_start == start && self.period_end == end
    }

    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }

    /// Whether this entry still occupies its period for overlap purposes.
    /// Reversals and reversed entries no longer block new schedules.
    pub fn occupies_period(&self) -> bool {
        self.reverses.is_none() && self.reversed_by.is_none()
    }
}

// ============================================================================
// PERIOD PRORATION
// ============================================================================

/// Fraction of a year covered by the inclusive period [start, end].
///
/// A span of exactly k whole calendar months prorates to k/12 so that
/// calendar years and quarters come out exact; anything else prorates by
/// day count over 365. Partial first periods are just shorter periods.
pub fn year_fraction(start: NaiveDate, end: NaiveDate) -> EngineResult<f64> {
    if end < start {
        return Err(DepreciationError::Numeric(format!(
            "period end {} precedes period start {}",
            end, start
        )));
    }

    let months = (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32) + 1;
    if months > 0 {
        if let Some(boundary) = start.checked_add_months(Months::new(months as u32)) {
            if boundary.pred_opt() == Some(end) {
                return Ok(months as f64 / 12.0);
            }
        }
    }

    let days = (end - start).num_days() + 1;
    Ok(days as f64 / 365.0)
}

// ============================================================================
// BUILDER INPUTS
// ============================================================================

/// Optional per-run overrides supplied by the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleParams {
    /// Units produced this period (required for units-of-production assets)
    pub units_this_period: Option<f64>,
    /// Override the calendar-derived year fraction
    pub year_fraction: Option<f64>,
}

// ============================================================================
// SCHEDULE BUILDER
// ============================================================================

/// Build a draft schedule entry for one asset and one period.
///
/// Pure over its inputs: the caller supplies the asset's current state and
/// the existing entries for overlap checking, and persists the result.
/// Recomputing an existing draft for the same period is allowed (the caller
/// replaces it); any overlap with a posted entry is rejected.
pub fn build_entry(
    asset: &Asset,
    existing: &[ScheduleEntry],
    period_start: NaiveDate,
    period_end: NaiveDate,
    params: &ScheduleParams,
) -> EngineResult<ScheduleEntry> {
    if !asset.is_active() {
        return Err(DepreciationError::conflict(
            "asset",
            &asset.id,
            "asset is disposed; no further schedule entries may be created",
        ));
    }
    if !asset.is_depreciable() {
        return Err(DepreciationError::validation(
            &asset.id,
            "asset is not depreciable (fully depreciated or at salvage floor)",
        ));
    }
    if period_end < period_start {
        return Err(DepreciationError::validation(
            &asset.id,
            format!("period end {} precedes start {}", period_end, period_start),
        ));
    }

    for entry in existing.iter().filter(|e| e.occupies_period()) {
        if !entry.overlaps(period_start, period_end) {
            continue;
        }
        match entry.state {
            EntryState::Posted => {
                return Err(DepreciationError::conflict(
                    "schedule_entry",
                    &entry.id,
                    format!(
                        "period {}..{} already covered by a posted entry; reverse it explicitly instead",
                        entry.period_start, entry.period_end
                    ),
                ));
            }
            EntryState::Draft if !entry.same_period(period_start, period_end) => {
                return Err(DepreciationError::conflict(
                    "schedule_entry",
                    &entry.id,
                    format!(
                        "overlapping draft exists for {}..{}",
                        entry.period_start, entry.period_end
                    ),
                ));
            }
            // Same-period draft: recomputation overwrites it
            EntryState::Draft => {}
        }
    }

    let fraction = match params.year_fraction {
        Some(f) => f,
        None => year_fraction(period_start, period_end)?,
    };
    let period = PeriodInput {
        year_fraction: fraction,
        units_this_period: params.units_this_period,
    };

    let computed = asset.method.compute(&asset.basis(), &period)?;

    Ok(ScheduleEntry {
        id: uuid::Uuid::new_v4().to_string(),
        asset_id: asset.id.clone(),
        method: asset.method.kind(),
        period_start,
        period_end,
        opening_book_value: asset.book_value,
        amount: computed.amount,
        closing_book_value: computed.closing_book_value,
        reaches_salvage: computed.fully_depreciated,
        aux: computed.aux,
        state: EntryState::Draft,
        created_at: Utc::now(),
        posted_at: None,
        journal_ref: None,
        reverses: None,
        reversed_by: None,
        idempotency_hash: ScheduleEntry::compute_idempotency_hash(
            &asset.id,
            period_start,
            period_end,
        ),
    })
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

    fn test_asset() -> Asset {
        Asset::new(
            "Kitchen Cold Store",
            100_000.0,
            10_000.0,
            DepreciationMethod::StraightLine {
                useful_life_years: 5,
            },
            date(2024, 1, 1),
        )
    }

    #[test]
    fn test_year_fraction_whole_year() {
        let f = year_fraction(date(2024, 1, 1), date(2024, 12, 31)).unwrap();
        assert_eq!(f, 1.0);
        // Leap year still counts as exactly one year
        let f = year_fraction(date(2023, 7, 1), date(2024, 6, 30)).unwrap();
        assert_eq!(f, 1.0);
    }

    #[test]
    fn test_year_fraction_quarter_and_days() {
        let f = year_fraction(date(2024, 1, 1), date(2024, 3, 31)).unwrap();
        assert_eq!(f, 0.25);
        // 73 days, not month-aligned
        let f = year_fraction(date(2024, 1, 15), date(2024, 3, 27)).unwrap();
        assert!((f - 73.0 / 365.0).abs() < 1e-9);
    }

    #[test]
    fn test_year_fraction_rejects_inverted_period() {
        assert!(year_fraction(date(2024, 6, 1), date(2024, 1, 1)).is_err());
    }

    #[test]
    fn test_build_full_year_draft() {
        let asset = test_asset();
        let entry = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap();

        assert_eq!(entry.state, EntryState::Draft);
        assert_eq!(entry.opening_book_value, 100_000.0);
        assert_eq!(entry.amount, 18_000.0);
        assert_eq!(entry.closing_book_value, 82_000.0);
        assert_eq!(entry.method, MethodKind::StraightLine);
        assert!(entry.journal_ref.is_none());
    }

    #[test]
    fn test_recompute_same_period_draft_is_idempotent() {
        let asset = test_asset();
        let first = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap();

        let second = build_entry(
            &asset,
            std::slice::from_ref(&first),
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap();

        assert_eq!(second.amount, first.amount);
        assert_eq!(second.opening_book_value, first.opening_book_value);
        assert_eq!(second.closing_book_value, first.closing_book_value);
        assert_eq!(second.idempotency_hash, first.idempotency_hash);
    }

    #[test]
    fn test_overlapping_posted_entry_rejected() {
        let asset = test_asset();
        let mut posted = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap();
        posted.state = EntryState::Posted;

        let err = build_entry(
            &asset,
            std::slice::from_ref(&posted),
            date(2024, 6, 1),
            date(2025, 5, 31),
            &ScheduleParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DepreciationError::StateConflict { .. }));
    }

    #[test]
    fn test_overlapping_different_draft_rejected() {
        let asset = test_asset();
        let draft = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap();

        let err = build_entry(
            &asset,
            std::slice::from_ref(&draft),
            date(2024, 7, 1),
            date(2025, 6, 30),
            &ScheduleParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DepreciationError::StateConflict { .. }));
    }

    #[test]
    fn test_disposed_asset_rejected() {
        let mut asset = test_asset();
        asset.status = AssetStatus::Disposed;
        let err = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DepreciationError::StateConflict { .. }));
    }

    #[test]
    fn test_fully_depreciated_asset_rejected() {
        let mut asset = test_asset();
        asset.fully_depreciated = true;
        let err = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DepreciationError::Validation { .. }));
    }

    #[test]
    fn test_units_method_requires_units_param() {
        let mut asset = test_asset();
        asset.method = DepreciationMethod::UnitsOfProduction {
            total_estimated_units: 50_000.0,
        };
        let err = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DepreciationError::Numeric(_)));

        let entry = build_entry(
            &asset,
            &[],
            date(2024, 1, 1),
            date(2024, 12, 31),
            &ScheduleParams {
                units_this_period: Some(5_000.0),
                year_fraction: None,
            },
        )
        .unwrap();
        assert_eq!(entry.amount, 9_000.0);
        assert_eq!(entry.aux.units_this_period, Some(5_000.0));
    }
}
