//! Waste unit-economics formulas.
//!
//! All money and tonnage math runs on `rust_decimal` so intermediate results
//! stay exact. Every function validates its inputs and returns
//! `FormulaError::InvalidInput` instead of dividing by zero.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::FormulaError;

/// Cubic yards of loose waste equivalent to one compacted ton.
pub const YARDS_PER_COMPACTED_TON: Decimal = dec!(14.49);

/// Average weeks per month, used to monthlyize weekly pickup schedules.
pub const WEEKS_PER_MONTH: Decimal = dec!(4.33);

/// Compactor monitoring pays off below this average tons per haul.
pub const MONITORING_TONS_THRESHOLD: Decimal = dec!(7);

/// ...as long as hauls are at most this many days apart.
pub const MONITORING_MAX_INTERVAL_DAYS: Decimal = dec!(14);

/// Contamination charges above this share of total spend flag a problem.
pub const CONTAMINATION_RATIO_THRESHOLD: Decimal = dec!(0.03);

/// Monthly bulk charges above this flag a subscription opportunity.
pub const BULK_CHARGES_THRESHOLD: Decimal = dec!(500);

/// Equipment class a property is served by. Decides which yards-per-door
/// formula applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Compactor,
    Dumpster,
}

impl ServiceType {
    /// Parse the `equipment_type` column.
    pub fn parse(s: &str) -> Result<Self, FormulaError> {
        match s {
            "compactor" => Ok(ServiceType::Compactor),
            "dumpster" => Ok(ServiceType::Dumpster),
            _ => Err(FormulaError::InvalidInput {
                field: "equipment_type",
                message: "must be 'compactor' or 'dumpster'",
            }),
        }
    }
}

// ── Core metrics ────────────────────────────────────────────────────

/// Monthly waste spend per unit, in dollars per door.
pub fn cost_per_door(monthly_total: Decimal, unit_count: u32) -> Result<Decimal, FormulaError> {
    if monthly_total < Decimal::ZERO {
        return Err(FormulaError::negative("monthly_total"));
    }
    let units = decimal_units(unit_count)?;
    Ok(monthly_total / units)
}

/// Monthly loose-yardage service level per unit, for dumpster properties:
/// `container_qty × container_size × pickups_per_week × 4.33 / units`.
pub fn yards_per_door_loose(
    container_qty: u32,
    container_size_yards: Decimal,
    pickups_per_week: u32,
    unit_count: u32,
) -> Result<Decimal, FormulaError> {
    if container_qty == 0 {
        return Err(FormulaError::non_positive("container_qty"));
    }
    if container_size_yards <= Decimal::ZERO {
        return Err(FormulaError::non_positive("container_size_yards"));
    }
    if pickups_per_week == 0 {
        return Err(FormulaError::non_positive("pickups_per_week"));
    }
    let units = decimal_units(unit_count)?;
    Ok(Decimal::from(container_qty)
        * container_size_yards
        * Decimal::from(pickups_per_week)
        * WEEKS_PER_MONTH
        / units)
}

/// Loose-yardage equivalent per unit for compactor properties:
/// `tons × 14.49 / units`.
pub fn yards_per_door_compacted(
    total_tons: Decimal,
    unit_count: u32,
) -> Result<Decimal, FormulaError> {
    if total_tons < Decimal::ZERO {
        return Err(FormulaError::negative("total_tons"));
    }
    let units = decimal_units(unit_count)?;
    Ok(total_tons * YARDS_PER_COMPACTED_TON / units)
}

/// Average tons moved per haul.
pub fn tons_per_haul(total_tons: Decimal, haul_count: u32) -> Result<Decimal, FormulaError> {
    if total_tons < Decimal::ZERO {
        return Err(FormulaError::negative("total_tons"));
    }
    if haul_count == 0 {
        return Err(FormulaError::non_positive("haul_count"));
    }
    Ok(total_tons / Decimal::from(haul_count))
}

/// Average days between pickups given a monthly haul count.
pub fn days_between_pickups(hauls_per_month: u32) -> Result<Decimal, FormulaError> {
    if hauls_per_month == 0 {
        return Err(FormulaError::non_positive("hauls_per_month"));
    }
    Ok(dec!(30) / Decimal::from(hauls_per_month))
}

/// Monthlyize a weekly pickup count.
pub fn pickups_per_month(pickups_per_week: u32) -> Decimal {
    Decimal::from(pickups_per_week) * WEEKS_PER_MONTH
}

// ── Recommendation gates ────────────────────────────────────────────

/// Compactor monitoring: true when hauls leave with light loads (< 7 tons on
/// average) despite frequent service (longest gap ≤ 14 days). Full compactors
/// can never trip this gate.
pub fn recommend_compactor_monitoring(
    avg_tons_per_haul: Decimal,
    max_days_between_hauls: Decimal,
) -> bool {
    avg_tons_per_haul < MONITORING_TONS_THRESHOLD
        && max_days_between_hauls <= MONITORING_MAX_INTERVAL_DAYS
}

/// Contamination reduction program: true when contamination charges exceed 3%
/// of total spend. A zero or negative total never recommends.
pub fn recommend_contamination_reduction(
    contamination_charges: Decimal,
    total_amount: Decimal,
) -> bool {
    if total_amount <= Decimal::ZERO {
        return false;
    }
    contamination_charges / total_amount > CONTAMINATION_RATIO_THRESHOLD
}

/// Bulk pickup subscription: true when ad-hoc bulk charges exceed $500 per
/// month.
pub fn recommend_bulk_subscription(monthly_bulk_charges: Decimal) -> bool {
    monthly_bulk_charges > BULK_CHARGES_THRESHOLD
}

/// Service-type-aware yards-per-door dispatcher used by the cost optimizer.
pub fn yards_per_door(
    service: ServiceType,
    container_qty: u32,
    container_size_yards: Decimal,
    pickups_per_week: u32,
    total_tons: Decimal,
    unit_count: u32,
) -> Result<Decimal, FormulaError> {
    match service {
        ServiceType::Dumpster => {
            yards_per_door_loose(container_qty, container_size_yards, pickups_per_week, unit_count)
        }
        ServiceType::Compactor => yards_per_door_compacted(total_tons, unit_count),
    }
}

fn decimal_units(unit_count: u32) -> Result<Decimal, FormulaError> {
    if unit_count == 0 {
        return Err(FormulaError::non_positive("unit_count"));
    }
    Ok(Decimal::from(unit_count))
}
