use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{EventId, RowPricingId, StageId, TenantId, TriggerId, ZoneId};
use super::money::Money;

/// How a price stage changes the running price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StageModifier {
    /// Signed percentage: `-20` is a 20% discount.
    Percentage(Decimal),
    /// Replaces the running price.
    Fixed(Money),
}

impl StageModifier {
    pub fn apply(&self, running: Money) -> Money {
        match self {
            StageModifier::Percentage(pct) => running.apply_percent(*pct).max(Money::ZERO),
            StageModifier::Fixed(price) => *price,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageModifier::Percentage(_) => "percentage",
            StageModifier::Fixed(_) => "fixed",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            StageModifier::Percentage(pct) => *pct,
            StageModifier::Fixed(price) => price.amount(),
        }
    }
}

/// Time- or quantity-windowed price modifier ("early bird", "last minute").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStage {
    pub id: StageId,
    pub tenant_id: TenantId,
    pub event_id: EventId,
    pub name: String,
    /// Empty means every zone of the event.
    pub zone_ids: Vec<ZoneId>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Stage stops applying once this many units are sold in its scope.
    pub units_ceiling: Option<i64>,
    pub modifier: StageModifier,
    pub priority: i32,
}

impl PriceStage {
    pub fn applies_to_zone(&self, zone_id: ZoneId) -> bool {
        self.zone_ids.is_empty() || self.zone_ids.contains(&zone_id)
    }

    /// `[starts_at, ends_at)` contains `at`.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }

    pub fn under_ceiling(&self, units_sold: i64) -> bool {
        self.units_ceiling.map_or(true, |ceiling| units_sold < ceiling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RowAdjustment {
    Multiplier(Decimal),
    Fixed(Money),
}

impl RowAdjustment {
    pub fn apply(&self, base: Money) -> Money {
        match self {
            RowAdjustment::Multiplier(factor) => base.scale(*factor),
            RowAdjustment::Fixed(price) => *price,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RowAdjustment::Multiplier(_) => "multiplier",
            RowAdjustment::Fixed(_) => "fixed",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            RowAdjustment::Multiplier(factor) => *factor,
            RowAdjustment::Fixed(price) => price.amount(),
        }
    }
}

/// Price adjustment for an inclusive row range of a numbered zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPricing {
    pub id: RowPricingId,
    pub tenant_id: TenantId,
    pub zone_id: ZoneId,
    pub row_from: i32,
    pub row_to: i32,
    pub adjustment: RowAdjustment,
}

impl RowPricing {
    pub fn covers(&self, row: i32) -> bool {
        self.row_from <= row && row <= self.row_to
    }

    pub fn width(&self) -> i64 {
        i64::from(self.row_to) - i64::from(self.row_from)
    }
}

/// Surcharge applied once a zone's occupancy reaches `threshold_pct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityTrigger {
    pub id: TriggerId,
    pub tenant_id: TenantId,
    pub zone_id: ZoneId,
    pub threshold_pct: Decimal,
    pub surcharge_pct: Decimal,
}

/// Record that a trigger has been crossed for its zone. Triggers stay
/// applied after activation even if occupancy drops again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerActivation {
    pub tenant_id: TenantId,
    pub zone_id: ZoneId,
    pub trigger_id: TriggerId,
    pub activated_at: DateTime<Utc>,
}

/// Result of a price calculation with the intermediate steps kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub zone_id: ZoneId,
    pub row: Option<i32>,
    pub quantity: u32,
    pub base_price: Money,
    pub stage_id: Option<StageId>,
    pub price_after_stage: Money,
    pub triggers_applied: Vec<TriggerId>,
    pub unit_price: Money,
    pub line_total: Money,
    pub priced_at: DateTime<Utc>,
}
