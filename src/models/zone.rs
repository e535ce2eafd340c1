use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{EventId, SeatId, TenantId, ZoneId};
use super::money::Money;
use super::status::text_enum;

text_enum! {
    /// How units in a zone are sold.
    pub enum ZoneKind {
        /// Individually numbered seats; holds reference a seat.
        Numbered => "numbered",
        /// General admission; holds reference a quantity.
        General => "general",
    }
}

text_enum! {
    pub enum SeatStatus {
        Available => "available",
        Locked => "locked",
        Reserved => "reserved",
        Sold => "sold",
        Blocked => "blocked",
    }
}

/// Sellable group of units belonging to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub tenant_id: TenantId,
    pub event_id: EventId,
    pub name: String,
    pub kind: ZoneKind,
    pub capacity: i64,
    pub base_price: Money,
    pub created_at: DateTime<Utc>,
}

impl Zone {
    pub fn is_numbered(&self) -> bool {
        self.kind == ZoneKind::Numbered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub tenant_id: TenantId,
    pub zone_id: ZoneId,
    pub row: i32,
    pub number: i32,
    pub status: SeatStatus,
}

/// Derived counts for one zone. Never stored; always recomputed from holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Occupancy {
    /// Units converted into sales.
    pub sold: i64,
    /// Units under an active CartLock or Reservation.
    pub held: i64,
    /// Seats taken out of sale (numbered zones only).
    pub blocked: i64,
}

impl Occupancy {
    pub fn taken(&self) -> i64 {
        self.sold + self.held
    }
}

/// Availability of a zone as shown to buyers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    pub zone_id: ZoneId,
    pub capacity: i64,
    pub sold: i64,
    pub held: i64,
    pub blocked: i64,
    pub available: i64,
    /// `(sold + held) / capacity * 100`, two decimals.
    pub occupancy_pct: Decimal,
}
