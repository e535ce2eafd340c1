use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{HoldId, PlanId, SeatId, SessionId, TenantId, TransactionId, ZoneId};
use super::money::Money;
use super::status::text_enum;

text_enum! {
    /// CartLock or Reservation.
    pub enum HoldKind {
        /// Short-lived lock taken when an item enters a cart.
        CartLock => "cart_lock",
        /// Long-lived hold backing a payment plan.
        Reservation => "reservation",
    }
}

text_enum! {
    pub enum HoldStatus {
        Active => "active",
        Expired => "expired",
        Released => "released",
        Converted => "converted",
    }
}

text_enum! {
    /// What a `converted` hold turned into.
    pub enum Conversion {
        /// Superseded by a Reservation for the same units.
        Reservation => "reservation",
        /// Became a permanent sale.
        Sale => "sale",
    }
}

/// The units a hold claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HoldTarget {
    Seat { seat_id: SeatId },
    Quantity { quantity: u32 },
}

impl HoldTarget {
    pub fn seat_id(&self) -> Option<SeatId> {
        match self {
            HoldTarget::Seat { seat_id } => Some(*seat_id),
            HoldTarget::Quantity { .. } => None,
        }
    }

    pub fn units(&self) -> u32 {
        match self {
            HoldTarget::Seat { .. } => 1,
            HoldTarget::Quantity { quantity } => *quantity,
        }
    }
}

/// Optional, non-invariant-bearing data attached to a hold or plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Annotations {
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.channel.is_none()
    }
}

/// Time-bounded claim on inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hold {
    pub id: HoldId,
    pub tenant_id: TenantId,
    pub kind: HoldKind,
    pub zone_id: ZoneId,
    pub target: HoldTarget,
    pub session_id: SessionId,
    pub transaction_id: Option<TransactionId>,
    pub plan_id: Option<PlanId>,
    pub status: HoldStatus,
    pub conversion: Option<Conversion>,
    pub superseded_by: Option<HoldId>,
    /// Unit price captured when the hold was taken.
    pub unit_price: Money,
    /// Line total captured when the hold was taken (unit price × units).
    pub price_at_lock: Money,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Hold {
    #[allow(clippy::too_many_arguments)]
    pub fn cart_lock(
        tenant_id: TenantId,
        session_id: SessionId,
        zone_id: ZoneId,
        target: HoldTarget,
        unit_price: Money,
        price_at_lock: Money,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HoldId::new(),
            tenant_id,
            kind: HoldKind::CartLock,
            zone_id,
            target,
            session_id,
            transaction_id: None,
            plan_id: None,
            status: HoldStatus::Active,
            conversion: None,
            superseded_by: None,
            unit_price,
            price_at_lock,
            expires_at,
            created_at: now,
            updated_at: now,
            annotations: Annotations::default(),
        }
    }

    /// Reservation that supersedes this cart lock for the given plan.
    /// The captured price carries over unchanged.
    pub fn reservation_for(&self, plan_id: PlanId, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: HoldId::new(),
            kind: HoldKind::Reservation,
            plan_id: Some(plan_id),
            status: HoldStatus::Active,
            conversion: None,
            superseded_by: None,
            expires_at,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// Active and not yet past its TTL.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at > now
    }

    pub fn units(&self) -> u32 {
        self.target.units()
    }

    pub fn seat_id(&self) -> Option<SeatId> {
        self.target.seat_id()
    }

    pub fn mark(&mut self, status: HoldStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn mark_converted(&mut self, conversion: Conversion, superseded_by: Option<HoldId>, now: DateTime<Utc>) {
        self.status = HoldStatus::Converted;
        self.conversion = Some(conversion);
        self.superseded_by = superseded_by;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lock(now: DateTime<Utc>) -> Hold {
        Hold::cart_lock(
            TenantId::new(),
            SessionId::new("s-1"),
            ZoneId::new(),
            HoldTarget::Quantity { quantity: 3 },
            Money::from_major(10),
            Money::from_major(30),
            now,
            now + Duration::minutes(15),
        )
    }

    #[test]
    fn reservation_keeps_price_and_target() {
        let now = Utc::now();
        let cart = lock(now);
        let plan = PlanId::new();
        let res = cart.reservation_for(plan, now, now + Duration::hours(48));

        assert_ne!(res.id, cart.id);
        assert_eq!(res.kind, HoldKind::Reservation);
        assert_eq!(res.plan_id, Some(plan));
        assert_eq!(res.price_at_lock, cart.price_at_lock);
        assert_eq!(res.target, cart.target);
        assert!(res.is_active());
    }

    #[test]
    fn live_only_before_expiry() {
        let now = Utc::now();
        let hold = lock(now);
        assert!(hold.is_live_at(now));
        assert!(!hold.is_live_at(now + Duration::minutes(15)));
    }
}
