use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CustomerId, SessionId, TenantId, TransactionId};
use super::money::Money;
use super::status::text_enum;

text_enum! {
    pub enum TransactionStatus {
        Pending => "pending",
        Reserved => "reserved",
        Completed => "completed",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Cancelled | TransactionStatus::Expired
        )
    }

    /// `pending → reserved → completed`, `reserved → expired`,
    /// `pending | reserved → cancelled`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Reserved)
                | (Reserved, Completed)
                | (Reserved, Expired)
                | (Pending, Cancelled)
                | (Reserved, Cancelled)
        )
    }
}

/// The sale record. Owns its holds and at most one payment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub status: TransactionStatus,
    /// Sum of the captured hold prices; fixed when the transaction is reserved.
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn open(tenant_id: TenantId, session_id: SessionId, customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            id: TransactionId::new(),
            tenant_id,
            session_id,
            customer_id,
            status: TransactionStatus::Pending,
            total_amount: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TransactionStatus::*;

    #[test]
    fn lifecycle_edges() {
        assert!(Pending.can_transition_to(Reserved));
        assert!(Reserved.can_transition_to(Completed));
        assert!(Reserved.can_transition_to(Expired));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Expired));
        for terminal in [Completed, Cancelled, Expired] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Cancelled));
        }
    }
}
