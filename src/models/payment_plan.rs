use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hold::Annotations;
use super::ids::{PaymentId, PlanId, TenantId, TransactionId};
use super::money::Money;
use super::status::text_enum;

text_enum! {
    pub enum PlanType {
        /// Fixed number of equal installments; remainder goes to the last one.
        Installment => "installment",
        /// Any partial amount up to the remaining balance.
        Flexible => "flexible",
    }
}

text_enum! {
    pub enum PlanStatus {
        Active => "active",
        Completed => "completed",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlanStatus::Active)
    }

    /// Only `active` has outgoing edges.
    pub fn can_transition_to(&self, next: PlanStatus) -> bool {
        matches!(
            (self, next),
            (PlanStatus::Active, PlanStatus::Completed)
                | (PlanStatus::Active, PlanStatus::Expired)
                | (PlanStatus::Active, PlanStatus::Cancelled)
        )
    }
}

text_enum! {
    pub enum PaymentStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub id: PlanId,
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub plan_type: PlanType,
    pub total_amount: Money,
    /// Sum of completed payments; recomputed on every payment.
    pub paid_amount: Money,
    pub installment_count: Option<u32>,
    pub status: PlanStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Annotations,
}

impl PaymentPlan {
    pub fn remaining_balance(&self) -> Money {
        self.total_amount - self.paid_amount
    }

    pub fn is_paid_off(&self) -> bool {
        self.remaining_balance().is_zero()
    }

    /// Scheduled amount of installment number `paid_installments + 1`.
    ///
    /// Every installment is `total / count` truncated to cents except the
    /// last, which is whatever balance is still open. `None` for flexible
    /// plans or once the plan is paid off.
    pub fn next_installment_amount(&self, paid_installments: u32) -> Option<Money> {
        let count = self.installment_count?;
        if self.plan_type != PlanType::Installment || self.is_paid_off() {
            return None;
        }
        let remaining = self.remaining_balance();
        if paid_installments + 1 >= count {
            return Some(remaining);
        }
        Some(self.total_amount.split_floor(count).min(remaining))
    }
}

/// Money received against a plan or a transaction. Immutable once completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub plan_id: Option<PlanId>,
    pub amount: Money,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn completed(
        tenant_id: TenantId,
        transaction_id: TransactionId,
        plan_id: Option<PlanId>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            tenant_id,
            transaction_id,
            plan_id,
            amount,
            status: PaymentStatus::Completed,
            created_at: now,
        }
    }
}

/// Sum of the completed payments in `payments`.
pub fn completed_total(payments: &[Payment]) -> Money {
    payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum()
}
