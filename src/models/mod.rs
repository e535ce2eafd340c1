mod status;

pub mod hold;
pub mod ids;
pub mod money;
pub mod payment_plan;
pub mod pricing;
pub mod transaction;
pub mod zone;

pub use hold::{Annotations, Conversion, Hold, HoldKind, HoldStatus, HoldTarget};
pub use ids::{
    CustomerId, EventId, HoldId, PaymentId, PlanId, RowPricingId, SeatId, SessionId, StageId, TenantId,
    TransactionId, TriggerId, ZoneId,
};
pub use money::Money;
pub use payment_plan::{Payment, PaymentPlan, PaymentStatus, PlanStatus, PlanType};
pub use pricing::{
    AvailabilityTrigger, PriceQuote, PriceStage, RowAdjustment, RowPricing, StageModifier, TriggerActivation,
};
pub use transaction::{Transaction, TransactionStatus};
pub use zone::{AvailabilitySnapshot, Occupancy, Seat, SeatStatus, Zone, ZoneKind};
