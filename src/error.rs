use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::{HoldId, Money, PlanId, SeatId, ZoneId};

/// Failures of the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (e.g. a second active hold on a seat).
    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted value could not be decoded into its domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => {
                    // serialization_failure, deadlock_detected
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            StoreError::Conflict(_) | StoreError::Corrupt(_) => false,
        }
    }
}

/// Domain errors of the reservation and pricing engine. Returned, never panicked.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The unit is held by someone else, sold, blocked, or the zone is out of capacity.
    #[error("zone {zone_id} cannot supply {requested} unit(s): {available} available")]
    SeatUnavailable {
        zone_id: ZoneId,
        seat_id: Option<SeatId>,
        requested: u32,
        available: i64,
    },

    #[error("hold {hold_id} has expired or is no longer active")]
    LockExpired { hold_id: HoldId },

    #[error("invalid payment amount {submitted}: {reason}")]
    InvalidPaymentAmount {
        submitted: Money,
        expected: Option<Money>,
        remaining: Money,
        reason: String,
    },

    #[error("payment plan {plan_id} has expired")]
    PlanExpired { plan_id: PlanId },

    #[error("payment plan {plan_id} is already completed")]
    PlanAlreadyCompleted { plan_id: PlanId },

    /// Aggregate mismatch between holds, sales and capacity. Must never happen
    /// under correct isolation; detail is logged, not returned to buyers.
    #[error("capacity inconsistency in zone {zone_id}: {detail}")]
    CapacityInconsistency { zone_id: ZoneId, detail: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        EngineError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn plan_expired(plan_id: PlanId) -> Self {
        EngineError::PlanExpired { plan_id }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::SeatUnavailable { .. } => StatusCode::CONFLICT,
            EngineError::LockExpired { .. } | EngineError::PlanExpired { .. } => StatusCode::GONE,
            EngineError::InvalidPaymentAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::PlanAlreadyCompleted { .. } | EngineError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::CapacityInconsistency { .. } | EngineError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SeatUnavailable { .. } => "SEAT_UNAVAILABLE",
            EngineError::LockExpired { .. } => "LOCK_EXPIRED",
            EngineError::InvalidPaymentAmount { .. } => "INVALID_PAYMENT_AMOUNT",
            EngineError::PlanExpired { .. } => "PLAN_EXPIRED",
            EngineError::PlanAlreadyCompleted { .. } => "PLAN_ALREADY_COMPLETED",
            EngineError::CapacityInconsistency { .. } => "INTERNAL_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::InvalidRequest(_) => "INVALID_REQUEST",
            EngineError::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to a buyer.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::CapacityInconsistency { .. } | EngineError::Store(_) => {
                "An internal error occurred, please retry".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Structured detail the UI can use to guide a correction.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::SeatUnavailable {
                zone_id,
                seat_id,
                requested,
                available,
            } => Some(serde_json::json!({
                "zone_id": zone_id,
                "seat_id": seat_id,
                "requested": requested,
                "available": available,
            })),
            EngineError::InvalidPaymentAmount {
                submitted,
                expected,
                remaining,
                ..
            } => Some(serde_json::json!({
                "submitted": submitted,
                "expected": expected,
                "remaining_balance": remaining,
            })),
            EngineError::LockExpired { hold_id } => Some(serde_json::json!({ "hold_id": hold_id })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            EngineError::CapacityInconsistency { zone_id, detail } => {
                error!(zone = %zone_id, detail = %detail, "Capacity inconsistency detected");
            }
            EngineError::Store(e) => {
                error!(error = ?e, "Store error");
            }
            other => {
                warn!(code = other.code(), error = %other, "Request rejected");
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        self.log();
        let body = ErrorBody {
            success: false,
            code: self.code(),
            message: self.public_message(),
            details: self.details(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistency_is_reported_generically() {
        let err = EngineError::CapacityInconsistency {
            zone_id: ZoneId::new(),
            detail: "sold 3 + held 2 > capacity 4".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("capacity 4"));
        assert!(err.details().is_none());
    }

    #[test]
    fn seat_unavailable_carries_detail() {
        let zone = ZoneId::new();
        let err = EngineError::SeatUnavailable {
            zone_id: zone,
            seat_id: None,
            requested: 2,
            available: 1,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let details = err.details().unwrap();
        assert_eq!(details["requested"], 2);
        assert_eq!(details["available"], 1);
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::Conflict("dup".into()).is_transient());
    }
}
