//! Persistence layer for reservations, payments, payouts, contestations,
//! guide verification, platform settings, and the audit log.
//!
//! All correctness under concurrency comes from here: status changes go
//! through [`ReservationStore::transition_status`], which performs a
//! compare-then-update inside a transaction and writes the matching audit
//! entry in the same transaction. Callers that lose a race get
//! [`StoreError::StaleTransition`], never a corrupted row.

mod audit;
mod contestations;
mod expeditions;
mod payments;
mod payouts;
mod reservations;
mod settings;
mod verification;

pub use payments::NewPayment;
pub use payouts::NewPayout;
pub use contestations::NewContestation;
pub use verification::SubmitVerification;

use rust_decimal::Decimal;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{ActorType, PaymentMethod, ReservationStatus};

/// Store error taxonomy. Business-rule violations carry the violated
/// constraint in the message so handlers can surface it directly.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Expedição não encontrada")]
    ExpeditionNotFound,
    #[error("Reserva não encontrada")]
    ReservationNotFound,
    #[error("Expedição não está disponível para reservas")]
    ExpeditionNotBookable,
    #[error("Apenas {available} vagas disponíveis")]
    CapacityExceeded { available: i32 },
    #[error("stale transition on reservation {reservation_id}: expected {expected:?}, found {actual}")]
    StaleTransition {
        reservation_id: Uuid,
        expected: Vec<ReservationStatus>,
        actual: ReservationStatus,
    },
    #[error("transition {from} -> {to} is not in the reservation status graph")]
    ForbiddenTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

/// Optional fields written together with a status transition. `None` leaves
/// the stored value untouched.
#[derive(Debug, Default, Clone)]
pub struct TransitionPatch {
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<PaymentMethod>,
    pub mp_payment_id: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<ActorType>,
    pub cancellation_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    pub mp_refund_id: Option<String>,
    pub expedition_completed_at: Option<DateTime<Utc>>,
    pub contestation_ends_at: Option<DateTime<Utc>>,
}

/// Attribution for the audit entry a mutation writes.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub action: &'static str,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub metadata: Option<serde_json::Value>,
}

impl AuditContext {
    pub fn system(action: &'static str) -> Self {
        Self {
            action,
            actor_id: None,
            actor_type: ActorType::System,
            metadata: None,
        }
    }

    pub fn user(action: &'static str, user_id: Uuid) -> Self {
        Self {
            action,
            actor_id: Some(user_id),
            actor_type: ActorType::User,
            metadata: None,
        }
    }

    pub fn guide(action: &'static str, guide_id: Uuid) -> Self {
        Self {
            action,
            actor_id: Some(guide_id),
            actor_type: ActorType::Guide,
            metadata: None,
        }
    }

    pub fn admin(action: &'static str, admin_id: Uuid) -> Self {
        Self {
            action,
            actor_id: Some(admin_id),
            actor_type: ActorType::Admin,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Persistence service shared across handlers and workers.
pub struct ReservationStore {
    pool: PgPool,
}

impl ReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_error_reports_remaining_spots() {
        let e = StoreError::CapacityExceeded { available: 2 };
        assert_eq!(e.to_string(), "Apenas 2 vagas disponíveis");
    }

    #[test]
    fn not_bookable_error_message() {
        let e = StoreError::ExpeditionNotBookable;
        assert_eq!(e.to_string(), "Expedição não está disponível para reservas");
    }

    #[test]
    fn audit_context_attribution() {
        let id = Uuid::new_v4();
        let ctx = AuditContext::user("cancelled_by_user", id);
        assert_eq!(ctx.actor_id, Some(id));
        assert!(matches!(ctx.actor_type, ActorType::User));

        let ctx = AuditContext::system("checkout_expired");
        assert_eq!(ctx.actor_id, None);
        assert!(matches!(ctx.actor_type, ActorType::System));
    }
}
