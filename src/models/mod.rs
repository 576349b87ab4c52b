//! Data models for the Trekko reservations backend.
//!
//! Status enums map 1:1 onto Postgres enum types. The reservation status
//! transition graph lives here as a single exhaustive table
//! ([`ReservationStatus::permits`]) so that every mutation site shares the
//! same notion of which moves are legal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// Expedition status, owned by the guide/catalog side. The reservation core
/// only reads it and flips `active -> full` / `-> completed`.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "expedition_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExpeditionStatus {
    Draft,
    Published,
    Active,
    Full,
    Closed,
    Cancelled,
    Completed,
}

impl ExpeditionStatus {
    /// Whether new reservations can be taken.
    pub fn is_bookable(self) -> bool {
        matches!(self, Self::Active | Self::Published)
    }
}

/// An expedition led by a guide on a trail.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Expedition {
    pub id: Uuid,
    pub guide_id: Uuid,
    pub trail_id: Uuid,
    pub title: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub capacity: i32,
    pub enrolled_count: i32,
    pub price: Decimal,
    pub status: ExpeditionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub contestation_end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reservation lifecycle status.
///
/// Transitions are monotonic along the graph encoded in [`permits`]; once a
/// reservation leaves `pending_payment` it can never return, and terminal
/// states have no outgoing edges.
///
/// [`permits`]: ReservationStatus::permits
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Created,
    PendingPayment,
    Paid,
    AwaitingExpedition,
    ExpeditionInProgress,
    AwaitingContestation,
    InDispute,
    Released,
    PayoutSent,
    Cancelled,
    Refunded,
    NoShow,
}

impl ReservationStatus {
    /// The transition table. One guarded step at a time; bulk operations walk
    /// the chain instead of skipping intermediate states.
    pub fn permits(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match self {
            Created => matches!(next, PendingPayment),
            PendingPayment => matches!(next, Paid | Cancelled),
            Paid => matches!(next, AwaitingExpedition | Refunded | Cancelled),
            AwaitingExpedition => {
                matches!(next, ExpeditionInProgress | Refunded | Cancelled | NoShow)
            }
            ExpeditionInProgress => matches!(next, AwaitingContestation | NoShow),
            AwaitingContestation => matches!(next, InDispute | Released),
            InDispute => matches!(next, Released | Refunded),
            Released => matches!(next, PayoutSent),
            Cancelled | Refunded | PayoutSent | NoShow => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Refunded | Self::PayoutSent | Self::NoShow
        )
    }

    pub const ALL: [ReservationStatus; 12] = [
        Self::Created,
        Self::PendingPayment,
        Self::Paid,
        Self::AwaitingExpedition,
        Self::ExpeditionInProgress,
        Self::AwaitingContestation,
        Self::InDispute,
        Self::Released,
        Self::PayoutSent,
        Self::Cancelled,
        Self::Refunded,
        Self::NoShow,
    ];
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::AwaitingExpedition => "awaiting_expedition",
            Self::ExpeditionInProgress => "expedition_in_progress",
            Self::AwaitingContestation => "awaiting_contestation",
            Self::InDispute => "in_dispute",
            Self::Released => "released",
            Self::PayoutSent => "payout_sent",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::NoShow => "no_show",
        };
        f.write_str(s)
    }
}

/// Payment method reported by the processor.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Pix,
    Boleto,
    AccountMoney,
}

/// Who performed a state-changing action.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "actor_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    Guide,
    Admin,
    System,
}

/// One user's booking of N spots on one expedition.
///
/// `total_amount` is fixed at creation (`quantity * unit_price`) and never
/// recomputed from the live expedition price.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub expedition_id: Uuid,
    pub user_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expedition_completed_at: Option<DateTime<Utc>>,
    pub contestation_ends_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<ActorType>,
    pub cancellation_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    pub mp_preference_id: Option<String>,
    pub mp_payment_id: Option<String>,
    pub mp_external_reference: Option<String>,
    pub mp_refund_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settled payment status mirrored from the processor.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Refunded,
    PartiallyRefunded,
    Cancelled,
}

/// A settled monetary event tied to a reservation.
///
/// Invariant: `gross_amount - platform_fee - mp_fee - net_amount == 0`,
/// reconciled at creation.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub mp_payment_id: String,
    pub status: PaymentStatus,
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    pub mp_fee: Decimal,
    pub net_amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub payment_type_id: Option<String>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payout status. At most one non-`failed`, non-`blocked` payout exists per
/// reservation (enforced by a partial unique index).
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payout_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Scheduled,
    Processing,
    Sent,
    Failed,
    Completed,
    Blocked,
}

/// A scheduled or executed transfer of net earnings to a guide.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Payout {
    pub id: Uuid,
    pub guide_id: Uuid,
    pub reservation_id: Uuid,
    pub status: PayoutStatus,
    pub gross_amount: Decimal,
    pub platform_fee: Decimal,
    pub gateway_fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub pix_key: Option<String>,
    pub pix_key_type: Option<String>,
    pub pix_transaction_id: Option<String>,
    pub pix_end_to_end_id: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "contestation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContestationStatus {
    Open,
    UnderReview,
    ResolvedUser,
    ResolvedGuide,
    Closed,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "contestation_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContestationReason {
    ExpeditionNotCompleted,
    DifferentFromDescription,
    SafetyIssues,
    GuideNoShow,
    PoorService,
    Other,
}

/// A dispute opened by the user against a completed reservation.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Contestation {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub guide_id: Uuid,
    pub status: ContestationStatus,
    pub reason: ContestationReason,
    pub description: String,
    pub evidence_urls: Option<sqlx::types::Json<Vec<String>>>,
    pub guide_response: Option<String>,
    pub guide_response_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "audit_entity_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Reservation,
    Payment,
    Payout,
    GuideVerification,
}

/// Append-only record of a state-changing action. Never mutated or deleted.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub entity_type: AuditEntityType,
    pub entity_id: Uuid,
    pub action: String,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub metadata: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "verification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    Suspended,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "pix_key_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PixKeyType {
    Cpf,
    Cnpj,
    Email,
    Phone,
    Random,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "document_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Cpf,
    Cnpj,
}

/// Guide KYC data. A guide must be approved before payouts execute.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct GuideVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: VerificationStatus,
    pub document_type: Option<DocumentType>,
    pub document_number: Option<String>,
    pub pix_key_type: Option<PixKeyType>,
    pub pix_key: Option<String>,
    pub pix_key_holder_name: Option<String>,
    pub pix_key_verified: bool,
    pub document_url: Option<String>,
    pub bank_proof_url: Option<String>,
    pub accepted_intermediation_terms: bool,
    pub accepted_payout_terms: bool,
    pub accepted_contestation_policy: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Refund brackets applied when a user cancels a paid reservation.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct CancellationPolicy {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub full_refund_days: i32,
    pub partial_refund_days: i32,
    pub partial_refund_percent: i32,
    pub no_refund_days: i32,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Platform settings row (key/value).
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PlatformSetting {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_permitted_step_by_step() {
        use ReservationStatus::*;
        let chain = [
            Created,
            PendingPayment,
            Paid,
            AwaitingExpedition,
            ExpeditionInProgress,
            AwaitingContestation,
            Released,
            PayoutSent,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].permits(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ReservationStatus::ALL {
            if from.is_terminal() {
                for to in ReservationStatus::ALL {
                    assert!(!from.permits(to), "{from} must not permit {to}");
                }
            }
        }
    }

    #[test]
    fn nothing_reenters_pending_payment_after_creation() {
        for from in ReservationStatus::ALL {
            if from != ReservationStatus::Created {
                assert!(!from.permits(ReservationStatus::PendingPayment), "{from}");
            }
        }
    }

    #[test]
    fn refunded_reservation_rejects_late_approval() {
        // An "approved" webhook arriving after "refunded" must be a no-op:
        // refunded has no edge back to paid, and the approved transition is
        // guarded on pending_payment anyway.
        assert!(!ReservationStatus::Refunded.permits(ReservationStatus::Paid));
        assert!(ReservationStatus::PendingPayment.permits(ReservationStatus::Paid));
    }

    #[test]
    fn dispute_edges() {
        use ReservationStatus::*;
        assert!(AwaitingContestation.permits(InDispute));
        assert!(AwaitingContestation.permits(Released));
        assert!(InDispute.permits(Refunded));
        assert!(InDispute.permits(Released));
        assert!(!InDispute.permits(PayoutSent));
    }

    #[test]
    fn cancellation_edges() {
        use ReservationStatus::*;
        assert!(PendingPayment.permits(Cancelled));
        assert!(Paid.permits(Cancelled));
        assert!(Paid.permits(Refunded));
        assert!(AwaitingExpedition.permits(Refunded));
        assert!(!AwaitingContestation.permits(Cancelled));
        assert!(!Released.permits(Refunded));
    }

    #[test]
    fn no_transition_skips_release_before_payout() {
        for from in ReservationStatus::ALL {
            if from != ReservationStatus::Released {
                assert!(!from.permits(ReservationStatus::PayoutSent), "{from}");
            }
        }
    }
}
