//! Checkout orchestration and user-initiated cancellation.
//!
//! Creating a checkout inserts the `pending_payment` reservation first and
//! only then talks to the processor; if the processor call fails, the
//! reservation is left to die by TTL — the expiry sweep is the
//! compensation, no delete happens here.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::fees::{compute_refund, days_until, refund_explanation};
use crate::mercadopago::{
    MercadoPagoClient, PreferenceBackUrls, PreferenceItem, PreferencePayer, PreferenceRequest,
    ProcessorError,
};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{ActorType, Reservation, ReservationStatus};
use crate::store::{AuditContext, ReservationStore, StoreError, TransitionPatch};
use crate::webhook::external_reference_for;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("falha ao criar checkout no processador de pagamento")]
    Processor(#[from] ProcessorError),
    #[error("Acesso negado")]
    Forbidden,
    #[error("{0}")]
    InvalidState(String),
}

/// Result of a successful checkout creation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutOutcome {
    pub checkout_url: String,
    pub reservation_id: Uuid,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Result of a cancellation, including the policy bracket applied.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CancelOutcome {
    pub status: ReservationStatus,
    pub refund_amount: Decimal,
    pub refund_percent: i32,
    pub message: String,
}

pub struct CheckoutService {
    store: Arc<ReservationStore>,
    mp: Arc<MercadoPagoClient>,
    public_base_url: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<ReservationStore>,
        mp: Arc<MercadoPagoClient>,
        public_base_url: String,
    ) -> Self {
        Self {
            store,
            mp,
            public_base_url,
        }
    }

    /// Reserve spots and request a hosted checkout session.
    ///
    /// The price is locked at booking time: `total_amount` is computed from
    /// the expedition price as of this call and never recomputed.
    pub async fn create_checkout(
        &self,
        user: &AuthenticatedUser,
        expedition_id: Uuid,
        quantity: i32,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let ttl_minutes = self.store.reservation_expiry_minutes().await?;
        let (reservation, expedition) = self
            .store
            .create_reservation(expedition_id, user.id, quantity, ttl_minutes)
            .await?;

        let expires_at = reservation.expires_at.unwrap_or_else(Utc::now);
        let external_reference = external_reference_for(reservation.id);

        let title = expedition
            .title
            .clone()
            .unwrap_or_else(|| format!("Expedição {}", expedition.start_date.format("%d/%m/%Y")));

        let request = PreferenceRequest {
            items: vec![PreferenceItem {
                id: format!("expedition_{}", expedition.id),
                title,
                description: format!(
                    "{} vaga(s) - {}",
                    quantity,
                    expedition.start_date.format("%d/%m/%Y")
                ),
                picture_url: None,
                quantity,
                unit_price: reservation.unit_price,
                currency_id: "BRL".to_string(),
            }],
            payer: PreferencePayer {
                email: user.email.clone(),
                name: user.name.clone(),
            },
            back_urls: PreferenceBackUrls {
                success: format!(
                    "{}/reservas?success=true&reservation={}",
                    self.public_base_url, reservation.id
                ),
                failure: format!(
                    "{}/expedicao/{expedition_id}?cancelled=true",
                    self.public_base_url
                ),
                pending: format!(
                    "{}/reservas?pending=true&reservation={}",
                    self.public_base_url, reservation.id
                ),
            },
            auto_return: "approved".to_string(),
            external_reference: external_reference.clone(),
            notification_url: format!("{}/api/webhooks/mercadopago", self.public_base_url),
            expires: true,
            expiration_date_to: expires_at.to_rfc3339(),
            metadata: serde_json::json!({
                "user_id": user.id,
                "reservation_id": reservation.id,
                "expedition_id": expedition_id,
            }),
        };

        let preference = match self.mp.create_preference(&request).await {
            Ok(preference) => preference,
            Err(e) => {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "preference creation failed, reservation left to expire by TTL"
                );
                return Err(e.into());
            }
        };

        self.store
            .set_checkout_refs(
                reservation.id,
                &preference.id,
                &external_reference,
                AuditContext::user("checkout_created", user.id).with_metadata(serde_json::json!({
                    "preference_id": preference.id,
                    "amount": reservation.total_amount,
                })),
            )
            .await?;

        tracing::info!(
            reservation_id = %reservation.id,
            expedition_id = %expedition_id,
            quantity,
            "checkout created"
        );

        Ok(CheckoutOutcome {
            checkout_url: preference.init_point,
            reservation_id: reservation.id,
            expires_at,
        })
    }

    /// Cancel a reservation on behalf of its owner, applying the
    /// cancellation policy when money already changed hands.
    pub async fn cancel_reservation(
        &self,
        user: &AuthenticatedUser,
        reservation_id: Uuid,
        reason: Option<String>,
    ) -> Result<CancelOutcome, CheckoutError> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(StoreError::ReservationNotFound)?;

        if reservation.user_id != user.id {
            return Err(CheckoutError::Forbidden);
        }

        match reservation.status {
            ReservationStatus::PendingPayment => {
                self.cancel_unpaid(user, &reservation, reason).await
            }
            ReservationStatus::Paid | ReservationStatus::AwaitingExpedition => {
                self.cancel_paid(user, &reservation, reason).await
            }
            _ => Err(CheckoutError::InvalidState(
                "Reserva não pode ser cancelada neste status".to_string(),
            )),
        }
    }

    async fn cancel_unpaid(
        &self,
        user: &AuthenticatedUser,
        reservation: &Reservation,
        reason: Option<String>,
    ) -> Result<CancelOutcome, CheckoutError> {
        self.store
            .transition_status(
                reservation.id,
                &[ReservationStatus::PendingPayment],
                ReservationStatus::Cancelled,
                TransitionPatch {
                    cancelled_at: Some(Utc::now()),
                    cancelled_by: Some(ActorType::User),
                    cancellation_reason: reason,
                    ..Default::default()
                },
                AuditContext::user("cancelled_by_user", user.id),
            )
            .await?;

        Ok(CancelOutcome {
            status: ReservationStatus::Cancelled,
            refund_amount: Decimal::ZERO,
            refund_percent: 0,
            message: "Reserva cancelada.".to_string(),
        })
    }

    async fn cancel_paid(
        &self,
        user: &AuthenticatedUser,
        reservation: &Reservation,
        reason: Option<String>,
    ) -> Result<CancelOutcome, CheckoutError> {
        let expedition = self
            .store
            .get_expedition(reservation.expedition_id)
            .await?
            .ok_or(StoreError::ExpeditionNotFound)?;

        let policy = self.store.default_cancellation_policy().await?;
        let days = days_until(Utc::now(), expedition.start_date);
        let refund = compute_refund(reservation.total_amount, days, policy.as_ref());
        let message = refund_explanation(&refund);

        let audit = AuditContext::user("cancelled_by_user", user.id).with_metadata(
            serde_json::json!({
                "refund_amount": refund.amount,
                "refund_percent": refund.percent,
                "days_until_event": days,
                "reason": reason,
            }),
        );

        let new_status = if refund.amount > Decimal::ZERO {
            let payment_id = reservation.mp_payment_id.as_deref().ok_or_else(|| {
                CheckoutError::InvalidState("Reserva paga sem pagamento associado".to_string())
            })?;
            let refund_response = self.mp.create_refund(payment_id, Some(refund.amount)).await?;

            self.store
                .transition_status(
                    reservation.id,
                    &[reservation.status],
                    ReservationStatus::Refunded,
                    TransitionPatch {
                        cancelled_at: Some(Utc::now()),
                        cancelled_by: Some(ActorType::User),
                        cancellation_reason: reason,
                        refunded_at: Some(Utc::now()),
                        refund_amount: Some(refund.amount),
                        mp_refund_id: Some(refund_response.id.to_string()),
                        ..Default::default()
                    },
                    audit,
                )
                .await?;
            ReservationStatus::Refunded
        } else {
            self.store
                .transition_status(
                    reservation.id,
                    &[reservation.status],
                    ReservationStatus::Cancelled,
                    TransitionPatch {
                        cancelled_at: Some(Utc::now()),
                        cancelled_by: Some(ActorType::User),
                        cancellation_reason: reason
                            .or_else(|| Some("Cancelado sem reembolso (fora do prazo)".to_string())),
                        ..Default::default()
                    },
                    audit,
                )
                .await?;
            ReservationStatus::Cancelled
        };

        if let Some(payout) = self
            .store
            .block_payout(
                reservation.id,
                "reserva cancelada pelo trekker",
                AuditContext::user("payout_blocked", user.id),
            )
            .await?
        {
            tracing::info!(payout_id = %payout.id, reservation_id = %reservation.id, "payout blocked after cancellation");
        }

        // Freed spots: the expedition may drop below capacity again.
        self.store.refresh_enrollment(reservation.expedition_id).await?;

        Ok(CancelOutcome {
            status: new_status,
            refund_amount: refund.amount,
            refund_percent: refund.percent,
            message,
        })
    }
}
