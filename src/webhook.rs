//! Webhook reconciliation.
//!
//! Maps asynchronous processor events onto reservation/payment state. The
//! amounts in the webhook body are never trusted; the payment is re-fetched
//! from the processor by id. Every transition goes through the store's
//! compare-then-update guard, so replays and out-of-order deliveries
//! degrade to logged no-ops instead of corrupting state.

use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::fees::{compute_fees, fees_reconcile};
use crate::mercadopago::{
    map_payment_method, MercadoPagoClient, MpPayment, MpPaymentStatus, ProcessorError,
};
use crate::models::{ActorType, PaymentStatus, Reservation, ReservationStatus};
use crate::store::{AuditContext, NewPayment, NewPayout, ReservationStore, StoreError, TransitionPatch};

/// Webhook notification body: `{"type": "payment", "data": {"id": "..."}}`.
#[derive(Debug, Deserialize)]
pub struct WebhookNotification {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub id: Option<String>,
}

/// How a webhook delivery was handled; the HTTP handler maps this onto a
/// status code. Benign duplicates and lost races are `Ignored` and answered
/// with 200 so the processor stops retrying.
#[derive(Debug)]
pub enum WebhookOutcome {
    Processed,
    Ignored(&'static str),
    BadRequest(String),
    NotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// External reference embedded in the checkout artifact:
/// `reservation_{id}_{unix_millis}`.
pub fn external_reference_for(reservation_id: Uuid) -> String {
    format!("reservation_{}_{}", reservation_id, Utc::now().timestamp_millis())
}

/// Parse the reservation id back out of an external reference. Returns
/// `None` for anything that does not match the emitted format.
pub fn parse_external_reference(reference: &str) -> Option<Uuid> {
    let rest = reference.strip_prefix("reservation_")?;
    let (id, timestamp) = rest.rsplit_once('_')?;
    if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Uuid::parse_str(id).ok()
}

pub struct WebhookService {
    store: Arc<ReservationStore>,
    mp: Arc<MercadoPagoClient>,
}

impl WebhookService {
    pub fn new(store: Arc<ReservationStore>, mp: Arc<MercadoPagoClient>) -> Self {
        Self { store, mp }
    }

    /// Process one payment notification end to end.
    pub async fn process_payment_event(
        &self,
        payment_id: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        let payment = self.fetch_payment_with_retry(payment_id).await?;

        let Some(reference) = payment.external_reference.as_deref() else {
            tracing::warn!(payment_id, "webhook payment has no external reference");
            return Ok(WebhookOutcome::BadRequest(
                "payment has no external reference".to_string(),
            ));
        };

        let Some(reservation_id) = parse_external_reference(reference) else {
            tracing::warn!(payment_id, reference, "malformed external reference");
            return Ok(WebhookOutcome::BadRequest(format!(
                "malformed external reference: {reference}"
            )));
        };

        let Some(reservation) = self.store.get_reservation(reservation_id).await? else {
            tracing::warn!(payment_id, %reservation_id, "reservation not found for webhook");
            return Ok(WebhookOutcome::NotFound(format!(
                "reservation {reservation_id} not found"
            )));
        };

        match payment.status {
            MpPaymentStatus::Approved => self.apply_approved(&reservation, &payment).await,
            MpPaymentStatus::Rejected | MpPaymentStatus::Cancelled => {
                self.apply_rejected(&reservation, &payment).await
            }
            MpPaymentStatus::Refunded => self.apply_refunded(&reservation, &payment).await,
            other => {
                tracing::info!(payment_id, status = ?other, "ignoring non-final payment status");
                Ok(WebhookOutcome::Ignored("non-final payment status"))
            }
        }
    }

    async fn fetch_payment_with_retry(
        &self,
        payment_id: &str,
    ) -> Result<MpPayment, ProcessorError> {
        let mut attempt = 0;
        loop {
            match self.mp.get_payment(payment_id).await {
                Ok(payment) => return Ok(payment),
                Err(e) if e.is_retryable() && attempt < 2 => {
                    attempt += 1;
                    tracing::warn!(payment_id, attempt, error = %e, "retrying payment fetch");
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Approved payment: reservation to `paid`, idempotent payment row,
    /// enrollment refresh, payout scheduling.
    async fn apply_approved(
        &self,
        reservation: &Reservation,
        payment: &MpPayment,
    ) -> Result<WebhookOutcome, WebhookError> {
        let mp_payment_id = payment.id.to_string();
        let method = map_payment_method(payment.payment_type_id.as_deref());

        let transitioned = self
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::PendingPayment],
                ReservationStatus::Paid,
                TransitionPatch {
                    paid_at: Some(Utc::now()),
                    mp_payment_id: Some(mp_payment_id.clone()),
                    payment_method: method,
                    ..Default::default()
                },
                AuditContext::system("payment_approved").with_metadata(serde_json::json!({
                    "mp_payment_id": mp_payment_id,
                    "amount": payment.transaction_amount,
                })),
            )
            .await;

        match transitioned {
            Ok(_) => {}
            Err(StoreError::StaleTransition { actual, .. }) => {
                // A crashed earlier delivery may have transitioned the row
                // and died before writing the payment. Continue only in that
                // exact shape; everything else is a harmless replay or an
                // out-of-order event that must not win.
                let same_payment = reservation.mp_payment_id.as_deref()
                    == Some(mp_payment_id.as_str())
                    || reservation.mp_payment_id.is_none();
                if !(actual == ReservationStatus::Paid && same_payment) {
                    tracing::info!(
                        reservation_id = %reservation.id,
                        actual = %actual,
                        "approved event lost the race, no-op"
                    );
                    return Ok(WebhookOutcome::Ignored("stale approved event"));
                }
            }
            Err(e) => return Err(e.into()),
        }

        let gross = payment.transaction_amount;
        let processor_fee = payment.total_fees();
        let fee_percent = self.store.platform_fee_percent().await?;
        let fees = compute_fees(gross, fee_percent, processor_fee);

        if !fees_reconcile(gross, fees.platform_fee, processor_fee, fees.net_amount) {
            tracing::warn!(
                reservation_id = %reservation.id,
                %gross,
                platform_fee = %fees.platform_fee,
                %processor_fee,
                net = %fees.net_amount,
                "fee breakdown does not reconcile, net clamped"
            );
        }

        let inserted = self
            .store
            .insert_payment_idempotent(
                NewPayment {
                    reservation_id: reservation.id,
                    mp_payment_id: mp_payment_id.clone(),
                    status: PaymentStatus::Approved,
                    gross_amount: gross,
                    platform_fee: fees.platform_fee,
                    mp_fee: processor_fee,
                    net_amount: fees.net_amount,
                    payment_method: method,
                    payment_type_id: payment.payment_type_id.clone(),
                    currency: payment
                        .currency_id
                        .clone()
                        .unwrap_or_else(|| "BRL".to_string()),
                },
                AuditContext::system("payment_recorded"),
            )
            .await?;

        // On replay the row already exists; the steps below are all
        // idempotent, so a delivery that crashed halfway heals here.
        let was_duplicate = inserted.is_none();
        let payment_row = match inserted {
            Some(row) => row,
            None => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    %mp_payment_id,
                    "payment already recorded, re-running idempotent steps"
                );
                match self.store.get_payment_by_mp_id(&mp_payment_id).await? {
                    Some(row) => row,
                    None => return Ok(WebhookOutcome::Ignored("duplicate payment event")),
                }
            }
        };

        self.store.refresh_enrollment(reservation.expedition_id).await?;

        let expedition = self
            .store
            .get_expedition(reservation.expedition_id)
            .await?
            .ok_or(StoreError::ExpeditionNotFound)?;

        let delay_days = self.store.payout_delay_days().await?;
        let scheduled = self
            .store
            .schedule_payout(
                NewPayout {
                    guide_id: expedition.guide_id,
                    reservation_id: reservation.id,
                    gross_amount: payment_row.gross_amount,
                    platform_fee: payment_row.platform_fee,
                    gateway_fee: payment_row.mp_fee,
                    net_amount: payment_row.net_amount,
                    currency: payment_row.currency.clone(),
                    scheduled_date: Utc::now() + Duration::days(delay_days),
                },
                AuditContext::system("payout_scheduled"),
            )
            .await?;

        if scheduled.is_none() {
            tracing::info!(reservation_id = %reservation.id, "payout already scheduled");
        }

        if was_duplicate {
            return Ok(WebhookOutcome::Ignored("duplicate payment event"));
        }

        tracing::info!(
            reservation_id = %reservation.id,
            %mp_payment_id,
            gross = %gross,
            net = %payment_row.net_amount,
            "payment approved and reconciled"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Rejected or cancelled payment: abandon the pending reservation.
    async fn apply_rejected(
        &self,
        reservation: &Reservation,
        payment: &MpPayment,
    ) -> Result<WebhookOutcome, WebhookError> {
        let detail = payment
            .status_detail
            .clone()
            .unwrap_or_else(|| "sem detalhes".to_string());
        let status_name = match payment.status {
            MpPaymentStatus::Cancelled => "cancelled",
            _ => "rejected",
        };

        let result = self
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::PendingPayment],
                ReservationStatus::Cancelled,
                TransitionPatch {
                    cancelled_at: Some(Utc::now()),
                    cancelled_by: Some(ActorType::System),
                    cancellation_reason: Some(format!("Pagamento {status_name}: {detail}")),
                    ..Default::default()
                },
                AuditContext::system("payment_rejected"),
            )
            .await;

        match result {
            Ok(_) => Ok(WebhookOutcome::Processed),
            Err(StoreError::StaleTransition { actual, .. }) => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    actual = %actual,
                    "rejected event lost the race, no-op"
                );
                Ok(WebhookOutcome::Ignored("stale rejected event"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Refunded payment: reservation to `refunded`, payment row updated.
    /// A later-arriving `approved` event can never revert this — see the
    /// pending_payment guard in [`apply_approved`].
    async fn apply_refunded(
        &self,
        reservation: &Reservation,
        payment: &MpPayment,
    ) -> Result<WebhookOutcome, WebhookError> {
        let refund_amount = payment
            .transaction_amount_refunded
            .unwrap_or(payment.transaction_amount);

        let result = self
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::Paid, ReservationStatus::AwaitingExpedition],
                ReservationStatus::Refunded,
                TransitionPatch {
                    refunded_at: Some(Utc::now()),
                    refund_amount: Some(refund_amount),
                    ..Default::default()
                },
                AuditContext::system("payment_refunded"),
            )
            .await;

        match result {
            Ok(_) => {}
            Err(StoreError::StaleTransition { actual, .. }) => {
                // Already refunded by the cancellation flow, or still
                // unpaid: either way the payment row update below is all
                // that is left to reconcile.
                tracing::info!(
                    reservation_id = %reservation.id,
                    actual = %actual,
                    "refund event on non-refundable status, reconciling payment row only"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.store
            .update_payment_status(
                &payment.id.to_string(),
                PaymentStatus::Refunded,
                AuditContext::system("payment_refunded"),
            )
            .await?;

        self.store
            .block_payout(
                reservation.id,
                "pagamento reembolsado",
                AuditContext::system("payout_blocked"),
            )
            .await?;

        Ok(WebhookOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_reference_round_trips() {
        let id = Uuid::new_v4();
        let reference = external_reference_for(id);
        assert_eq!(parse_external_reference(&reference), Some(id));
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(parse_external_reference(""), None);
        assert_eq!(parse_external_reference("reservation_"), None);
        assert_eq!(parse_external_reference("order_123_456"), None);
        assert_eq!(parse_external_reference("reservation_not-a-uuid_123"), None);
        assert_eq!(
            parse_external_reference("reservation_5f2e7f6a-1c9f-4a93-8f1f-1d2f3a4b5c6d_"),
            None
        );
        assert_eq!(
            parse_external_reference("reservation_5f2e7f6a-1c9f-4a93-8f1f-1d2f3a4b5c6d_17xz"),
            None
        );
    }

    #[test]
    fn parses_reference_with_timestamp() {
        let parsed = parse_external_reference(
            "reservation_5f2e7f6a-1c9f-4a93-8f1f-1d2f3a4b5c6d_1717171717000",
        );
        assert_eq!(
            parsed,
            Some(Uuid::parse_str("5f2e7f6a-1c9f-4a93-8f1f-1d2f3a4b5c6d").unwrap())
        );
    }

    #[test]
    fn decodes_webhook_notification() {
        let body = r#"{"type":"payment","data":{"id":"123456789"}}"#;
        let notification: WebhookNotification = serde_json::from_str(body).unwrap();
        assert_eq!(notification.kind.as_deref(), Some("payment"));
        assert_eq!(
            notification.data.and_then(|d| d.id).as_deref(),
            Some("123456789")
        );
    }

    #[test]
    fn tolerates_unknown_notification_shapes() {
        let body = r#"{"type":"test"}"#;
        let notification: WebhookNotification = serde_json::from_str(body).unwrap();
        assert_eq!(notification.kind.as_deref(), Some("test"));
        assert!(notification.data.is_none());
    }
}
