//! Expedition completion, contestation, and admin resolution.
//!
//! Completion starts a time-boxed dispute window (two business days,
//! weekends excluded). A contestation opened inside the window suspends the
//! guide's payout until an admin resolves the dispute one way or the other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::fees::add_business_days;
use crate::mercadopago::{MercadoPagoClient, ProcessorError};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    Contestation, ContestationReason, ContestationStatus, Reservation, ReservationStatus,
};
use crate::store::{AuditContext, NewContestation, ReservationStore, StoreError, TransitionPatch};

/// Dispute window length after completion, in business days.
pub const CONTESTATION_WINDOW_BUSINESS_DAYS: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("Não autorizado")]
    Forbidden,
    #[error("{0}")]
    InvalidState(String),
    #[error("Período de contestação expirado")]
    WindowExpired,
    #[error("Contestação não encontrada")]
    ContestationNotFound,
}

/// Result of completing an expedition.
#[derive(Debug, serde::Serialize)]
pub struct CompletionOutcome {
    pub contestation_end_date: DateTime<Utc>,
    pub reservations_updated: usize,
}

/// Admin verdict on a contestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestationVerdict {
    ResolvedUser,
    ResolvedGuide,
}

/// Whether a contestation can still be opened at `now`.
pub fn contestation_window_open(ends_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(ends_at, Some(deadline) if now < deadline)
}

pub struct CompletionService {
    store: Arc<ReservationStore>,
    mp: Arc<MercadoPagoClient>,
}

impl CompletionService {
    pub fn new(store: Arc<ReservationStore>, mp: Arc<MercadoPagoClient>) -> Self {
        Self { store, mp }
    }

    /// Guide marks an expedition as completed, opening the dispute window
    /// for every active reservation.
    ///
    /// Reservations are walked through the remaining intermediate states one
    /// guarded step at a time; a reservation that changed concurrently is
    /// skipped and logged, never forced.
    pub async fn complete_expedition(
        &self,
        guide: &AuthenticatedUser,
        expedition_id: Uuid,
    ) -> Result<CompletionOutcome, CompletionError> {
        let expedition = self
            .store
            .get_expedition(expedition_id)
            .await?
            .ok_or(StoreError::ExpeditionNotFound)?;

        if expedition.guide_id != guide.id {
            return Err(CompletionError::Forbidden);
        }

        let now = Utc::now();
        let deadline = add_business_days(now, CONTESTATION_WINDOW_BUSINESS_DAYS);

        if self
            .store
            .mark_expedition_completed(expedition_id, now, deadline)
            .await?
            .is_none()
        {
            return Err(CompletionError::InvalidState(
                "Expedição não pode ser concluída neste status".to_string(),
            ));
        }

        let reservations = self
            .store
            .list_expedition_reservations_in(
                expedition_id,
                &[
                    ReservationStatus::Paid,
                    ReservationStatus::AwaitingExpedition,
                    ReservationStatus::ExpeditionInProgress,
                ],
            )
            .await?;

        let mut updated = 0;
        for reservation in &reservations {
            match self
                .walk_to_awaiting_contestation(reservation, guide.id, now, deadline)
                .await
            {
                Ok(()) => updated += 1,
                Err(CompletionError::Store(StoreError::StaleTransition { actual, .. })) => {
                    tracing::info!(
                        reservation_id = %reservation.id,
                        actual = %actual,
                        "reservation changed during completion, skipped"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            expedition_id = %expedition_id,
            reservations = updated,
            deadline = %deadline,
            "expedition completed"
        );

        Ok(CompletionOutcome {
            contestation_end_date: deadline,
            reservations_updated: updated,
        })
    }

    /// Advance one reservation through the chain up to
    /// `awaiting_contestation`, one edge per guarded update.
    async fn walk_to_awaiting_contestation(
        &self,
        reservation: &Reservation,
        guide_id: Uuid,
        completed_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<(), CompletionError> {
        let mut status = reservation.status;

        if status == ReservationStatus::Paid {
            self.store
                .transition_status(
                    reservation.id,
                    &[ReservationStatus::Paid],
                    ReservationStatus::AwaitingExpedition,
                    TransitionPatch::default(),
                    AuditContext::guide("expedition_completed", guide_id),
                )
                .await?;
            status = ReservationStatus::AwaitingExpedition;
        }

        if status == ReservationStatus::AwaitingExpedition {
            self.store
                .transition_status(
                    reservation.id,
                    &[ReservationStatus::AwaitingExpedition],
                    ReservationStatus::ExpeditionInProgress,
                    TransitionPatch::default(),
                    AuditContext::guide("expedition_completed", guide_id),
                )
                .await?;
            status = ReservationStatus::ExpeditionInProgress;
        }

        if status == ReservationStatus::ExpeditionInProgress {
            self.store
                .transition_status(
                    reservation.id,
                    &[ReservationStatus::ExpeditionInProgress],
                    ReservationStatus::AwaitingContestation,
                    TransitionPatch {
                        expedition_completed_at: Some(completed_at),
                        contestation_ends_at: Some(deadline),
                        ..Default::default()
                    },
                    AuditContext::guide("expedition_completed", guide_id),
                )
                .await?;
        }

        Ok(())
    }

    /// User opens a dispute against a completed reservation.
    pub async fn open_contestation(
        &self,
        user: &AuthenticatedUser,
        reservation_id: Uuid,
        reason: ContestationReason,
        description: String,
        evidence_urls: Vec<String>,
    ) -> Result<Contestation, CompletionError> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(StoreError::ReservationNotFound)?;

        if reservation.user_id != user.id {
            return Err(CompletionError::Forbidden);
        }

        if reservation.status != ReservationStatus::AwaitingContestation {
            return Err(CompletionError::InvalidState(
                "Reserva não está no período de contestação".to_string(),
            ));
        }

        if !contestation_window_open(reservation.contestation_ends_at, Utc::now()) {
            return Err(CompletionError::WindowExpired);
        }

        if self
            .store
            .get_open_contestation_for_reservation(reservation_id)
            .await?
            .is_some()
        {
            return Err(CompletionError::InvalidState(
                "Já existe uma contestação aberta para esta reserva".to_string(),
            ));
        }

        let expedition = self
            .store
            .get_expedition(reservation.expedition_id)
            .await?
            .ok_or(StoreError::ExpeditionNotFound)?;

        // The status guard is the race arbiter: if a concurrent release
        // sweep or duplicate submit got here first, this fails Stale and no
        // contestation row is written.
        self.store
            .transition_status(
                reservation_id,
                &[ReservationStatus::AwaitingContestation],
                ReservationStatus::InDispute,
                TransitionPatch::default(),
                AuditContext::user("contestation_opened", user.id).with_metadata(
                    serde_json::json!({ "reason": reason, "description": description }),
                ),
            )
            .await?;

        let contestation = self
            .store
            .insert_contestation(NewContestation {
                reservation_id,
                user_id: user.id,
                guide_id: expedition.guide_id,
                reason,
                description,
                evidence_urls,
            })
            .await?;

        if let Some(payout) = self
            .store
            .block_payout(
                reservation_id,
                "contestação aberta pelo trekker",
                AuditContext::user("payout_blocked", user.id),
            )
            .await?
        {
            tracing::info!(
                payout_id = %payout.id,
                reservation_id = %reservation_id,
                "payout blocked by contestation"
            );
        }

        Ok(contestation)
    }

    /// Guide responds to an open contestation.
    pub async fn respond_contestation(
        &self,
        guide: &AuthenticatedUser,
        contestation_id: Uuid,
        response: String,
    ) -> Result<Contestation, CompletionError> {
        self.store
            .record_guide_response(contestation_id, guide.id, &response)
            .await?
            .ok_or(CompletionError::ContestationNotFound)
    }

    /// Admin resolves a dispute. `resolved_user` refunds the trekker and
    /// permanently blocks the payout; `resolved_guide` releases the funds
    /// and re-arms the payout.
    pub async fn resolve_contestation(
        &self,
        admin: &AuthenticatedUser,
        contestation_id: Uuid,
        verdict: ContestationVerdict,
        resolution: String,
        refund_amount: Option<Decimal>,
    ) -> Result<Contestation, CompletionError> {
        let contestation = self
            .store
            .get_contestation(contestation_id)
            .await?
            .ok_or(CompletionError::ContestationNotFound)?;

        let reservation = self
            .store
            .get_reservation(contestation.reservation_id)
            .await?
            .ok_or(StoreError::ReservationNotFound)?;

        if reservation.status != ReservationStatus::InDispute {
            return Err(CompletionError::InvalidState(
                "Reserva não está em disputa".to_string(),
            ));
        }

        match verdict {
            ContestationVerdict::ResolvedUser => {
                let amount = refund_amount.unwrap_or(reservation.total_amount);
                let payment_id = reservation.mp_payment_id.as_deref().ok_or_else(|| {
                    CompletionError::InvalidState(
                        "Reserva em disputa sem pagamento associado".to_string(),
                    )
                })?;
                let refund = self.mp.create_refund(payment_id, Some(amount)).await?;

                self.store
                    .transition_status(
                        reservation.id,
                        &[ReservationStatus::InDispute],
                        ReservationStatus::Refunded,
                        TransitionPatch {
                            refunded_at: Some(Utc::now()),
                            refund_amount: Some(amount),
                            mp_refund_id: Some(refund.id.to_string()),
                            ..Default::default()
                        },
                        AuditContext::admin("contestation_resolved_user", admin.id),
                    )
                    .await?;

                let resolved = self
                    .store
                    .resolve_contestation_row(
                        contestation_id,
                        ContestationStatus::ResolvedUser,
                        &resolution,
                        admin.id,
                        Some(amount),
                    )
                    .await?
                    .ok_or(CompletionError::ContestationNotFound)?;

                // The payout stays blocked; the blocked row plus the audit
                // trail is the record that nothing is owed to the guide.
                Ok(resolved)
            }
            ContestationVerdict::ResolvedGuide => {
                self.store
                    .transition_status(
                        reservation.id,
                        &[ReservationStatus::InDispute],
                        ReservationStatus::Released,
                        TransitionPatch::default(),
                        AuditContext::admin("contestation_resolved_guide", admin.id),
                    )
                    .await?;

                let resolved = self
                    .store
                    .resolve_contestation_row(
                        contestation_id,
                        ContestationStatus::ResolvedGuide,
                        &resolution,
                        admin.id,
                        None,
                    )
                    .await?
                    .ok_or(CompletionError::ContestationNotFound)?;

                self.store
                    .unblock_payout(
                        reservation.id,
                        AuditContext::admin("payout_unblocked", admin.id),
                    )
                    .await?;

                Ok(resolved)
            }
        }
    }

    /// Guide marks a trekker that never showed up. Terminal; the payout
    /// keeps its schedule since the spot was held for the trekker.
    pub async fn mark_no_show(
        &self,
        guide: &AuthenticatedUser,
        expedition_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<Reservation, CompletionError> {
        let expedition = self
            .store
            .get_expedition(expedition_id)
            .await?
            .ok_or(StoreError::ExpeditionNotFound)?;

        if expedition.guide_id != guide.id {
            return Err(CompletionError::Forbidden);
        }

        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(StoreError::ReservationNotFound)?;

        if reservation.expedition_id != expedition_id {
            return Err(CompletionError::InvalidState(
                "Reserva não pertence a esta expedição".to_string(),
            ));
        }

        let updated = self
            .store
            .transition_status(
                reservation_id,
                &[
                    ReservationStatus::AwaitingExpedition,
                    ReservationStatus::ExpeditionInProgress,
                ],
                ReservationStatus::NoShow,
                TransitionPatch::default(),
                AuditContext::guide("marked_no_show", guide.id),
            )
            .await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn window_open_one_second_before_deadline() {
        let deadline = Utc::now() + Duration::days(1);
        assert!(contestation_window_open(
            Some(deadline),
            deadline - Duration::seconds(1)
        ));
    }

    #[test]
    fn window_closed_one_second_after_deadline() {
        let deadline = Utc::now();
        assert!(!contestation_window_open(
            Some(deadline),
            deadline + Duration::seconds(1)
        ));
    }

    #[test]
    fn window_closed_exactly_at_deadline() {
        let deadline = Utc::now();
        assert!(!contestation_window_open(Some(deadline), deadline));
    }

    #[test]
    fn window_closed_when_deadline_missing() {
        assert!(!contestation_window_open(None, Utc::now()));
    }
}
