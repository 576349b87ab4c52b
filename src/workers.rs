//! Background jobs: checkout expiry, date-based lifecycle advancement,
//! dispute-window release, and payout dispatch.
//!
//! Every job is idempotent: each reservation/payout it touches goes through
//! the store's conditional updates, so a tick racing a webhook or a user
//! action degrades to a logged no-op. No job keeps in-memory state between
//! ticks.

use chrono::Utc;

use crate::app_state::AppState;
use crate::models::{ActorType, PixKeyType, Payout, ReservationStatus, VerificationStatus};
use crate::store::{AuditContext, StoreError, TransitionPatch};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

impl PixKeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpf => "cpf",
            Self::Cnpj => "cnpj",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Random => "random",
        }
    }
}

/// Start the periodic jobs. The returned scheduler must be kept alive for
/// the lifetime of the server.
pub async fn start(state: AppState) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let st = state.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_id, _sched| {
            let st = st.clone();
            Box::pin(async move {
                if let Err(e) = run_expiry_sweep(&st).await {
                    tracing::error!(error = %e, "expiry sweep failed");
                }
            })
        })?)
        .await?;

    let st = state.clone();
    scheduler
        .add(Job::new_async("15 */5 * * * *", move |_id, _sched| {
            let st = st.clone();
            Box::pin(async move {
                if let Err(e) = run_advancement_sweep(&st).await {
                    tracing::error!(error = %e, "advancement sweep failed");
                }
            })
        })?)
        .await?;

    let st = state.clone();
    scheduler
        .add(Job::new_async("30 */5 * * * *", move |_id, _sched| {
            let st = st.clone();
            Box::pin(async move {
                if let Err(e) = run_release_sweep(&st).await {
                    tracing::error!(error = %e, "release sweep failed");
                }
            })
        })?)
        .await?;

    let st = state.clone();
    scheduler
        .add(Job::new_async("45 */5 * * * *", move |_id, _sched| {
            let st = st.clone();
            Box::pin(async move {
                if let Err(e) = run_payout_dispatch(&st).await {
                    tracing::error!(error = %e, "payout dispatch failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("background jobs started");
    Ok(scheduler)
}

/// Abandon `pending_payment` reservations whose checkout TTL elapsed.
pub async fn run_expiry_sweep(state: &AppState) -> Result<(), StoreError> {
    let expired = state.store.find_expired_pending(Utc::now()).await?;
    for reservation in expired {
        let result = state
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::PendingPayment],
                ReservationStatus::Cancelled,
                TransitionPatch {
                    cancelled_at: Some(Utc::now()),
                    cancelled_by: Some(ActorType::System),
                    cancellation_reason: Some("Sessão de checkout expirada".to_string()),
                    ..Default::default()
                },
                AuditContext::system("checkout_expired"),
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!(reservation_id = %reservation.id, "expired pending reservation cancelled");
            }
            // Lost to a late-arriving payment webhook; the payment wins.
            Err(StoreError::StaleTransition { .. }) => {}
            Err(e) => tracing::error!(reservation_id = %reservation.id, error = %e, "expiry failed"),
        }
    }
    Ok(())
}

/// Advance `paid -> awaiting_expedition -> expedition_in_progress` once the
/// expedition's start date passes. One edge per reservation per tick.
pub async fn run_advancement_sweep(state: &AppState) -> Result<(), StoreError> {
    let now = Utc::now();

    for reservation in state
        .store
        .find_due_for_advancement(ReservationStatus::Paid, now)
        .await?
    {
        let result = state
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::Paid],
                ReservationStatus::AwaitingExpedition,
                TransitionPatch::default(),
                AuditContext::system("expedition_started"),
            )
            .await;
        if let Err(e) = result {
            if !matches!(e, StoreError::StaleTransition { .. }) {
                tracing::error!(reservation_id = %reservation.id, error = %e, "advancement failed");
            }
        }
    }

    for reservation in state
        .store
        .find_due_for_advancement(ReservationStatus::AwaitingExpedition, now)
        .await?
    {
        let result = state
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::AwaitingExpedition],
                ReservationStatus::ExpeditionInProgress,
                TransitionPatch::default(),
                AuditContext::system("expedition_started"),
            )
            .await;
        if let Err(e) = result {
            if !matches!(e, StoreError::StaleTransition { .. }) {
                tracing::error!(reservation_id = %reservation.id, error = %e, "advancement failed");
            }
        }
    }

    Ok(())
}

/// Release reservations whose dispute window elapsed without a contestation,
/// making their payouts eligible for dispatch.
pub async fn run_release_sweep(state: &AppState) -> Result<(), StoreError> {
    let due = state.store.find_release_due(Utc::now()).await?;
    for reservation in due {
        let result = state
            .store
            .transition_status(
                reservation.id,
                &[ReservationStatus::AwaitingContestation],
                ReservationStatus::Released,
                TransitionPatch::default(),
                AuditContext::system("contestation_window_elapsed"),
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!(reservation_id = %reservation.id, "funds released after dispute window");
            }
            // A contestation slipped in before the deadline check committed.
            Err(StoreError::StaleTransition { .. }) => {}
            Err(e) => tracing::error!(reservation_id = %reservation.id, error = %e, "release failed"),
        }
    }
    Ok(())
}

/// Execute due payouts via PIX. Each payout is claimed with a conditional
/// update before anything external happens, so two overlapping ticks cannot
/// double-send.
pub async fn run_payout_dispatch(state: &AppState) -> Result<(), StoreError> {
    let due = state.store.find_due_payouts(Utc::now()).await?;
    for payout in due {
        if let Err(e) = dispatch_one(state, &payout).await {
            tracing::error!(payout_id = %payout.id, error = %e, "payout dispatch error");
        }
    }
    Ok(())
}

async fn dispatch_one(state: &AppState, payout: &Payout) -> Result<(), StoreError> {
    let Some(reservation) = state.store.get_reservation(payout.reservation_id).await? else {
        tracing::error!(payout_id = %payout.id, "payout references missing reservation");
        return Ok(());
    };

    match reservation.status {
        // No-show keeps the guide's earnings: the spot was held.
        ReservationStatus::Released | ReservationStatus::NoShow => {}
        ReservationStatus::Refunded | ReservationStatus::Cancelled => {
            state
                .store
                .block_payout(
                    reservation.id,
                    "reserva não liberada para repasse",
                    AuditContext::system("payout_blocked"),
                )
                .await?;
            return Ok(());
        }
        // Not released yet (window still open or dispute pending): leave
        // scheduled for a later tick.
        _ => return Ok(()),
    }

    let verification = state.store.get_verification(payout.guide_id).await?;
    let Some(verification) = verification
        .filter(|v| v.status == VerificationStatus::Approved && v.pix_key.is_some())
    else {
        tracing::warn!(
            payout_id = %payout.id,
            guide_id = %payout.guide_id,
            "guide not approved for payouts, leaving payout scheduled"
        );
        return Ok(());
    };

    let Some(claimed) = state.store.mark_payout_processing(payout.id).await? else {
        // Another tick claimed it, or it was blocked meanwhile.
        return Ok(());
    };

    let pix_key = verification.pix_key.as_deref().unwrap_or_default();
    let pix_key_type = verification
        .pix_key_type
        .map(PixKeyType::as_str)
        .unwrap_or("random");
    let reference = format!("payout_{}", claimed.id);

    match state
        .mp
        .create_pix_transfer(pix_key, pix_key_type, claimed.net_amount, &reference)
        .await
    {
        Ok(transfer) => {
            state
                .store
                .mark_payout_sent(
                    claimed.id,
                    pix_key,
                    pix_key_type,
                    &transfer.id,
                    transfer.end_to_end_id.as_deref(),
                    AuditContext::system("payout_sent"),
                )
                .await?;
            state
                .store
                .mark_payout_completed(claimed.id, AuditContext::system("payout_completed"))
                .await?;

            let result = state
                .store
                .transition_status(
                    reservation.id,
                    &[ReservationStatus::Released],
                    ReservationStatus::PayoutSent,
                    TransitionPatch::default(),
                    AuditContext::system("payout_sent"),
                )
                .await;
            match result {
                Ok(_) => {}
                // No-show reservations stay terminal; only released ones
                // move to payout_sent.
                Err(StoreError::StaleTransition { .. }) => {}
                Err(e) => return Err(e),
            }

            tracing::info!(
                payout_id = %claimed.id,
                reservation_id = %reservation.id,
                net = %claimed.net_amount,
                "payout executed"
            );
        }
        Err(e) => {
            tracing::warn!(payout_id = %claimed.id, error = %e, "pix transfer failed");
            state
                .store
                .mark_payout_failed(claimed.id, &e.to_string(), AuditContext::system("payout_failed"))
                .await?;
        }
    }

    Ok(())
}
