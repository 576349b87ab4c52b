//! Reservation rows: creation with the capacity guard, guarded status
//! transitions, and the sweep queries used by the background workers.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::types::chrono::DateTime;
use uuid::Uuid;

use crate::models::{AuditEntityType, Expedition, Reservation, ReservationStatus};

use super::audit::insert_audit_tx;
use super::{AuditContext, ReservationStore, StoreError, TransitionPatch};

impl ReservationStore {
    /// Insert a `pending_payment` reservation after checking that the
    /// expedition is bookable and has room.
    ///
    /// The expedition row is locked for the duration of the check-then-insert
    /// so concurrent checkouts at the capacity limit serialize instead of
    /// overselling. Committed capacity is re-summed from `paid` reservations,
    /// never read from the cached `enrolled_count`.
    pub async fn create_reservation(
        &self,
        expedition_id: Uuid,
        user_id: Uuid,
        quantity: i32,
        ttl_minutes: i64,
    ) -> Result<(Reservation, Expedition), StoreError> {
        let mut tx = self.pool().begin().await?;

        let expedition = sqlx::query_as::<_, Expedition>(
            "SELECT * FROM expeditions WHERE id = $1 FOR UPDATE",
        )
        .bind(expedition_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::ExpeditionNotFound)?;

        if !expedition.status.is_bookable() {
            return Err(StoreError::ExpeditionNotBookable);
        }

        let booked: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM reservations
            WHERE expedition_id = $1 AND status = 'paid'
            "#,
        )
        .bind(expedition_id)
        .fetch_one(&mut *tx)
        .await?;

        let available = i64::from(expedition.capacity) - booked;
        if i64::from(quantity) > available {
            return Err(StoreError::CapacityExceeded {
                available: available.max(0) as i32,
            });
        }

        let unit_price = expedition.price;
        let total_amount = unit_price * Decimal::from(quantity);
        let expires_at = Utc::now() + Duration::minutes(ttl_minutes);

        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (
                expedition_id, user_id, quantity, unit_price, total_amount,
                status, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, 'pending_payment', $6)
            RETURNING *
            "#,
        )
        .bind(expedition_id)
        .bind(user_id)
        .bind(quantity)
        .bind(unit_price)
        .bind(total_amount)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((reservation, expedition))
    }

    pub async fn get_reservation(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let reservation =
            sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(reservation)
    }

    pub async fn list_user_reservations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Reservation>, StoreError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(reservations)
    }

    /// Reservations of one expedition currently in any of `statuses`.
    pub async fn list_expedition_reservations_in(
        &self,
        expedition_id: Uuid,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE expedition_id = $1 AND status = ANY($2)
            ORDER BY created_at
            "#,
        )
        .bind(expedition_id)
        .bind(statuses)
        .fetch_all(self.pool())
        .await?;
        Ok(reservations)
    }

    /// Persist the checkout artifact references produced by the processor
    /// and write the `checkout_created` audit entry in the same transaction.
    pub async fn set_checkout_refs(
        &self,
        id: Uuid,
        preference_id: &str,
        external_reference: &str,
        ctx: AuditContext,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self.pool().begin().await?;

        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            UPDATE reservations
            SET mp_preference_id = $2, mp_external_reference = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(preference_id)
        .bind(external_reference)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::ReservationNotFound)?;

        insert_audit_tx(
            &mut tx,
            AuditEntityType::Reservation,
            id,
            &ctx,
            None,
            Some(reservation.status.to_string()),
        )
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    /// Move a reservation along the status graph with a compare-then-update
    /// guard.
    ///
    /// Fails with [`StoreError::StaleTransition`] when the stored status is
    /// not one of `expected` — the caller lost a race (duplicate webhook,
    /// concurrent cancel) and must treat the result as a no-op, not retry.
    /// The audit entry is written inside the same transaction; it cannot be
    /// forgotten by a caller.
    pub async fn transition_status(
        &self,
        id: Uuid,
        expected: &[ReservationStatus],
        new_status: ReservationStatus,
        patch: TransitionPatch,
        ctx: AuditContext,
    ) -> Result<Reservation, StoreError> {
        for &from in expected {
            if !from.permits(new_status) {
                return Err(StoreError::ForbiddenTransition {
                    from,
                    to: new_status,
                });
            }
        }

        let mut tx = self.pool().begin().await?;

        let current: ReservationStatus = sqlx::query_scalar(
            "SELECT status FROM reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::ReservationNotFound)?;

        if !expected.contains(&current) {
            return Err(StoreError::StaleTransition {
                reservation_id: id,
                expected: expected.to_vec(),
                actual: current,
            });
        }

        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            UPDATE reservations SET
                status = $3,
                paid_at = COALESCE($4, paid_at),
                payment_method = COALESCE($5, payment_method),
                mp_payment_id = COALESCE($6, mp_payment_id),
                cancelled_at = COALESCE($7, cancelled_at),
                cancelled_by = COALESCE($8, cancelled_by),
                cancellation_reason = COALESCE($9, cancellation_reason),
                refunded_at = COALESCE($10, refunded_at),
                refund_amount = COALESCE($11, refund_amount),
                mp_refund_id = COALESCE($12, mp_refund_id),
                expedition_completed_at = COALESCE($13, expedition_completed_at),
                contestation_ends_at = COALESCE($14, contestation_ends_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(current)
        .bind(new_status)
        .bind(patch.paid_at)
        .bind(patch.payment_method)
        .bind(patch.mp_payment_id)
        .bind(patch.cancelled_at)
        .bind(patch.cancelled_by)
        .bind(patch.cancellation_reason)
        .bind(patch.refunded_at)
        .bind(patch.refund_amount)
        .bind(patch.mp_refund_id)
        .bind(patch.expedition_completed_at)
        .bind(patch.contestation_ends_at)
        .fetch_one(&mut *tx)
        .await?;

        insert_audit_tx(
            &mut tx,
            AuditEntityType::Reservation,
            id,
            &ctx,
            Some(current.to_string()),
            Some(new_status.to_string()),
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(
            reservation_id = %id,
            from = %current,
            to = %new_status,
            action = ctx.action,
            "reservation transitioned"
        );
        Ok(reservation)
    }

    /// `pending_payment` reservations whose checkout TTL elapsed.
    pub async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = 'pending_payment' AND expires_at < $1
            "#,
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(reservations)
    }

    /// `paid` or `awaiting_expedition` reservations whose expedition already
    /// started, due for date-based advancement.
    pub async fn find_due_for_advancement(
        &self,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT r.* FROM reservations r
            JOIN expeditions e ON e.id = r.expedition_id
            WHERE r.status = $1 AND e.start_date <= $2
            "#,
        )
        .bind(status)
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(reservations)
    }

    /// `awaiting_contestation` reservations whose dispute window elapsed
    /// without a contestation.
    pub async fn find_release_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let reservations = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = 'awaiting_contestation' AND contestation_ends_at <= $1
            "#,
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(reservations)
    }
}
