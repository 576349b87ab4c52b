//! Expedition reads plus the two writes the reservation core owns:
//! enrollment refresh (with the `full` flip) and completion.

use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Expedition;

use super::{ReservationStore, StoreError};

impl ReservationStore {
    pub async fn get_expedition(&self, id: Uuid) -> Result<Option<Expedition>, StoreError> {
        let expedition =
            sqlx::query_as::<_, Expedition>("SELECT * FROM expeditions WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(expedition)
    }

    /// Recompute `enrolled_count` from the authoritative set of paid
    /// reservations and flip the expedition to `full` when capacity is
    /// reached. Never increments a cached counter.
    pub async fn refresh_enrollment(&self, expedition_id: Uuid) -> Result<i32, StoreError> {
        let mut tx = self.pool().begin().await?;

        let expedition = sqlx::query_as::<_, Expedition>(
            "SELECT * FROM expeditions WHERE id = $1 FOR UPDATE",
        )
        .bind(expedition_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::ExpeditionNotFound)?;

        let enrolled: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)
            FROM reservations
            WHERE expedition_id = $1 AND status = 'paid'
            "#,
        )
        .bind(expedition_id)
        .fetch_one(&mut *tx)
        .await?;
        let enrolled = enrolled as i32;

        let full = enrolled >= expedition.capacity && expedition.status.is_bookable();
        sqlx::query(
            r#"
            UPDATE expeditions
            SET enrolled_count = $2,
                status = CASE WHEN $3 THEN 'full'::expedition_status ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(expedition_id)
        .bind(enrolled)
        .bind(full)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(enrolled)
    }

    /// Mark an expedition completed and stamp the contestation deadline.
    /// Conditional on the expedition still being `active` or `full`; `None`
    /// means another completion got there first.
    pub async fn mark_expedition_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
        contestation_end_date: DateTime<Utc>,
    ) -> Result<Option<Expedition>, StoreError> {
        let updated = sqlx::query_as::<_, Expedition>(
            r#"
            UPDATE expeditions
            SET status = 'completed', completed_at = $2, contestation_end_date = $3,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('active', 'full')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(completed_at)
        .bind(contestation_end_date)
        .fetch_optional(self.pool())
        .await?;
        Ok(updated)
    }
}
